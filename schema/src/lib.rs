//! Schema definitions for trellis
//!
//! This crate contains the data structures shared by the supervisor core and
//! the daemon: service and build specifications, backoff configuration,
//! supervision states, exit information and lifecycle events.

pub mod events;
pub mod service;

pub use events::ServiceEvent;
pub use service::{
    BackoffConfig, BuildSpec, HealthCheck, HealthCheckType, ServiceExit, ServiceSpec,
    ServiceState,
};
