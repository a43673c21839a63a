//! Common types for the mesh member-roll operator: CRDs, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod mesh;
pub mod metrics;
pub mod telemetry;

pub use error::{AggregateError, Error};
pub use events::{EventPublisher, KubeEventPublisher, NoopEventPublisher};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager recorded on every write made by the operator
pub const FIELD_MANAGER: &str = "meshroll-member-roll-controller";
