// ABOUTME: Library root for apex-runtime - a container runtime abstraction
// ABOUTME: and lifecycle engine driving Docker and Podman through their CLIs.

pub mod error;
pub mod exec;
pub mod manager;
pub mod runtime;
pub mod types;

pub use error::{RuntimeError, RuntimeErrorKind};
pub use manager::ContainerManager;
