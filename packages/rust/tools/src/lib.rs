//! External tool invocation contract.
//!
//! Every geospatial collaborator is a black box invoked through
//! [`ToolRunner::run`] with an [`Invocation`]: image, argv, mounts, and the
//! outputs it must leave behind. Transient services (the geocoding index) are
//! acquired with [`with_service`], which always stops them.

pub mod invocation;
pub mod runner;
pub mod service;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use invocation::{DeclaredOutput, Invocation, Mount, shell_quote};
pub use runner::{ContainerRunner, ToolOutput, ToolRunner, run_args, service_args, teardown_args};
pub use service::{ServiceHandle, ServiceSpec, with_service};
