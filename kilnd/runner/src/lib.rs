//! Kiln build execution engine.
//!
//! The [`BuildManager`](manager::BuildManager) creates builds and hands them
//! to the [`Dispatcher`](dispatcher::Dispatcher), which runs them on a
//! bounded pool of executors selected by build type.

use kiln_backend_model::build::BuildId;
use kiln_backend_service::{BackendError, project::ProjectError};
use kstring::KString;
use runtime::RuntimeError;
use thiserror::Error;

pub mod config;
pub mod dispatcher;
pub mod docker;
pub mod locks;
pub mod log;
pub mod manager;
pub mod runtime;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

#[derive(Debug, Error)]
pub enum RunnerError {
	#[error("unknown build type {0}")]
	UnknownBuildType(KString),
	#[error("project {project} has no target {target}")]
	UnknownTarget { project: KString, target: KString },
	#[error("build {0} not found")]
	NotFound(BuildId),
	#[error("build {0} cannot be retried")]
	NotRetryable(BuildId),
	#[error("dispatcher is not running")]
	DispatcherClosed,
	#[error(transparent)]
	Project(#[from] ProjectError),
	#[error(transparent)]
	Backend(#[from] BackendError),
	#[error(transparent)]
	Runtime(#[from] RuntimeError),
}
