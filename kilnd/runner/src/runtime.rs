//! Container runtime capabilities needed by the docker worker.

use std::{fmt::Debug, time::Duration};

use futures::{future::BoxFuture, stream::BoxStream};
use thiserror::Error;

/// A container to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
	/// Image reference, `repository:tag`.
	pub image: String,
	pub command: Vec<String>,
	/// Bind mounts, `host:container`.
	pub binds: Vec<String>,
}

pub trait ContainerRuntime
where
	Self: Send + Sync + Debug,
{
	fn image_exists(&self, image: &str) -> BoxFuture<'_, Result<bool, RuntimeError>>;
	/// Builds `tag` from a single Dockerfile, returning the build output.
	fn build_image(
		&self,
		dockerfile: Vec<u8>,
		tag: &str,
		no_cache: bool,
	) -> BoxFuture<'_, Result<String, RuntimeError>>;
	/// Creates a container, returning its id.
	fn create_container(&self, spec: ContainerSpec) -> BoxFuture<'_, Result<String, RuntimeError>>;
	fn start_container(&self, id: &str) -> BoxFuture<'_, Result<(), RuntimeError>>;
	/// Waits for the container to stop, returning its exit code.
	fn wait_container(&self, id: &str) -> BoxFuture<'_, Result<i64, RuntimeError>>;
	/// Output of a stopped container, stdout and stderr interleaved, every
	/// line prefixed with its timestamp.
	fn container_logs(&self, id: &str) -> BoxStream<'_, Result<Vec<u8>, RuntimeError>>;
	/// Force-removes a container.
	fn remove_container(&self, id: &str) -> BoxFuture<'_, Result<(), RuntimeError>>;
	/// Removes an image reference, failing with [`RuntimeError::NotFound`]
	/// if it does not exist.
	fn remove_image(&self, image: &str) -> BoxFuture<'_, Result<(), RuntimeError>>;
	/// Commits a container as `repo:tag`.
	fn commit_container(
		&self,
		id: &str,
		repo: &str,
		tag: &str,
	) -> BoxFuture<'_, Result<(), RuntimeError>>;
}

#[derive(Debug, Error)]
pub enum RuntimeError {
	#[error("docker client error: {0}")]
	Client(#[from] bollard::errors::Error),
	#[error("{0} not found")]
	NotFound(String),
	#[error("operation timed out after {0:?}")]
	Timeout(Duration),
	#[error("image build failed: {0}")]
	BuildFailed(String),
	#[error("container execution failed: {0}")]
	ExecutionFailed(String),
}
