//! [`ContainerRuntime`] over the Docker Engine API.

use bollard::{
	API_DEFAULT_VERSION, Docker,
	container::{
		Config, CreateContainerOptions, LogsOptions, RemoveContainerOptions, WaitContainerOptions,
	},
	errors::Error as DockerError,
	image::{BuildImageOptions, CommitContainerOptions, RemoveImageOptions},
	models::HostConfig,
};
use futures::{
	FutureExt, StreamExt,
	future::BoxFuture,
	stream::BoxStream,
};
use tracing::debug;

use crate::runtime::{ContainerRuntime, ContainerSpec, RuntimeError};

/// Seconds before a request to the daemon is abandoned.
const CLIENT_TIMEOUT: u64 = 120;

#[derive(Debug, Clone)]
pub struct DockerRuntime {
	client: Docker,
}

impl DockerRuntime {
	/// Connects to the daemon at `socket`, or to the local default.
	pub fn connect(socket: Option<&str>) -> Result<Self, RuntimeError> {
		let client = match socket {
			Some(path) => Docker::connect_with_socket(path, CLIENT_TIMEOUT, API_DEFAULT_VERSION)?,
			None => Docker::connect_with_local_defaults()?,
		};
		Ok(Self { client })
	}
}

/// Maps a 404 response to [`RuntimeError::NotFound`].
fn map_not_found(error: DockerError, what: &str) -> RuntimeError {
	match error {
		DockerError::DockerResponseServerError {
			status_code: 404, ..
		} => RuntimeError::NotFound(what.to_string()),
		error => error.into(),
	}
}

fn dockerfile_context(dockerfile: &[u8]) -> Result<Vec<u8>, RuntimeError> {
	let failed = |e: std::io::Error| RuntimeError::BuildFailed(format!("build context: {e}"));
	let mut header = tar::Header::new_gnu();
	header.set_path("Dockerfile").map_err(failed)?;
	header.set_size(dockerfile.len() as u64);
	header.set_mode(0o644);
	header.set_cksum();
	let mut builder = tar::Builder::new(Vec::new());
	builder.append(&header, dockerfile).map_err(failed)?;
	builder.into_inner().map_err(failed)
}

/// Complete output of a stopped container, each line prefixed with its
/// daemon timestamp.
fn logs_options() -> LogsOptions<String> {
	LogsOptions {
		stdout: true,
		stderr: true,
		timestamps: true,
		follow: false,
		..Default::default()
	}
}

impl ContainerRuntime for DockerRuntime {
	fn image_exists(&self, image: &str) -> BoxFuture<'_, Result<bool, RuntimeError>> {
		let image = image.to_string();
		async move {
			match self.client.inspect_image(&image).await {
				Ok(_) => Ok(true),
				Err(error) => match map_not_found(error, &image) {
					RuntimeError::NotFound(_) => Ok(false),
					error => Err(error),
				},
			}
		}
		.boxed()
	}

	fn build_image(
		&self,
		dockerfile: Vec<u8>,
		tag: &str,
		no_cache: bool,
	) -> BoxFuture<'_, Result<String, RuntimeError>> {
		let tag = tag.to_string();
		async move {
			let context = dockerfile_context(&dockerfile)?;
			let options = BuildImageOptions {
				t: tag,
				dockerfile: "Dockerfile".to_string(),
				nocache: no_cache,
				rm: true,
				forcerm: true,
				..Default::default()
			};
			let mut stream = self.client.build_image(options, None, Some(context.into()));
			let mut output = String::new();
			while let Some(info) = stream.next().await {
				let info = info?;
				if let Some(text) = info.stream {
					output.push_str(&text);
				}
				if let Some(error) = info.error {
					return Err(RuntimeError::BuildFailed(error));
				}
			}
			Ok(output)
		}
		.boxed()
	}

	fn create_container(&self, spec: ContainerSpec) -> BoxFuture<'_, Result<String, RuntimeError>> {
		async move {
			let config = Config {
				image: Some(spec.image),
				cmd: Some(spec.command),
				host_config: Some(HostConfig {
					binds: Some(spec.binds),
					..Default::default()
				}),
				..Default::default()
			};
			let response = self
				.client
				.create_container(None::<CreateContainerOptions<String>>, config)
				.await?;
			for warning in response.warnings {
				debug!(container = %response.id, %warning, "container warning");
			}
			Ok(response.id)
		}
		.boxed()
	}

	fn start_container(&self, id: &str) -> BoxFuture<'_, Result<(), RuntimeError>> {
		let id = id.to_string();
		async move {
			self.client
				.start_container::<String>(&id, None)
				.await
				.map_err(|e| map_not_found(e, &id))
		}
		.boxed()
	}

	fn wait_container(&self, id: &str) -> BoxFuture<'_, Result<i64, RuntimeError>> {
		let id = id.to_string();
		async move {
			let options = WaitContainerOptions {
				condition: "not-running",
			};
			let mut stream = self.client.wait_container(&id, Some(options));
			match stream.next().await {
				Some(Ok(response)) => Ok(response.status_code),
				// nonzero exit codes are reported as errors
				Some(Err(DockerError::DockerContainerWaitError { code, .. })) => Ok(code),
				Some(Err(error)) => Err(map_not_found(error, &id)),
				None => Err(RuntimeError::ExecutionFailed(format!(
					"no exit status for container {id}"
				))),
			}
		}
		.boxed()
	}

	fn container_logs(&self, id: &str) -> BoxStream<'_, Result<Vec<u8>, RuntimeError>> {
		self.client
			.logs(id, Some(logs_options()))
			.map(|chunk| {
				chunk
					.map(|output| output.into_bytes().to_vec())
					.map_err(RuntimeError::from)
			})
			.boxed()
	}

	fn remove_container(&self, id: &str) -> BoxFuture<'_, Result<(), RuntimeError>> {
		let id = id.to_string();
		async move {
			let options = RemoveContainerOptions {
				force: true,
				v: true,
				..Default::default()
			};
			self.client
				.remove_container(&id, Some(options))
				.await
				.map_err(|e| map_not_found(e, &id))
		}
		.boxed()
	}

	fn remove_image(&self, image: &str) -> BoxFuture<'_, Result<(), RuntimeError>> {
		let image = image.to_string();
		async move {
			let options = RemoveImageOptions {
				force: true,
				noprune: false,
			};
			self.client
				.remove_image(&image, Some(options), None)
				.await
				.map(|_| ())
				.map_err(|e| map_not_found(e, &image))
		}
		.boxed()
	}

	fn commit_container(
		&self,
		id: &str,
		repo: &str,
		tag: &str,
	) -> BoxFuture<'_, Result<(), RuntimeError>> {
		let options = CommitContainerOptions {
			container: id.to_string(),
			repo: repo.to_string(),
			tag: tag.to_string(),
			pause: true,
			..Default::default()
		};
		async move {
			self.client
				.commit_container(options, Config::<String>::default())
				.await?;
			Ok(())
		}
		.boxed()
	}
}
