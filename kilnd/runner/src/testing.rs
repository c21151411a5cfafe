//! Test doubles for the runner.

use std::{
	collections::{BTreeMap, BTreeSet},
	path::PathBuf,
	sync::{Arc, Mutex},
	time::Duration,
};

use futures::{
	FutureExt, StreamExt,
	future::BoxFuture,
	stream::{self, BoxStream},
};
use kiln_backend_model::{
	build::{Build, BuildId},
	project::{Project, ProjectConfig},
};
use kiln_backend_service::{
	BackendServices,
	config::{BackendConfig, PathsConfig},
	database::DatabaseConfig,
	hooks::{Deployer, HookError, Notifier},
	project::{DESCRIPTOR_FILE, ProjectService},
};
use tempfile::TempDir;
use tokio::sync::{Mutex as AsyncMutex, mpsc};

use crate::runtime::{ContainerRuntime, ContainerSpec, RuntimeError};

const DESCRIPTOR: &str = r#"{
	"build-type": "docker",
	"build-instructions": {
		"amd64": ["make REF={{REF_NUMBER}}", "make install"]
	},
	"update-instructions": {
		"amd64": ["apt-get update", "apt-get -y upgrade"]
	}
}"#;

/// Project matching the descriptor written by [`TestEnv`].
pub fn sample_build(revision: &str) -> Build {
	let config: ProjectConfig = serde_json::from_str(DESCRIPTOR).unwrap();
	let project = Project {
		name: "hello".into(),
		config,
	};
	Build::new(
		project,
		"amd64".into(),
		revision.to_string(),
		"abc1234".to_string(),
		false,
	)
}

#[derive(Debug, PartialEq, Eq)]
pub enum RecordedEffect {
	Deploy(BuildId),
	Notify(BuildId),
}

#[derive(Debug)]
struct RecordingHooks(mpsc::UnboundedSender<RecordedEffect>);

impl Deployer for RecordingHooks {
	fn deploy(&self, build: Build) -> BoxFuture<'_, Result<(), HookError>> {
		let _ = self.0.send(RecordedEffect::Deploy(build.id));
		async { Ok(()) }.boxed()
	}
}

impl Notifier for RecordingHooks {
	fn notify_failure(&self, build: Build) -> BoxFuture<'_, Result<(), HookError>> {
		let _ = self.0.send(RecordedEffect::Notify(build.id));
		async { Ok(()) }.boxed()
	}
}

/// Backend over an in-memory database, with project `hello` on disk.
pub struct TestEnv {
	pub backend: BackendServices,
	pub effects: AsyncMutex<mpsc::UnboundedReceiver<RecordedEffect>>,
	_dir: TempDir,
}

impl TestEnv {
	pub async fn new() -> Self {
		let dir = tempfile::tempdir().unwrap();
		let paths = PathsConfig {
			projects: dir.path().join("projects"),
			output: dir.path().join("output"),
		};
		let docker = paths.projects.join("hello").join("docker").join("amd64");
		std::fs::create_dir_all(&docker).unwrap();
		std::fs::write(docker.join("Dockerfile"), "FROM debian:bookworm\n").unwrap();
		std::fs::write(paths.projects.join("hello").join(DESCRIPTOR_FILE), DESCRIPTOR).unwrap();

		let config = BackendConfig {
			database: DatabaseConfig {
				url: "sqlite://:memory:".to_string(),
				max_connections: 1,
			},
			paths: paths.clone(),
		};
		let projects = Arc::new(ProjectService::new(&paths));
		let (sender, receiver) = mpsc::unbounded_channel();
		let hooks = Arc::new(RecordingHooks(sender));
		let backend = BackendServices::with_hooks(config, projects, hooks.clone(), hooks)
			.await
			.unwrap();
		Self {
			backend,
			effects: AsyncMutex::new(receiver),
			_dir: dir,
		}
	}

	fn descriptor_path(&self) -> PathBuf {
		self.backend.projects.source_dir("hello").join(DESCRIPTOR_FILE)
	}

	pub fn descriptor(&self) -> String {
		std::fs::read_to_string(self.descriptor_path()).unwrap()
	}

	pub fn write_descriptor(&self, descriptor: &str) {
		std::fs::write(self.descriptor_path(), descriptor).unwrap();
	}

	/// Adds a target with the same instructions as `amd64`.
	pub fn add_target(&self, target: &str) {
		let mut config: serde_json::Value = serde_json::from_str(&self.descriptor()).unwrap();
		let instructions = config["build-instructions"]["amd64"].clone();
		config["build-instructions"][target] = instructions;
		self.write_descriptor(&config.to_string());
	}

	/// Creates and persists a build of project `hello` for `amd64`.
	pub async fn build(&self, revision: &str) -> Build {
		let project = self.backend.projects.get("hello").await.unwrap();
		let build = Build::new(
			project,
			"amd64".into(),
			revision.to_string(),
			"abc1234".to_string(),
			false,
		);
		self.backend.store.insert(&build).await.unwrap();
		build
	}
}

/// Behaviour and recorded calls of a [`FakeRuntime`].
#[derive(Debug, Default)]
pub struct FakeState {
	pub images: BTreeSet<String>,
	pub calls: Vec<String>,
	pub created: Vec<ContainerSpec>,
	/// Containers not removed yet.
	pub containers: BTreeMap<String, ContainerSpec>,
	pub fail_image_check: bool,
	pub fail_image_build: bool,
	/// Exit code of environment updates.
	pub update_exit: i64,
	/// Exit code of builds, by image.
	pub build_exit: BTreeMap<String, i64>,
	/// Time every container takes to exit.
	pub wait_delay: Duration,
	/// Environment updates never exit.
	pub hang_update: bool,
	/// Builds on these images never exit.
	pub hang_build: BTreeSet<String>,
}

/// In-memory [`ContainerRuntime`] recording every call.
#[derive(Debug, Default)]
pub struct FakeRuntime {
	state: Mutex<FakeState>,
}

impl FakeRuntime {
	pub fn with_images(images: &[&str]) -> Self {
		let runtime = Self::default();
		runtime.configure(|state| {
			state.images = images.iter().map(|i| i.to_string()).collect();
		});
		runtime
	}

	pub fn configure(&self, f: impl FnOnce(&mut FakeState)) {
		f(&mut self.state.lock().unwrap());
	}

	pub fn calls(&self) -> Vec<String> {
		self.state.lock().unwrap().calls.clone()
	}

	pub fn created(&self) -> Vec<ContainerSpec> {
		self.state.lock().unwrap().created.clone()
	}

	pub fn has_image(&self, image: &str) -> bool {
		self.state.lock().unwrap().images.contains(image)
	}

	/// Number of containers not removed yet.
	pub fn running(&self) -> usize {
		self.state.lock().unwrap().containers.len()
	}

	fn with<T: Send + 'static>(
		&self,
		call: String,
		f: impl FnOnce(&mut FakeState) -> Result<T, RuntimeError>,
	) -> BoxFuture<'_, Result<T, RuntimeError>> {
		let mut state = self.state.lock().unwrap();
		state.calls.push(call);
		let result = f(&mut state);
		async move { result }.boxed()
	}
}

impl ContainerRuntime for FakeRuntime {
	fn image_exists(&self, image: &str) -> BoxFuture<'_, Result<bool, RuntimeError>> {
		self.with(format!("image_exists {image}"), |state| {
			if state.fail_image_check {
				return Err(RuntimeError::ExecutionFailed("daemon unavailable".into()));
			}
			Ok(state.images.contains(image))
		})
	}

	fn build_image(
		&self,
		_dockerfile: Vec<u8>,
		tag: &str,
		no_cache: bool,
	) -> BoxFuture<'_, Result<String, RuntimeError>> {
		self.with(format!("build_image {tag} no_cache={no_cache}"), |state| {
			if state.fail_image_build {
				return Err(RuntimeError::BuildFailed("broken Dockerfile".into()));
			}
			state.images.insert(tag.to_string());
			Ok("Successfully built\n".to_string())
		})
	}

	fn create_container(&self, spec: ContainerSpec) -> BoxFuture<'_, Result<String, RuntimeError>> {
		self.with(format!("create {}", spec.image), |state| {
			let id = format!("c{}", state.created.len());
			state.created.push(spec.clone());
			state.containers.insert(id.clone(), spec);
			Ok(id)
		})
	}

	fn start_container(&self, id: &str) -> BoxFuture<'_, Result<(), RuntimeError>> {
		self.with(format!("start {id}"), |state| {
			if !state.containers.contains_key(id) {
				return Err(RuntimeError::NotFound(id.to_string()));
			}
			Ok(())
		})
	}

	fn wait_container(&self, id: &str) -> BoxFuture<'_, Result<i64, RuntimeError>> {
		let mut state = self.state.lock().unwrap();
		state.calls.push(format!("wait {id}"));
		let delay = state.wait_delay;
		let Some(spec) = state.containers.get(id) else {
			let error = RuntimeError::NotFound(id.to_string());
			return async move { Err::<i64, _>(error) }.boxed();
		};
		// updates pass the revision after the script
		let (code, hang) = if spec.command.len() == 4 {
			(state.update_exit, state.hang_update)
		} else {
			(
				state.build_exit.get(&spec.image).copied().unwrap_or(0),
				state.hang_build.contains(&spec.image),
			)
		};
		async move {
			if hang {
				futures::future::pending::<()>().await;
			}
			tokio::time::sleep(delay).await;
			Ok(code)
		}
		.boxed()
	}

	fn container_logs(&self, id: &str) -> BoxStream<'_, Result<Vec<u8>, RuntimeError>> {
		self.state.lock().unwrap().calls.push(format!("logs {id}"));
		stream::iter(vec![Ok(format!("output of {id}\n").into_bytes())]).boxed()
	}

	fn remove_container(&self, id: &str) -> BoxFuture<'_, Result<(), RuntimeError>> {
		self.with(format!("remove_container {id}"), |state| {
			state
				.containers
				.remove(id)
				.map(|_| ())
				.ok_or_else(|| RuntimeError::NotFound(id.to_string()))
		})
	}

	fn remove_image(&self, image: &str) -> BoxFuture<'_, Result<(), RuntimeError>> {
		self.with(format!("remove_image {image}"), |state| {
			if state.images.remove(image) {
				Ok(())
			} else {
				Err(RuntimeError::NotFound(image.to_string()))
			}
		})
	}

	fn commit_container(
		&self,
		id: &str,
		repo: &str,
		tag: &str,
	) -> BoxFuture<'_, Result<(), RuntimeError>> {
		self.with(format!("commit {id} {repo}:{tag}"), |state| {
			if !state.containers.contains_key(id) {
				return Err(RuntimeError::NotFound(id.to_string()));
			}
			state.images.insert(format!("{repo}:{tag}"));
			Ok(())
		})
	}
}
