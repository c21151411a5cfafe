//! Docker build executor.
//!
//! Every (project, target) pair owns an image repository with two tags:
//! `fallback`, the last-known-good build environment, and `latest`, the
//! environment refreshed by the most recent primary branch build.

use std::{path::PathBuf, sync::Arc, time::Instant};

use futures::{FutureExt, StreamExt, future::BoxFuture};
use kiln_backend_model::build::{Build, RevisionKind};
use kiln_backend_service::BackendServices;
use kiln_common_model::build::BuildState;
use time::Duration;
use tracing::{error, info, warn};

use crate::{
	config::RunnerConfig,
	dispatcher::{BoxedExecutor, BuildExecutor, ExecutorFactory},
	locks::ImageLocks,
	log::BuildLog,
	runtime::{ContainerRuntime, ContainerSpec, RuntimeError},
};

pub const FALLBACK_TAG: &str = "fallback";
pub const LATEST_TAG: &str = "latest";

/// Image repository holding the build environments of a build.
pub fn image_repository(prefix: &str, build: &Build) -> String {
	format!("{}/{}_{}", prefix, build.project.name, build.target).to_lowercase()
}

/// Creates [`DockerWorker`]s, registered under the `docker` build type.
#[derive(Debug, Clone)]
pub struct DockerWorkerFactory {
	backend: BackendServices,
	runtime: Arc<dyn ContainerRuntime>,
	locks: Arc<ImageLocks>,
	config: Arc<RunnerConfig>,
}

impl DockerWorkerFactory {
	pub const BUILD_TYPE: &str = "docker";

	pub fn new(
		backend: BackendServices,
		runtime: Arc<dyn ContainerRuntime>,
		config: Arc<RunnerConfig>,
	) -> Self {
		Self {
			backend,
			runtime,
			locks: Arc::new(ImageLocks::default()),
			config,
		}
	}
}

impl ExecutorFactory for DockerWorkerFactory {
	fn construct(&self, build: Build) -> BoxedExecutor {
		Box::new(DockerWorker {
			build,
			backend: self.backend.clone(),
			runtime: self.runtime.clone(),
			locks: self.locks.clone(),
			config: self.config.clone(),
		})
	}
}

/// Runs one build to completion.
#[derive(Debug)]
pub struct DockerWorker {
	build: Build,
	backend: BackendServices,
	runtime: Arc<dyn ContainerRuntime>,
	locks: Arc<ImageLocks>,
	config: Arc<RunnerConfig>,
}

impl BuildExecutor for DockerWorker {
	fn run(self: Box<Self>) -> BoxFuture<'static, BuildState> {
		self.execute().boxed()
	}
}

impl DockerWorker {
	async fn execute(mut self: Box<Self>) -> BuildState {
		let recorder = self.backend.recorder.clone();
		recorder.record(&mut self.build, BuildState::Init).await;

		let state = match self.open_log().await {
			Some(mut log) => {
				let state = self.drive(&mut log).await;
				log.step(&format!("Finished: {state}")).await;
				log.flush().await;
				state
			}
			None => BuildState::Fail,
		};
		recorder.record(&mut self.build, state).await;
		info!(%state, "build finished");
		state
	}

	fn output_dir(&self) -> PathBuf {
		let dir = self.build.output_dir(&self.backend.config.paths.output);
		std::path::absolute(&dir).unwrap_or(dir)
	}

	fn source_dir(&self) -> PathBuf {
		let dir = self.backend.projects.source_dir(&self.build.project.name);
		std::path::absolute(&dir).unwrap_or(dir)
	}

	async fn open_log(&self) -> Option<BuildLog> {
		let dir = self.output_dir();
		let result = async {
			tokio::fs::create_dir_all(&dir).await?;
			BuildLog::create(&dir).await
		}
		.await;
		match result {
			Ok(log) => Some(log),
			Err(error) => {
				error!(dir = %dir.display(), %error, "failed to set up output directory");
				None
			}
		}
	}

	async fn drive(&mut self, log: &mut BuildLog) -> BuildState {
		let repo = image_repository(&self.config.image_prefix, &self.build);
		let fallback = format!("{repo}:{FALLBACK_TAG}");
		if !self.bootstrap(log, &fallback).await {
			return BuildState::Fail;
		}

		let kind = self.build.revision_kind();
		let updated = match kind {
			RevisionKind::Primary | RevisionKind::Refresh => self.update(log, &repo).await,
			RevisionKind::Review => false,
		};
		if kind == RevisionKind::Refresh {
			return if updated {
				BuildState::Success
			} else {
				BuildState::Fail
			};
		}

		self.backend
			.recorder
			.clone()
			.record(&mut self.build, BuildState::Building)
			.await;
		let Some(command) = self.build.build_command() else {
			log.line(&format!("no build instructions for {}", self.build.target))
				.await;
			return BuildState::Fail;
		};

		if updated {
			let latest = format!("{repo}:{LATEST_TAG}");
			if self.run_build(log, &latest, &command).await {
				return BuildState::Success;
			}
			log.line("retrying on the fallback environment").await;
		}
		if self.run_build(log, &fallback, &command).await {
			BuildState::FallbackSuccess
		} else {
			BuildState::Fail
		}
	}

	/// Makes sure the fallback environment exists.
	async fn bootstrap(&self, log: &mut BuildLog, fallback: &str) -> bool {
		match self.runtime.image_exists(fallback).await {
			Ok(true) => return true,
			Ok(false) => {}
			Err(error) => {
				log.line(&format!("cannot check {fallback}: {error}")).await;
				error!(%error, "failed to check fallback image");
				return false;
			}
		}

		log.step(&format!("Building {fallback}")).await;
		let path = self
			.source_dir()
			.join("docker")
			.join(self.build.target.as_str())
			.join("Dockerfile");
		let dockerfile = match tokio::fs::read(&path).await {
			Ok(dockerfile) => dockerfile,
			Err(error) => {
				log.line(&format!("cannot read {}: {error}", path.display()))
					.await;
				warn!(path = %path.display(), %error, "missing environment definition");
				return false;
			}
		};
		match self.runtime.build_image(dockerfile, fallback, true).await {
			Ok(output) => {
				log.write(output.as_bytes()).await;
				info!(image = fallback, "fallback image built");
				true
			}
			Err(error) => {
				log.line(&format!("fallback image build failed: {error}"))
					.await;
				error!(%error, "failed to build fallback image");
				false
			}
		}
	}

	/// Refreshes the build environment, returning whether it succeeded.
	///
	/// The result is committed as `latest`, or as `fallback` for refresh-only
	/// builds.
	async fn update(&mut self, log: &mut BuildLog, repo: &str) -> bool {
		let _guard = self.locks.lock(repo).await;
		log.step("Updating build environment").await;
		let Some(command) = self
			.build
			.project
			.config
			.update_command(&self.build.target)
		else {
			log.line("no update instructions, using the fallback environment")
				.await;
			return false;
		};

		let spec = ContainerSpec {
			image: format!("{repo}:{FALLBACK_TAG}"),
			command: vec![
				"bash".to_string(),
				"-c".to_string(),
				command,
				self.build.revision.clone(),
			],
			binds: vec![format!("{}:/output", self.output_dir().display())],
		};
		let started = Instant::now();
		let result = self.run_container(log, spec).await;
		let elapsed = Duration::try_from(started.elapsed()).unwrap_or(Duration::ZERO);
		self.backend
			.recorder
			.clone()
			.record_update_duration(&mut self.build, elapsed)
			.await;

		let id = match result {
			Ok((id, 0)) => id,
			Ok((id, code)) => {
				log.line(&format!("update exited with status {code}")).await;
				warn!(code, "environment update failed");
				self.destroy(&id).await;
				return false;
			}
			Err(error) => {
				log.line(&format!("update failed: {error}")).await;
				warn!(%error, "environment update failed");
				return false;
			}
		};

		let tag = if self.build.is_refresh_only() {
			FALLBACK_TAG
		} else {
			LATEST_TAG
		};
		let result = self.promote(&id, repo, tag).await;
		self.destroy(&id).await;
		match result {
			Ok(()) => {
				info!(image = %format!("{repo}:{tag}"), "build environment updated");
				true
			}
			Err(error) => {
				log.line(&format!("cannot save the updated environment: {error}"))
					.await;
				error!(%error, "failed to commit updated environment");
				false
			}
		}
	}

	/// Replaces `repo:tag` with the state of a container.
	async fn promote(&self, id: &str, repo: &str, tag: &str) -> Result<(), RuntimeError> {
		match self.runtime.remove_image(&format!("{repo}:{tag}")).await {
			Ok(()) | Err(RuntimeError::NotFound(_)) => {}
			Err(error) => return Err(error),
		}
		self.runtime.commit_container(id, repo, tag).await
	}

	/// Runs the build instructions on `image`, returning whether they
	/// succeeded.
	async fn run_build(&self, log: &mut BuildLog, image: &str, command: &str) -> bool {
		log.step(&format!("Building on {image}")).await;
		let spec = ContainerSpec {
			image: image.to_string(),
			command: vec!["bash".to_string(), "-c".to_string(), command.to_string()],
			binds: vec![
				format!("{}:/output", self.output_dir().display()),
				format!(
					"{}:/{}",
					self.source_dir().display(),
					self.build.project.name
				),
			],
		};
		match self.run_container(log, spec).await {
			Ok((id, code)) => {
				self.destroy(&id).await;
				if code != 0 {
					log.line(&format!("build exited with status {code}")).await;
					warn!(image, code, "build failed");
				}
				code == 0
			}
			Err(error) => {
				log.line(&format!("build failed: {error}")).await;
				warn!(image, %error, "build failed");
				false
			}
		}
	}

	/// Runs a container to completion, returning its id and exit code.
	///
	/// On error the container is already destroyed.
	async fn run_container(
		&self,
		log: &mut BuildLog,
		spec: ContainerSpec,
	) -> Result<(String, i64), RuntimeError> {
		let id = self.runtime.create_container(spec).await?;
		match self.attend(log, &id).await {
			Ok(code) => Ok((id, code)),
			Err(error) => {
				self.destroy(&id).await;
				Err(error)
			}
		}
	}

	async fn attend(&self, log: &mut BuildLog, id: &str) -> Result<i64, RuntimeError> {
		self.runtime.start_container(id).await?;
		let timeout = self.config.wait_timeout();
		let code = tokio::time::timeout(timeout, self.runtime.wait_container(id))
			.await
			.map_err(|_| RuntimeError::Timeout(timeout))??;

		let mut output = self.runtime.container_logs(id);
		while let Some(chunk) = output.next().await {
			match chunk {
				Ok(chunk) => log.write(&chunk).await,
				Err(error) => {
					log.line(&format!("container output unavailable: {error}"))
						.await;
					break;
				}
			}
		}
		Ok(code)
	}

	async fn destroy(&self, id: &str) {
		if let Err(error) = self.runtime.remove_container(id).await {
			warn!(container = id, %error, "failed to remove container");
		}
	}
}

#[cfg(test)]
mod test {
	use kiln_backend_model::build::REFRESH_REVISION;

	use super::*;
	use crate::testing::{FakeRuntime, TestEnv};

	const FALLBACK: &str = "kiln/hello_amd64:fallback";
	const LATEST: &str = "kiln/hello_amd64:latest";

	async fn run(env: &TestEnv, runtime: &Arc<FakeRuntime>, revision: &str) -> (Build, BuildState) {
		run_with(env, runtime, revision, RunnerConfig::default()).await
	}

	async fn run_with(
		env: &TestEnv,
		runtime: &Arc<FakeRuntime>,
		revision: &str,
		config: RunnerConfig,
	) -> (Build, BuildState) {
		let build = env.build(revision).await;
		let factory = DockerWorkerFactory::new(env.backend.clone(), runtime.clone(), Arc::new(config));
		let state = factory.construct(build.clone()).run().await;
		let stored = env
			.backend
			.store
			.find_by_id(build.id)
			.await
			.unwrap()
			.unwrap();
		assert_eq!(stored.state, state);
		(stored, state)
	}

	#[test]
	fn test_image_repository() {
		let mut build = crate::testing::sample_build("master");
		build.project.name = "Hello".into();
		build.target = "ARM64".into();
		assert_eq!(image_repository("kiln", &build), "kiln/hello_arm64");
	}

	#[tokio::test]
	async fn test_bootstrap_failure() {
		let env = TestEnv::new().await;
		let runtime = Arc::new(FakeRuntime::default());
		runtime.configure(|state| state.fail_image_build = true);

		let (build, state) = run(&env, &runtime, "master").await;
		assert_eq!(state, BuildState::Fail);
		assert!(build.started_at.is_none());
		assert!(runtime.created().is_empty());
		assert!(
			runtime
				.calls()
				.contains(&format!("build_image {FALLBACK} no_cache=true"))
		);
	}

	#[tokio::test]
	async fn test_bootstrap_runtime_error() {
		let env = TestEnv::new().await;
		let runtime = Arc::new(FakeRuntime::default());
		runtime.configure(|state| state.fail_image_check = true);

		let (_, state) = run(&env, &runtime, "feature").await;
		assert_eq!(state, BuildState::Fail);
		assert_eq!(runtime.calls(), vec![format!("image_exists {FALLBACK}")]);
	}

	#[tokio::test]
	async fn test_bootstrap_then_review_build() {
		let env = TestEnv::new().await;
		let runtime = Arc::new(FakeRuntime::default());

		let (build, state) = run(&env, &runtime, "refs/changes/01/101/1").await;
		assert_eq!(state, BuildState::FallbackSuccess);
		assert!(runtime.has_image(FALLBACK));
		assert!(build.started_at.is_some());

		let created = runtime.created();
		assert_eq!(created.len(), 1);
		assert_eq!(created[0].image, FALLBACK);
		assert_eq!(
			created[0].command[2],
			"make REF=refs/changes/01/101/1 && make install"
		);
		assert_eq!(created[0].binds.len(), 2);
		assert!(created[0].binds[1].ends_with("/projects/hello:/hello"));

		let log = std::fs::read_to_string(
			build
				.output_dir(&env.backend.config.paths.output)
				.join(crate::log::LOG_FILE),
		)
		.unwrap();
		assert!(log.contains("==> Building on kiln/hello_amd64:fallback"));
	}

	#[tokio::test]
	async fn test_review_failure_is_not_retried() {
		let env = TestEnv::new().await;
		let runtime = Arc::new(FakeRuntime::with_images(&[FALLBACK, LATEST]));
		runtime.configure(|state| {
			state.build_exit.insert(FALLBACK.to_string(), 2);
		});

		let (_, state) = run(&env, &runtime, "feature").await;
		assert_eq!(state, BuildState::Fail);
		assert_eq!(runtime.created().len(), 1);
	}

	#[tokio::test]
	async fn test_primary_updates_then_builds_on_latest() {
		let env = TestEnv::new().await;
		let runtime = Arc::new(FakeRuntime::with_images(&[FALLBACK]));

		let (_, state) = run(&env, &runtime, "master").await;
		assert_eq!(state, BuildState::Success);
		assert!(runtime.has_image(LATEST));

		let created = runtime.created();
		assert_eq!(created.len(), 2);
		assert_eq!(
			created[0].command,
			vec!["bash", "-c", "apt-get update && apt-get -y upgrade", "master"]
		);
		assert_eq!(created[0].image, FALLBACK);
		assert_eq!(created[0].binds.len(), 1);
		assert_eq!(created[1].image, LATEST);

		let calls = runtime.calls();
		let removed = calls
			.iter()
			.position(|c| *c == format!("remove_image {LATEST}"))
			.unwrap();
		let committed = calls
			.iter()
			.position(|c| c.starts_with("commit ") && c.ends_with(LATEST))
			.unwrap();
		assert!(removed < committed);
		assert_eq!(runtime.running(), 0);
	}

	#[tokio::test]
	async fn test_primary_update_failure_uses_fallback() {
		let env = TestEnv::new().await;
		let runtime = Arc::new(FakeRuntime::with_images(&[FALLBACK]));
		runtime.configure(|state| state.update_exit = 1);

		let (_, state) = run(&env, &runtime, "master").await;
		assert_eq!(state, BuildState::FallbackSuccess);
		assert!(!runtime.has_image(LATEST));
		assert!(!runtime.calls().iter().any(|c| c.starts_with("commit ")));

		let created = runtime.created();
		assert_eq!(created.len(), 2);
		assert_eq!(created[1].image, FALLBACK);
		assert_eq!(runtime.running(), 0);
	}

	#[tokio::test]
	async fn test_latest_failure_retries_once_on_fallback() {
		let env = TestEnv::new().await;
		let runtime = Arc::new(FakeRuntime::with_images(&[FALLBACK]));
		runtime.configure(|state| {
			state.build_exit.insert(LATEST.to_string(), 1);
		});

		let (_, state) = run(&env, &runtime, "master").await;
		assert_eq!(state, BuildState::FallbackSuccess);
		let images = runtime
			.created()
			.into_iter()
			.skip(1)
			.map(|spec| spec.image)
			.collect::<Vec<_>>();
		assert_eq!(images, vec![LATEST, FALLBACK]);
	}

	#[tokio::test]
	async fn test_both_attempts_fail() {
		let env = TestEnv::new().await;
		let runtime = Arc::new(FakeRuntime::with_images(&[FALLBACK]));
		runtime.configure(|state| {
			state.build_exit.insert(LATEST.to_string(), 1);
			state.build_exit.insert(FALLBACK.to_string(), 1);
		});

		let (_, state) = run(&env, &runtime, "master").await;
		assert_eq!(state, BuildState::Fail);
		assert_eq!(runtime.created().len(), 3);
	}

	#[tokio::test]
	async fn test_refresh_replaces_fallback() {
		let env = TestEnv::new().await;
		let runtime = Arc::new(FakeRuntime::with_images(&[FALLBACK]));

		let (build, state) = run(&env, &runtime, REFRESH_REVISION).await;
		assert_eq!(state, BuildState::Success);
		assert!(build.started_at.is_none());
		assert_eq!(runtime.created().len(), 1);
		assert!(!runtime.has_image(LATEST));
		assert!(runtime.has_image(FALLBACK));

		let calls = runtime.calls();
		assert!(calls.contains(&format!("remove_image {FALLBACK}")));
		assert!(
			calls
				.iter()
				.any(|c| c.starts_with("commit ") && c.ends_with(FALLBACK))
		);
	}

	#[tokio::test]
	async fn test_refresh_failure() {
		let env = TestEnv::new().await;
		let runtime = Arc::new(FakeRuntime::with_images(&[FALLBACK]));
		runtime.configure(|state| state.update_exit = 1);

		let (_, state) = run(&env, &runtime, REFRESH_REVISION).await;
		assert_eq!(state, BuildState::Fail);
		assert_eq!(runtime.created().len(), 1);
	}

	#[tokio::test]
	async fn test_missing_update_instructions() {
		let env = TestEnv::new().await;
		let runtime = Arc::new(FakeRuntime::with_images(&[FALLBACK]));
		let mut build = env.build("master").await;
		build.project.config.update_instructions.clear();

		let factory = DockerWorkerFactory::new(
			env.backend.clone(),
			runtime.clone(),
			Arc::new(RunnerConfig::default()),
		);
		let state = factory.construct(build).run().await;
		assert_eq!(state, BuildState::FallbackSuccess);
		let created = runtime.created();
		assert_eq!(created.len(), 1);
		assert_eq!(created[0].image, FALLBACK);
	}

	fn read_log(env: &TestEnv, build: &Build) -> String {
		std::fs::read_to_string(
			build
				.output_dir(&env.backend.config.paths.output)
				.join(crate::log::LOG_FILE),
		)
		.unwrap()
	}

	fn short_timeout() -> RunnerConfig {
		RunnerConfig {
			wait_timeout: 1,
			..Default::default()
		}
	}

	#[tokio::test]
	async fn test_update_duration_is_persisted() {
		for update_exit in [0, 1] {
			let env = TestEnv::new().await;
			let runtime = Arc::new(FakeRuntime::with_images(&[FALLBACK]));
			runtime.configure(|state| {
				state.update_exit = update_exit;
				state.wait_delay = std::time::Duration::from_millis(1100);
			});

			let (build, _) = run(&env, &runtime, "master").await;
			assert!(
				build.update_duration >= Duration::seconds(1),
				"update exit {update_exit}: {}",
				build.update_duration
			);
		}
	}

	#[tokio::test]
	async fn test_review_build_has_no_update_duration() {
		let env = TestEnv::new().await;
		let runtime = Arc::new(FakeRuntime::with_images(&[FALLBACK]));
		runtime.configure(|state| state.wait_delay = std::time::Duration::from_millis(1100));

		let (build, _) = run(&env, &runtime, "feature").await;
		assert_eq!(build.update_duration, Duration::ZERO);
	}

	#[tokio::test]
	async fn test_update_timeout_uses_fallback() {
		let env = TestEnv::new().await;
		let runtime = Arc::new(FakeRuntime::with_images(&[FALLBACK]));
		runtime.configure(|state| state.hang_update = true);

		let (build, state) = run_with(&env, &runtime, "master", short_timeout()).await;
		assert_eq!(state, BuildState::FallbackSuccess);
		assert!(!runtime.has_image(LATEST));
		assert!(build.update_duration >= Duration::seconds(1));
		let images = runtime
			.created()
			.into_iter()
			.map(|spec| spec.image)
			.collect::<Vec<_>>();
		assert_eq!(images, vec![FALLBACK, FALLBACK]);
		assert_eq!(runtime.running(), 0);
		assert!(read_log(&env, &build).contains("update failed: operation timed out"));
	}

	#[tokio::test]
	async fn test_build_timeout_retries_on_fallback() {
		let env = TestEnv::new().await;
		let runtime = Arc::new(FakeRuntime::with_images(&[FALLBACK]));
		runtime.configure(|state| {
			state.hang_build.insert(LATEST.to_string());
		});

		let (build, state) = run_with(&env, &runtime, "master", short_timeout()).await;
		assert_eq!(state, BuildState::FallbackSuccess);
		let images = runtime
			.created()
			.into_iter()
			.map(|spec| spec.image)
			.collect::<Vec<_>>();
		assert_eq!(images, vec![FALLBACK, LATEST, FALLBACK]);
		assert_eq!(runtime.running(), 0);
		assert!(read_log(&env, &build).contains("build failed: operation timed out"));
	}

	#[tokio::test]
	async fn test_review_timeout_fails() {
		let env = TestEnv::new().await;
		let runtime = Arc::new(FakeRuntime::with_images(&[FALLBACK]));
		runtime.configure(|state| {
			state.hang_build.insert(FALLBACK.to_string());
		});

		let (_, state) = run_with(&env, &runtime, "feature", short_timeout()).await;
		assert_eq!(state, BuildState::Fail);
		assert_eq!(runtime.created().len(), 1);
		assert_eq!(runtime.running(), 0);
	}

	#[tokio::test]
	async fn test_updates_of_same_environment_are_serialized() {
		let env = TestEnv::new().await;
		let runtime = Arc::new(FakeRuntime::with_images(&[FALLBACK]));
		runtime.configure(|state| state.wait_delay = std::time::Duration::from_millis(100));
		let factory = DockerWorkerFactory::new(
			env.backend.clone(),
			runtime.clone(),
			Arc::new(RunnerConfig::default()),
		);
		let first = env.build("master").await;
		let second = env.build("master").await;

		let (a, b) = tokio::join!(
			factory.construct(first).run(),
			factory.construct(second).run()
		);
		assert_eq!((a, b), (BuildState::Success, BuildState::Success));

		let update_create = format!("create {FALLBACK}");
		let updates = runtime
			.calls()
			.into_iter()
			.filter_map(|call| {
				if call == update_create {
					Some("create")
				} else if call.starts_with("remove_image ") {
					Some("remove")
				} else if call.starts_with("commit ") {
					Some("commit")
				} else {
					None
				}
			})
			.collect::<Vec<_>>();
		assert_eq!(
			updates,
			vec!["create", "remove", "commit", "create", "remove", "commit"]
		);
	}
}
