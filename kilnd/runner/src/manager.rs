use std::sync::Arc;

use kiln_backend_model::{
	build::{ALL_TARGETS, Build, BuildId, REFRESH_REVISION},
	project::Project,
};
use kiln_backend_service::BackendServices;
use kiln_common_model::build::BuildState;
use kstring::KString;
use tracing::{error, info, warn};

use crate::{RunnerError, dispatcher::Dispatcher};

/// Short commit recorded when the head of the primary branch is unknown.
pub const UNKNOWN_COMMIT: &str = "unknown";

/// Creates builds and drives them through the dispatcher.
#[derive(Debug, Clone)]
pub struct BuildManager {
	backend: BackendServices,
	dispatcher: Arc<Dispatcher>,
}

impl BuildManager {
	pub fn new(backend: BackendServices, dispatcher: Arc<Dispatcher>) -> Self {
		Self {
			backend,
			dispatcher,
		}
	}

	/// Creates and dispatches builds of `revision`.
	///
	/// The project is reloaded first. Target `all` creates one build per
	/// configured target.
	#[tracing::instrument(skip(self))]
	pub async fn create(
		&self,
		project: &str,
		target: &str,
		revision: &str,
		deploy: bool,
	) -> Result<Vec<Build>, RunnerError> {
		let project = self.backend.projects.reload(project).await?;
		let targets = expand_targets(&project, target)?;
		let short_commit = match self.backend.projects.head_commit(&project).await {
			Ok(commit) => commit,
			Err(error) => {
				warn!(%error, "cannot resolve head commit");
				UNKNOWN_COMMIT.to_string()
			}
		};

		let mut builds = Vec::with_capacity(targets.len());
		for target in targets {
			let mut build = Build::new(
				project.clone(),
				target,
				revision.to_string(),
				short_commit.clone(),
				deploy,
			);
			if let Err(error) = self.backend.store.insert(&build).await {
				error!(build = %build.id, %error, "failed to persist build");
			}
			info!(build = %build.id, target = %build.target, "build created");
			self.submit(&mut build).await;
			builds.push(build);
		}
		Ok(builds)
	}

	/// Runs a failed build again under the same id, with a fresh project
	/// snapshot.
	#[tracing::instrument(skip(self))]
	pub async fn retry(&self, id: BuildId) -> Result<Build, RunnerError> {
		let mut build = self.get(id).await?;
		if !build.is_retryable() {
			return Err(RunnerError::NotRetryable(id));
		}
		let project = self.backend.projects.reload(&build.project.name).await?;
		build.reset_for_retry(project);
		self.backend.recorder.record_retry(&build).await;
		info!("build retried");
		self.submit(&mut build).await;
		Ok(build)
	}

	/// Creates builds of `revision`, or reports the existing ones.
	///
	/// Primary and refresh revisions are always built. Other revisions reuse
	/// the latest build of each target, retrying it if it failed.
	#[tracing::instrument(skip(self))]
	pub async fn request(
		&self,
		project: &str,
		target: &str,
		revision: &str,
		deploy: bool,
	) -> Result<Vec<Build>, RunnerError> {
		let current = self.backend.projects.get(project).await?;
		if revision == REFRESH_REVISION || revision == current.config.primary_branch.as_str() {
			return self.create(project, target, revision, deploy).await;
		}

		let mut builds = vec![];
		for target in expand_targets(&current, target)? {
			let latest = self
				.backend
				.store
				.find_latest(project, &target, revision)
				.await?;
			match latest {
				Some(build) if build.is_retryable() => builds.push(self.retry(build.id).await?),
				Some(build) => builds.push(build),
				None => builds.extend(self.create(project, &target, revision, deploy).await?),
			}
		}
		Ok(builds)
	}

	/// Persists a lifecycle transition of `build`.
	pub async fn record_transition(&self, build: &mut Build, state: BuildState) {
		self.backend.recorder.record(build, state).await;
	}

	/// Fails every build left unfinished by a previous run.
	pub async fn reconcile(&self) -> Result<usize, RunnerError> {
		let count = self.backend.store.reconcile_non_terminal().await?;
		info!(count, "reconciled interrupted builds");
		Ok(count)
	}

	pub async fn get(&self, id: BuildId) -> Result<Build, RunnerError> {
		self.backend
			.store
			.find_by_id(id)
			.await?
			.ok_or(RunnerError::NotFound(id))
	}

	/// Builds of a project, newest first.
	pub async fn list(&self, project: &str) -> Result<Vec<Build>, RunnerError> {
		Ok(self.backend.store.find_by_project(project).await?)
	}

	async fn submit(&self, build: &mut Build) {
		let submitted = build.state;
		if let Err(error) = self.dispatcher.dispatch(build) {
			error!(build = %build.id, %error, "cannot dispatch build");
			// the dispatcher failed it in memory only
			build.state = submitted;
			self.record_transition(build, BuildState::Fail).await;
		}
	}
}

/// Resolves the targets named by `target`, in sorted order for `all`.
fn expand_targets(project: &Project, target: &str) -> Result<Vec<KString>, RunnerError> {
	if target == ALL_TARGETS {
		Ok(project.config.targets().cloned().collect())
	} else if project.config.has_target(target) {
		Ok(vec![KString::from_ref(target)])
	} else {
		Err(RunnerError::UnknownTarget {
			project: project.name.clone(),
			target: KString::from_ref(target),
		})
	}
}
