use std::sync::Arc;

use kiln_backend_model::build::{Build, now};
use kiln_common_model::build::BuildState;
use time::Duration;
use tracing::{error, info, warn};

use crate::{
	hooks::{Effect, EffectQueue},
	store::BuildStore,
};

/// Persists build lifecycle transitions and triggers their side effects.
///
/// Persistence errors are logged and never interrupt the build.
#[derive(Debug)]
pub struct TransitionRecorder {
	store: Arc<dyn BuildStore>,
	effects: EffectQueue,
}

impl TransitionRecorder {
	pub fn new(store: Arc<dyn BuildStore>, effects: EffectQueue) -> Self {
		Self { store, effects }
	}

	/// Moves `build` to `state` and persists it.
	///
	/// `started_at` is stamped when the build phase begins. Entering a
	/// terminal state from a running one enqueues a deploy (artifact) or a
	/// failure notification (no artifact) when the build requests
	/// deployment. Recording a terminal build again fires nothing.
	pub async fn record(&self, build: &mut Build, state: BuildState) {
		let previous = build.state;
		if !previous.can_advance_to(state) {
			warn!(build = %build.id, from = %previous, to = %state, "unexpected transition");
		}
		let now = now();
		build.state = state;
		build.updated_at = now;
		if state == BuildState::Building {
			build.started_at = Some(now);
		}
		info!(build = %build.id, %state, "build transition");
		self.persist(build).await;

		if state.is_terminal() && !previous.is_terminal() {
			self.fire(build);
		}
	}

	/// Persists the duration of the last environment update.
	pub async fn record_update_duration(&self, build: &mut Build, duration: Duration) {
		build.update_duration = Duration::seconds(duration.whole_seconds());
		build.updated_at = now();
		self.persist(build).await;
	}

	/// Persists a build that has been reset for a retry together with its
	/// new project snapshot.
	pub async fn record_retry(&self, build: &Build) {
		if let Err(error) = self.store.update_snapshot(build).await {
			error!(build = %build.id, %error, "failed to persist build");
		}
	}

	async fn persist(&self, build: &Build) {
		if let Err(error) = self.store.update_state(build).await {
			error!(build = %build.id, %error, "failed to persist build");
		}
	}

	fn fire(&self, build: &Build) {
		if !build.deploy {
			return;
		}
		if build.state.has_artifact() {
			self.effects.enqueue(Effect::Deploy(build.clone()));
		} else {
			self.effects.enqueue(Effect::NotifyFailure(build.clone()));
		}
	}
}
