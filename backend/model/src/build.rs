use std::path::{Path, PathBuf};

use kiln_common_model::build::BuildState;
use kstring::KString;
use time::{Duration, OffsetDateTime, macros::format_description};
use uuid::Uuid;

use crate::{project::Project, template::Placeholders};

pub type BuildId = Uuid;

/// Revision requesting an environment refresh only.
///
/// Builds of this revision update the fallback image and never run the
/// build instructions.
pub const REFRESH_REVISION: &str = "@refresh";

/// Target requesting one build per configured target.
pub const ALL_TARGETS: &str = "all";

/// How a build treats its build environment, derived from its revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RevisionKind {
	/// The primary branch: refresh the environment, then build.
	Primary,
	/// The refresh sentinel: refresh the fallback environment only.
	Refresh,
	/// Anything else, e.g. a patchset: build on the fallback environment.
	Review,
}

/// One attempt to produce an artifact for a (project, target, revision).
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Build {
	pub id: BuildId,
	/// Project snapshot taken at creation time.
	pub project: Project,
	pub target: KString,
	pub revision: String,
	pub state: BuildState,
	pub created_at: OffsetDateTime,
	/// Execution start, stamped when the build phase begins.
	pub started_at: Option<OffsetDateTime>,
	pub updated_at: OffsetDateTime,
	/// Wall-clock duration of the last environment update.
	pub update_duration: Duration,
	/// Short source revision used to version artifacts.
	pub short_commit: String,
	/// Whether the artifact should be deployed once built.
	pub deploy: bool,
}

impl Build {
	pub fn new(
		project: Project,
		target: KString,
		revision: String,
		short_commit: String,
		deploy: bool,
	) -> Self {
		let now = now();
		Self {
			id: Uuid::now_v7(),
			project,
			target,
			revision,
			state: BuildState::Created,
			created_at: now,
			started_at: None,
			updated_at: now,
			update_duration: Duration::ZERO,
			short_commit,
			deploy,
		}
	}

	pub fn revision_kind(&self) -> RevisionKind {
		if self.revision == REFRESH_REVISION {
			RevisionKind::Refresh
		} else if self.is_primary() {
			RevisionKind::Primary
		} else {
			RevisionKind::Review
		}
	}

	pub fn is_refresh_only(&self) -> bool {
		self.revision == REFRESH_REVISION
	}

	pub fn is_primary(&self) -> bool {
		self.revision == self.project.config.primary_branch.as_str()
	}

	pub fn is_downloadable(&self) -> bool {
		self.state.has_artifact() && !self.is_refresh_only()
	}

	pub fn is_deployable(&self) -> bool {
		self.is_downloadable() && self.is_primary()
	}

	pub fn is_retryable(&self) -> bool {
		self.state == BuildState::Fail && !self.is_primary()
	}

	/// Execution time in whole seconds.
	///
	/// Running builds are measured up to `now`, terminated ones up to their
	/// last update.
	pub fn elapsed(&self, now: OffsetDateTime) -> Duration {
		let Some(started_at) = self.started_at else {
			return Duration::ZERO;
		};
		let end = if self.state.is_running() {
			now
		} else {
			self.updated_at
		};
		let elapsed = end - started_at;
		if elapsed.is_negative() {
			Duration::ZERO
		} else {
			Duration::seconds(elapsed.as_seconds_f64().round() as i64)
		}
	}

	/// Output directory of this build below `root`.
	pub fn output_dir(&self, root: &Path) -> PathBuf {
		root.join(self.project.name.as_str())
			.join(self.created_at.unix_timestamp().to_string())
			.join(self.target.as_str())
	}

	/// Version string of artifacts produced by this build.
	pub fn release_number(&self) -> String {
		let stamp = self
			.created_at
			.format(format_description!("[year][month][day][hour][minute]00"))
			.unwrap_or_else(|_| self.created_at.unix_timestamp().to_string());
		format!("{}~git{}", stamp, self.short_commit)
	}

	/// Resolves the build instructions of this build's target.
	pub fn build_command(&self) -> Option<String> {
		let command = self.project.config.build_command(&self.target)?;
		let release = self.release_number();
		Some(
			Placeholders {
				ref_number: &self.revision,
				release_number: &release,
			}
			.resolve(&command),
		)
	}

	/// Puts the build back at [`BuildState::Created`] with a fresh snapshot.
	pub fn reset_for_retry(&mut self, project: Project) {
		self.project = project;
		self.state = BuildState::Created;
		self.started_at = None;
		self.update_duration = Duration::ZERO;
		self.updated_at = now();
	}
}

/// Current UTC time truncated to whole seconds.
///
/// Truncation keeps timestamps stable across database round-trips.
pub fn now() -> OffsetDateTime {
	let now = OffsetDateTime::now_utc();
	now.replace_nanosecond(0).unwrap_or(now)
}
