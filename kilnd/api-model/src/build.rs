use kiln_common_model::build::BuildState;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Timestamps are UNIX seconds, durations whole seconds.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct ApiBuildInfo {
	pub id: Uuid,
	pub project: String,
	pub target: String,
	pub revision: String,
	pub state: BuildState,
	pub created_at: i64,
	pub started_at: Option<i64>,
	pub updated_at: i64,
	pub elapsed: i64,
	pub update_duration: i64,
	pub short_commit: String,
	pub deploy: bool,
	pub downloadable: bool,
	pub deployable: bool,
	pub retryable: bool,
}

/// Body of `POST /builds`.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct ApiBuildRequest {
	pub project: String,
	/// A target key, or `all`.
	#[serde(default = "default_target")]
	pub target: String,
	pub revision: String,
	#[serde(default)]
	pub deploy: bool,
}

fn default_target() -> String {
	"all".to_string()
}
