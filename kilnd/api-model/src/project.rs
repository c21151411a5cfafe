use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct ApiProjectInfo {
	pub name: String,
	pub build_type: String,
	pub targets: Vec<String>,
	pub primary_branch: String,
	pub deploy_script: Option<String>,
}
