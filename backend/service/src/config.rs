use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::database::DatabaseConfig;

#[derive(Debug, PartialEq, Eq, Clone, Hash, Deserialize, Serialize)]
pub struct BackendConfig {
	pub database: DatabaseConfig,
	pub paths: PathsConfig,
}

#[derive(Debug, PartialEq, Eq, Clone, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PathsConfig {
	/// Directory holding one source tree per project.
	pub projects: PathBuf,
	/// Root of the build output directories.
	pub output: PathBuf,
}
