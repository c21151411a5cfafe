use anyhow::bail;
use kiln_backend_service::{
	config::{BackendConfig, PathsConfig},
	database::DatabaseConfig,
};
use kiln_runner::config::RunnerConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Eq, Clone, Hash, Deserialize, Serialize)]
pub struct KilndConfig {
	pub http: HttpConfig,
	pub database: DatabaseConfig,
	pub paths: PathsConfig,
	#[serde(default)]
	pub runner: RunnerConfig,
}

impl TryFrom<KilndConfig> for BackendConfig {
	type Error = anyhow::Error;

	fn try_from(config: KilndConfig) -> Result<Self, Self::Error> {
		if config.runner.max_concurrent_builds == 0 {
			bail!("runner.max-concurrent-builds must be at least 1");
		}
		if config.paths.projects.as_os_str().is_empty() || config.paths.output.as_os_str().is_empty()
		{
			bail!("paths.projects and paths.output must be set");
		}
		Ok(BackendConfig {
			database: config.database,
			paths: config.paths,
		})
	}
}

#[derive(Debug, PartialEq, Eq, Clone, Hash, Deserialize, Serialize)]
pub struct HttpConfig {
	/// Address for the web server to listen on.
	///
	/// Examples:
	/// - `unix://kilnd.socket`
	/// - `tcp://127.0.0.1:8000`
	pub listen: String,
}
