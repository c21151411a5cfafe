use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Eq, Clone, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunnerConfig {
	/// Number of builds executed at the same time.
	#[serde(default = "default_max_concurrent_builds")]
	pub max_concurrent_builds: usize,
	/// Prefix of the build environment image repositories.
	#[serde(default = "default_image_prefix")]
	pub image_prefix: String,
	/// Maximum run time of a container, in seconds.
	#[serde(default = "default_wait_timeout")]
	pub wait_timeout: u64,
	/// Path to the Docker daemon socket, the local default if unset.
	#[serde(default)]
	pub docker_socket: Option<String>,
}

impl RunnerConfig {
	pub fn wait_timeout(&self) -> Duration {
		Duration::from_secs(self.wait_timeout)
	}
}

impl Default for RunnerConfig {
	fn default() -> Self {
		Self {
			max_concurrent_builds: default_max_concurrent_builds(),
			image_prefix: default_image_prefix(),
			wait_timeout: default_wait_timeout(),
			docker_socket: None,
		}
	}
}

fn default_max_concurrent_builds() -> usize {
	2
}

fn default_image_prefix() -> String {
	"kiln".to_string()
}

fn default_wait_timeout() -> u64 {
	4 * 60 * 60
}
