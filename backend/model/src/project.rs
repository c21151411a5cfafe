use std::collections::BTreeMap;

use kstring::KString;
use serde::{Deserialize, Serialize};

/// A project together with its configuration.
///
/// Builds keep a deep copy of this value taken when they are created, so
/// later reloads never rewrite a historical build.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct Project {
	/// Name of the project, equal to its directory name.
	pub name: KString,
	pub config: ProjectConfig,
}

/// Per-project build configuration, read from the project descriptor.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProjectConfig {
	/// Executor tag, e.g. `docker`.
	pub build_type: KString,
	/// Shell instructions building the project, keyed by target.
	#[serde(default)]
	pub build_instructions: BTreeMap<KString, Vec<String>>,
	/// Shell instructions refreshing the build environment, keyed by target.
	#[serde(default)]
	pub update_instructions: BTreeMap<KString, Vec<String>>,
	/// Name of the produced package, keyed by target.
	#[serde(default)]
	pub packages: BTreeMap<KString, String>,
	/// Address of the review system.
	#[serde(default)]
	pub review_address: Option<String>,
	/// Deploy script, relative to the project source directory.
	#[serde(default)]
	pub deploy_script: Option<String>,
	/// Commands run in the project source directory before reloading.
	#[serde(default)]
	pub reload_commands: Vec<String>,
	/// Name of the primary branch.
	///
	/// Builds of this branch refresh the build environment.
	#[serde(default = "default_primary_branch")]
	pub primary_branch: KString,
	/// Recipient of failure notifications.
	#[serde(default)]
	pub notify: Option<NotificationAddress>,
}

fn default_primary_branch() -> KString {
	KString::from_static("master")
}

#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct NotificationAddress {
	pub name: String,
	pub address: String,
}

impl ProjectConfig {
	/// Targets this project can be built for.
	pub fn targets(&self) -> impl Iterator<Item = &KString> {
		self.build_instructions.keys()
	}

	pub fn has_target(&self, target: &str) -> bool {
		self.build_instructions.contains_key(target)
	}

	/// Build instructions for `target` as a single shell command line.
	pub fn build_command(&self, target: &str) -> Option<String> {
		join_instructions(self.build_instructions.get(target)?)
	}

	/// Update instructions for `target` as a single shell command line.
	pub fn update_command(&self, target: &str) -> Option<String> {
		join_instructions(self.update_instructions.get(target)?)
	}
}

fn join_instructions(instructions: &[String]) -> Option<String> {
	if instructions.is_empty() {
		None
	} else {
		Some(instructions.join(" && "))
	}
}
