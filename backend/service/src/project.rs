//! Project configuration provider.
//!
//! Every directory below the projects root holding a `.kiln.json`
//! descriptor is a project, named after its directory.

use std::{
	collections::BTreeMap,
	path::{Path, PathBuf},
	sync::RwLock,
};

use kiln_backend_model::project::{Project, ProjectConfig};
use kstring::KString;
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::PathsConfig;

pub const DESCRIPTOR_FILE: &str = ".kiln.json";

#[derive(Debug)]
pub struct ProjectService {
	root: PathBuf,
	cache: RwLock<BTreeMap<KString, Project>>,
}

impl ProjectService {
	pub fn new(config: &PathsConfig) -> Self {
		Self {
			root: config.projects.clone(),
			cache: RwLock::new(BTreeMap::new()),
		}
	}

	/// Source tree of a project.
	pub fn source_dir(&self, name: &str) -> PathBuf {
		self.root.join(name)
	}

	/// Returns a project, reading its descriptor if it is not cached yet.
	pub async fn get(&self, name: &str) -> Result<Project, ProjectError> {
		if let Some(project) = self.cached(name) {
			return Ok(project);
		}
		let project = self.load(name).await?;
		self.store(project.clone());
		Ok(project)
	}

	/// Scans the projects root and returns every valid project.
	///
	/// Directories with a broken descriptor are skipped.
	pub async fn list(&self) -> Result<Vec<Project>, ProjectError> {
		let mut entries = tokio::fs::read_dir(&self.root).await?;
		let mut projects = vec![];
		while let Some(entry) = entries.next_entry().await? {
			if !entry.file_type().await?.is_dir() {
				continue;
			}
			let Some(name) = entry.file_name().to_str().map(str::to_string) else {
				continue;
			};
			if !tokio::fs::try_exists(entry.path().join(DESCRIPTOR_FILE)).await? {
				continue;
			}
			match self.load(&name).await {
				Ok(project) => {
					self.store(project.clone());
					projects.push(project);
				}
				Err(error) => warn!(project = %name, %error, "skipping project"),
			}
		}
		projects.sort_by(|a, b| a.name.cmp(&b.name));
		Ok(projects)
	}

	/// Runs the reload commands of a project in its source tree, then
	/// re-reads its descriptor.
	///
	/// Failing reload commands are logged, a broken descriptor is an error.
	#[tracing::instrument(skip(self))]
	pub async fn reload(&self, name: &str) -> Result<Project, ProjectError> {
		let current = self.get(name).await?;
		let dir = self.source_dir(name);
		for command in &current.config.reload_commands {
			let status = Command::new("sh")
				.arg("-c")
				.arg(command)
				.current_dir(&dir)
				.status()
				.await;
			match status {
				Ok(status) if status.success() => {}
				Ok(status) => warn!(%command, %status, "reload command failed"),
				Err(error) => warn!(%command, %error, "reload command failed to start"),
			}
		}
		let project = self.load(name).await?;
		info!("project reloaded");
		self.store(project.clone());
		Ok(project)
	}

	/// Resolves the short commit id at the head of the primary branch.
	pub async fn head_commit(&self, project: &Project) -> Result<String, ProjectError> {
		let git_dir = self.source_dir(&project.name).join(".git");
		let output = Command::new("git")
			.arg(format!("--git-dir={}", git_dir.display()))
			.arg("rev-parse")
			.arg("--short=7")
			.arg(format!("origin/{}", project.config.primary_branch))
			.output()
			.await?;
		if !output.status.success() {
			return Err(ProjectError::Git(
				String::from_utf8_lossy(&output.stderr).trim().to_string(),
			));
		}
		Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
	}

	fn cached(&self, name: &str) -> Option<Project> {
		let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
		cache.get(name).cloned()
	}

	fn store(&self, project: Project) {
		let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
		cache.insert(project.name.clone(), project);
	}

	async fn load(&self, name: &str) -> Result<Project, ProjectError> {
		if !is_project_name(name) {
			return Err(ProjectError::NotFound(name.to_string()));
		}
		let path = descriptor_path(&self.source_dir(name));
		let data = match tokio::fs::read(&path).await {
			Ok(data) => data,
			Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
				return Err(ProjectError::NotFound(name.to_string()));
			}
			Err(error) => return Err(error.into()),
		};
		let config: ProjectConfig =
			serde_json::from_slice(&data).map_err(|source| ProjectError::Descriptor {
				name: name.to_string(),
				source,
			})?;
		Ok(Project {
			name: KString::from_ref(name),
			config,
		})
	}
}

fn descriptor_path(dir: &Path) -> PathBuf {
	dir.join(DESCRIPTOR_FILE)
}

/// Project names are plain directory names.
fn is_project_name(name: &str) -> bool {
	!name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

#[derive(Debug, Error)]
pub enum ProjectError {
	#[error("project {0} not found")]
	NotFound(String),
	#[error("invalid descriptor of project {name}: {source}")]
	Descriptor {
		name: String,
		source: serde_json::Error,
	},
	#[error("failed to resolve head commit: {0}")]
	Git(String),
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}
