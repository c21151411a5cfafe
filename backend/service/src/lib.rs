//! Kiln backend services.

use std::sync::Arc;

use config::BackendConfig;
use database::{DatabaseError, DatabaseService};
use hooks::{Deployer, EffectQueue, HookError, LogNotifier, Notifier, ScriptDeployer};
use project::{ProjectError, ProjectService};
use recorder::TransitionRecorder;
use store::{BuildStore, SqlBuildStore, StoreError};
use thiserror::Error;

pub mod config;
pub mod database;
pub mod hooks;
pub mod project;
pub mod recorder;
pub mod store;

/// Service container for Kiln backends.
///
/// All services are wrapped with [`Arc`].
#[derive(Debug, Clone)]
pub struct BackendServices {
	pub config: Arc<BackendConfig>,
	pub database: Arc<DatabaseService>,
	pub store: Arc<dyn BuildStore>,
	pub projects: Arc<ProjectService>,
	pub recorder: Arc<TransitionRecorder>,
}

impl BackendServices {
	/// Builds the services with the default deployer and notifier.
	pub async fn new(config: BackendConfig) -> Result<Self> {
		let projects = Arc::new(ProjectService::new(&config.paths));
		let deployer = Arc::new(ScriptDeployer::new(
			projects.clone(),
			config.paths.output.clone(),
		));
		Self::with_hooks(config, projects, deployer, Arc::new(LogNotifier)).await
	}

	#[tracing::instrument(skip_all)]
	pub async fn with_hooks(
		config: BackendConfig,
		projects: Arc<ProjectService>,
		deployer: Arc<dyn Deployer>,
		notifier: Arc<dyn Notifier>,
	) -> Result<Self> {
		let config = Arc::new(config);
		let database = Arc::new(DatabaseService::new(&config.database).await?);
		let store: Arc<dyn BuildStore> = Arc::new(SqlBuildStore::new(database.clone()));
		let effects = EffectQueue::start(deployer, notifier);
		let recorder = Arc::new(TransitionRecorder::new(store.clone(), effects));

		Ok(Self {
			config,
			database,
			store,
			projects,
			recorder,
		})
	}
}

/// Backend errors.
#[derive(Debug, Error)]
pub enum BackendError {
	#[error("JSON error: {0}")]
	JsonError(#[from] serde_json::Error),
	#[error(transparent)]
	DatabaseError(#[from] DatabaseError),
	#[error(transparent)]
	StoreError(#[from] StoreError),
	#[error(transparent)]
	ProjectError(#[from] ProjectError),
	#[error(transparent)]
	HookError(#[from] HookError),
}

/// A specialized [`Result`] for backend errors.
pub type Result<T, E = BackendError> = std::result::Result<T, E>;

impl From<diesel::result::Error> for BackendError {
	fn from(value: diesel::result::Error) -> Self {
		Self::DatabaseError(DatabaseError::QueryError(value))
	}
}
