//! Build persistence.

use std::{fmt::Debug, sync::Arc};

use diesel::{insert_into, prelude::*, update};
use futures::{FutureExt, future::BoxFuture};
use kiln_backend_model::{
	build::{Build, BuildId, now},
	db::{
		build::SqlBuild,
		schema::build::dsl,
		utils::{XJsonVal, XUuidVal, to_sql_time},
	},
};
use kiln_common_model::build::BuildState;
use thiserror::Error;
use tracing::{info, warn};

use crate::{Result, database::DatabaseService};

/// Durable storage of builds.
///
/// Builds are never deleted.
pub trait BuildStore
where
	Self: Send + Sync + Debug,
{
	fn insert(&self, build: &Build) -> BoxFuture<'_, Result<()>>;
	/// Persists the lifecycle fields: state, timestamps and update duration.
	fn update_state(&self, build: &Build) -> BoxFuture<'_, Result<()>>;
	/// Persists the lifecycle fields together with the project snapshot.
	fn update_snapshot(&self, build: &Build) -> BoxFuture<'_, Result<()>>;
	fn find_by_id(&self, id: BuildId) -> BoxFuture<'_, Result<Option<Build>>>;
	/// Builds of a project, newest first.
	fn find_by_project(&self, project: &str) -> BoxFuture<'_, Result<Vec<Build>>>;
	/// Newest build of (project, target, revision).
	fn find_latest(
		&self,
		project: &str,
		target: &str,
		revision: &str,
	) -> BoxFuture<'_, Result<Option<Build>>>;
	/// Forces every non-terminal build to [`BuildState::Fail`], returning
	/// the number of builds affected.
	fn reconcile_non_terminal(&self) -> BoxFuture<'_, Result<usize>>;
}

/// [`BuildStore`] over the SQL database.
#[derive(Debug)]
pub struct SqlBuildStore {
	db: Arc<DatabaseService>,
}

impl SqlBuildStore {
	pub fn new(db: Arc<DatabaseService>) -> Self {
		Self { db }
	}

	async fn update_lifecycle(&self, build: &Build, snapshot: Option<XJsonVal>) -> Result<()> {
		let mut conn = self.db.get().await?;
		let target = dsl::build.filter(dsl::id.eq(XUuidVal(build.id)));
		let lifecycle = (
			dsl::state.eq(build.state as i16),
			dsl::started_at.eq(build.started_at.map(to_sql_time)),
			dsl::updated_at.eq(to_sql_time(build.updated_at)),
			dsl::update_duration.eq(build.update_duration.whole_seconds()),
		);
		let cols = match snapshot {
			Some(snapshot) => {
				conn.execute(update(target).set((lifecycle, dsl::snapshot.eq(snapshot))))
					.await?
			}
			None => conn.execute(update(target).set(lifecycle)).await?,
		};
		if cols == 0 {
			return Err(StoreError::NotFound(build.id).into());
		}
		Ok(())
	}
}

impl BuildStore for SqlBuildStore {
	fn insert(&self, build: &Build) -> BoxFuture<'_, Result<()>> {
		let row = SqlBuild::from_build(build);
		async move {
			let row = row?;
			let id = row.id;
			let mut conn = self.db.get().await?;
			conn.execute(insert_into(dsl::build).values(row)).await?;
			info!(build = %id, "inserted build");
			Ok(())
		}
		.boxed()
	}

	fn update_state(&self, build: &Build) -> BoxFuture<'_, Result<()>> {
		let build = build.clone();
		async move { self.update_lifecycle(&build, None).await }.boxed()
	}

	fn update_snapshot(&self, build: &Build) -> BoxFuture<'_, Result<()>> {
		let snapshot = serde_json::to_value(&build.project);
		let build = build.clone();
		async move {
			let snapshot = XJsonVal(snapshot?);
			self.update_lifecycle(&build, Some(snapshot)).await
		}
		.boxed()
	}

	fn find_by_id(&self, id: BuildId) -> BoxFuture<'_, Result<Option<Build>>> {
		async move {
			let mut conn = self.db.get().await?;
			let row = conn
				.get_result::<_, SqlBuild>(dsl::build.filter(dsl::id.eq(XUuidVal(id))))
				.await
				.optional()?;
			Ok(row.map(SqlBuild::into_build).transpose()?)
		}
		.boxed()
	}

	fn find_by_project(&self, project: &str) -> BoxFuture<'_, Result<Vec<Build>>> {
		let project = project.to_string();
		async move {
			let mut conn = self.db.get().await?;
			let rows = conn
				.load::<_, SqlBuild>(
					dsl::build
						.filter(dsl::project.eq(project))
						.order(dsl::id.desc()),
				)
				.await?;
			Ok(rows
				.into_iter()
				.map(SqlBuild::into_build)
				.collect::<serde_json::Result<_>>()?)
		}
		.boxed()
	}

	fn find_latest(
		&self,
		project: &str,
		target: &str,
		revision: &str,
	) -> BoxFuture<'_, Result<Option<Build>>> {
		let (project, target, revision) =
			(project.to_string(), target.to_string(), revision.to_string());
		async move {
			let mut conn = self.db.get().await?;
			// IDs are UUID v7, so this is the insertion order
			let row = conn
				.get_result::<_, SqlBuild>(
					dsl::build
						.filter(dsl::project.eq(project))
						.filter(dsl::target.eq(target))
						.filter(dsl::revision.eq(revision))
						.order(dsl::id.desc())
						.limit(1),
				)
				.await
				.optional()?;
			Ok(row.map(SqlBuild::into_build).transpose()?)
		}
		.boxed()
	}

	fn reconcile_non_terminal(&self) -> BoxFuture<'_, Result<usize>> {
		async move {
			let mut conn = self.db.get().await?;
			let cols = conn
				.execute(
					update(dsl::build)
						.filter(dsl::state.lt(BuildState::Fail as i16))
						.set((
							dsl::state.eq(BuildState::Fail as i16),
							dsl::updated_at.eq(to_sql_time(now())),
						)),
				)
				.await?;
			if cols != 0 {
				warn!(count = cols, "interrupted builds marked as failed");
			}
			Ok(cols)
		}
		.boxed()
	}
}

#[derive(Debug, Error)]
pub enum StoreError {
	#[error("build {0} not found")]
	NotFound(BuildId),
}
