use diesel::{Insertable, Queryable};
use kiln_common_model::build::BuildState;
use time::{Duration, PrimitiveDateTime};

use super::{
	schema::build,
	utils::{XJsonVal, XUuidVal, from_sql_time, to_sql_time},
};
use crate::build::Build;

/// A row of the `build` table.
///
/// Fields follow the column order of [`build`].
#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = build)]
pub struct SqlBuild {
	pub id: XUuidVal,
	pub project: String,
	pub snapshot: XJsonVal,
	pub target: String,
	pub revision: String,
	pub state: i16,
	pub created_at: PrimitiveDateTime,
	pub started_at: Option<PrimitiveDateTime>,
	pub updated_at: PrimitiveDateTime,
	pub update_duration: i64,
	pub short_commit: String,
	pub deploy: bool,
}

impl SqlBuild {
	pub fn from_build(build: &Build) -> serde_json::Result<Self> {
		Ok(Self {
			id: XUuidVal(build.id),
			project: build.project.name.to_string(),
			snapshot: XJsonVal(serde_json::to_value(&build.project)?),
			target: build.target.to_string(),
			revision: build.revision.clone(),
			state: build.state as i16,
			created_at: to_sql_time(build.created_at),
			started_at: build.started_at.map(to_sql_time),
			updated_at: to_sql_time(build.updated_at),
			update_duration: build.update_duration.whole_seconds(),
			short_commit: build.short_commit.clone(),
			deploy: build.deploy,
		})
	}

	pub fn into_build(self) -> serde_json::Result<Build> {
		Ok(Build {
			id: self.id.0,
			project: serde_json::from_value(self.snapshot.0)?,
			target: self.target.into(),
			revision: self.revision,
			state: BuildState::from(self.state),
			created_at: from_sql_time(self.created_at),
			started_at: self.started_at.map(from_sql_time),
			updated_at: from_sql_time(self.updated_at),
			update_duration: Duration::seconds(self.update_duration),
			short_commit: self.short_commit,
			deploy: self.deploy,
		})
	}
}
