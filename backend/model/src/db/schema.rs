diesel::table! {
	use crate::db::utils::*;
	use diesel::sql_types::*;

	build (id) {
		/// Unique identifier of this build.
		///
		/// A UUID v7, of which timestamp is the creation time.
		id -> XUuid,
		/// Name of the project, duplicated out of `snapshot` for lookups.
		project -> VarChar,
		/// Project name and configuration as of creation.
		snapshot -> XJson,
		target -> VarChar,
		revision -> VarChar,
		/// [`BuildState`](kiln_common_model::build::BuildState) discriminant.
		state -> Int2,
		created_at -> Timestamp,
		started_at -> Nullable<Timestamp>,
		updated_at -> Timestamp,
		/// Duration of the last environment update in seconds.
		update_duration -> BigInt,
		short_commit -> VarChar,
		deploy -> Bool,
	}
}
