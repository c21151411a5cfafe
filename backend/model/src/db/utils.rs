//! SQL types shared by PostgreSQL and SQLite.

use std::{fmt::Display, ops::Deref};

use diesel::{
	deserialize::{self, FromSql, FromSqlRow},
	expression::AsExpression,
	pg::{Pg, PgValue},
	query_builder::QueryId,
	serialize::{self, IsNull, Output, ToSql},
	sql_types::{Binary, Jsonb, SqlType, VarChar},
	sqlite::{Sqlite, SqliteValue},
};
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};
use uuid::Uuid;

/// UUID column, native on PostgreSQL and a 16-byte blob on SQLite.
#[derive(Debug, Clone, Copy, Default, QueryId, SqlType)]
#[diesel(postgres_type(oid = 2950, array_oid = 2951))]
#[diesel(sqlite_type(name = "Binary"))]
pub struct XUuid;

#[derive(Debug, AsExpression, FromSqlRow, Clone, Copy, PartialEq, Eq)]
#[diesel(sql_type = XUuid)]
pub struct XUuidVal(pub Uuid);

impl Deref for XUuidVal {
	type Target = Uuid;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

impl FromSql<XUuid, Pg> for XUuidVal {
	fn from_sql(value: PgValue<'_>) -> deserialize::Result<Self> {
		Ok(XUuidVal(Uuid::from_slice(value.as_bytes())?))
	}
}

impl ToSql<XUuid, Pg> for XUuidVal {
	fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
		<Uuid as ToSql<diesel::sql_types::Uuid, Pg>>::to_sql(&self.0, out)
	}
}

impl FromSql<XUuid, Sqlite> for XUuidVal {
	fn from_sql(value: SqliteValue<'_, '_, '_>) -> deserialize::Result<Self> {
		let value = <Vec<u8> as FromSql<Binary, Sqlite>>::from_sql(value)?;
		Ok(XUuidVal(Uuid::from_slice(value.as_slice())?))
	}
}

impl ToSql<XUuid, Sqlite> for XUuidVal {
	fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Sqlite>) -> serialize::Result {
		<[u8; 16] as ToSql<Binary, Sqlite>>::to_sql(self.0.as_bytes(), out)
	}
}

impl Display for XUuidVal {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		Display::fmt(&self.0, f)
	}
}

/// JSON column, `JSONB` on PostgreSQL and text on SQLite.
#[derive(Debug, Clone, Copy, Default, QueryId, SqlType)]
#[diesel(postgres_type(oid = 3802, array_oid = 3807))]
#[diesel(sqlite_type(name = "Text"))]
pub struct XJson;

#[derive(Debug, AsExpression, FromSqlRow, Clone, PartialEq, Eq)]
#[diesel(sql_type = XJson)]
pub struct XJsonVal(pub serde_json::Value);

impl Deref for XJsonVal {
	type Target = serde_json::Value;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

impl FromSql<XJson, Pg> for XJsonVal {
	fn from_sql(value: PgValue<'_>) -> deserialize::Result<Self> {
		Ok(XJsonVal(
			<serde_json::Value as FromSql<Jsonb, Pg>>::from_sql(value)?,
		))
	}
}

impl ToSql<XJson, Pg> for XJsonVal {
	fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
		<serde_json::Value as ToSql<Jsonb, Pg>>::to_sql(&self.0, out)
	}
}

impl FromSql<XJson, Sqlite> for XJsonVal {
	fn from_sql(value: SqliteValue<'_, '_, '_>) -> deserialize::Result<Self> {
		let value = <String as FromSql<VarChar, Sqlite>>::from_sql(value)?;
		Ok(XJsonVal(serde_json::from_str(&value)?))
	}
}

impl ToSql<XJson, Sqlite> for XJsonVal {
	fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Sqlite>) -> serialize::Result {
		out.set_value(serde_json::to_string(&self.0)?);
		Ok(IsNull::No)
	}
}

/// Drops the offset of a timestamp for storage in a `TIMESTAMP` column.
///
/// Timestamps are always stored as UTC.
pub fn to_sql_time(time: OffsetDateTime) -> PrimitiveDateTime {
	let time = time.to_offset(UtcOffset::UTC);
	PrimitiveDateTime::new(time.date(), time.time())
}

/// Inverse of [`to_sql_time`].
pub fn from_sql_time(time: PrimitiveDateTime) -> OffsetDateTime {
	time.assume_utc()
}
