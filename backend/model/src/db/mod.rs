use diesel::{
	QueryResult, RunQueryDsl, SqliteConnection,
	connection::{AnsiTransactionManager, SimpleConnection, TransactionManager},
	migration::MigrationVersion,
	query_builder::AsQuery,
	query_dsl::methods::{ExecuteDsl, LoadQuery},
};
use diesel_async::{
	AsyncPgConnection, RunQueryDsl as AsyncRunQueryDsl, SimpleAsyncConnection,
	async_connection_wrapper::AsyncConnectionWrapper,
	methods::{ExecuteDsl as AsyncExecuteDsl, LoadQuery as AsyncLoadQuery},
	pooled_connection::PoolableConnection,
};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use futures::future::{BoxFuture, FutureExt, ready};

pub mod build;
pub mod schema;
pub mod utils;

/// A connection to either supported database.
///
/// PostgreSQL queries run asynchronously, SQLite queries complete before the
/// returned future is polled.
pub enum BoxedSqlConn {
	Pg(AsyncPgConnection),
	Sqlite(SqliteConnection),
}

impl BoxedSqlConn {
	/// Executes `SELECT 1` to test if the connection is ready for use.
	pub fn ping(&mut self) -> BoxFuture<Result<(), diesel::result::Error>> {
		match self {
			BoxedSqlConn::Pg(conn) => conn.batch_execute("SELECT 1").boxed(),
			BoxedSqlConn::Sqlite(conn) => ready(conn.batch_execute("SELECT 1")).boxed(),
		}
	}

	pub fn is_broken(&mut self) -> bool {
		match self {
			BoxedSqlConn::Pg(conn) => conn.is_broken(),
			BoxedSqlConn::Sqlite(conn) => {
				AnsiTransactionManager::is_broken_transaction_manager(conn)
			}
		}
	}
}

impl<'query> BoxedSqlConn {
	/// Executes the given command, returning the number of rows affected.
	///
	/// Dispatches [RunQueryDsl::execute].
	pub fn execute<Q>(&mut self, query: Q) -> BoxFuture<'query, QueryResult<usize>>
	where
		Q: AsQuery,
		Q: AsyncExecuteDsl<AsyncPgConnection> + 'query,
		Q: ExecuteDsl<SqliteConnection>,
	{
		match self {
			BoxedSqlConn::Pg(conn) => AsyncExecuteDsl::execute(query, conn),
			BoxedSqlConn::Sqlite(conn) => ready(ExecuteDsl::execute(query, conn)).boxed(),
		}
	}

	/// Executes the given query, returning a [`Vec`] with the returned rows.
	///
	/// Dispatches [RunQueryDsl::load].
	pub fn load<'conn, Q, U>(&'conn mut self, query: Q) -> BoxFuture<'query, QueryResult<Vec<U>>>
	where
		Q: Send,
		Q: AsyncLoadQuery<'query, AsyncPgConnection, U> + 'query,
		Q: LoadQuery<'query, SqliteConnection, U>,
		U: Send + 'query,
		'conn: 'query,
	{
		match self {
			BoxedSqlConn::Pg(conn) => AsyncRunQueryDsl::load(query, conn).boxed(),
			BoxedSqlConn::Sqlite(conn) => ready(RunQueryDsl::load(query, conn)).boxed(),
		}
	}

	/// Runs the query, and returns the first row.
	///
	/// `Err(NotFound)` is returned when no row matches, call `.optional()`
	/// to get a `Result<Option<U>>`.
	///
	/// Dispatches [RunQueryDsl::get_result].
	pub fn get_result<Q, U>(&'query mut self, query: Q) -> BoxFuture<'query, QueryResult<U>>
	where
		Q: AsQuery + Send,
		Q: AsyncLoadQuery<'query, AsyncPgConnection, U> + 'query,
		Q: LoadQuery<'query, SqliteConnection, U>,
		U: Send + 'query,
	{
		match self {
			BoxedSqlConn::Pg(conn) => AsyncRunQueryDsl::get_result(query, conn).boxed(),
			BoxedSqlConn::Sqlite(conn) => ready(RunQueryDsl::get_result(query, conn)).boxed(),
		}
	}
}

const POSTGRESQL_MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/postgresql");
const SQLITE_MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/sqlite");

/// Run all pending migrations.
///
/// This is not async, so a spawn-blocking wrapper is required.
///
/// Dispatches [MigrationHarness::run_pending_migrations].
pub fn run_migrations(
	mut conn: BoxedSqlConn,
) -> diesel::migration::Result<Vec<MigrationVersion<'static>>> {
	match conn {
		BoxedSqlConn::Pg(conn) => {
			let mut async_wrapper: AsyncConnectionWrapper<AsyncPgConnection> =
				AsyncConnectionWrapper::from(conn);
			async_wrapper
				.run_pending_migrations(POSTGRESQL_MIGRATIONS)
				.map(owned_versions)
		}
		BoxedSqlConn::Sqlite(_) => run_migrations_in_place(&mut conn),
	}
}

/// Run migrations on a SQLite connection without taking it over.
///
/// In-memory databases only live as long as their connection, so they are
/// migrated on the pooled connection itself. PostgreSQL connections are
/// left untouched.
pub fn run_migrations_in_place(
	conn: &mut BoxedSqlConn,
) -> diesel::migration::Result<Vec<MigrationVersion<'static>>> {
	match conn {
		BoxedSqlConn::Pg(_) => Ok(Vec::new()),
		BoxedSqlConn::Sqlite(conn) => conn
			.run_pending_migrations(SQLITE_MIGRATIONS)
			.map(owned_versions),
	}
}

fn owned_versions(versions: Vec<MigrationVersion<'_>>) -> Vec<MigrationVersion<'static>> {
	versions
		.into_iter()
		.map(|version| version.as_owned())
		.collect()
}
