use river_protocol::ErrorCode;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
	#[error("sync cookie store query failed: {0}")]
	Database(#[from] sqlx::Error),
	#[error("sync cookie store migration failed: {0}")]
	Migration(#[from] sqlx::migrate::MigrateError),
	#[error("corrupt sync cookie row <column='{column}'>: {source}")]
	CorruptRow {
		column: &'static str,
		source: river_protocol::Error,
	},
}

impl Error {
	#[must_use]
	pub const fn code(&self) -> ErrorCode {
		ErrorCode::DbOperationFailure
	}
}
