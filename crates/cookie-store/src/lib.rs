//!
//! # River Cookie Store
//!
//! Keeps the last processed sync cookie of every tracked stream, so a restarted tracker can
//! tell which content it may have missed while it was down.
//!
//! [`SqliteSyncCookieStore`] is the bundled backend, other backends only need to implement
//! [`SyncCookieStore`].
//!

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

use river_protocol::{StreamId, SyncCookie};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

mod error;
mod sqlite;

pub use error::Error;
pub use sqlite::{CookieStoreConfig, SqliteSyncCookieStore};

/// A persisted cookie together with the time it was last written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSyncCookie {
	pub cookie: SyncCookie,
	pub updated_at: DateTime<Utc>,
}

/// Storage for per stream resumption points. At most one cookie is kept per stream.
#[async_trait]
pub trait SyncCookieStore: Send + Sync + 'static {
	/// Returns `(None, None)` when nothing was ever written for `stream_id`.
	async fn get_sync_cookie(
		&self,
		stream_id: &StreamId,
	) -> Result<(Option<SyncCookie>, Option<DateTime<Utc>>), Error>;

	/// Inserts or replaces the cookie of `stream_id`, stamping it with the current time.
	async fn write_sync_cookie(&self, stream_id: &StreamId, cookie: &SyncCookie)
		-> Result<(), Error>;

	/// Removing a stream without a cookie is not an error.
	async fn delete_stream_cookie(&self, stream_id: &StreamId) -> Result<(), Error>;

	async fn get_all_stream_cookies(&self) -> Result<Vec<StoredSyncCookie>, Error>;
}
