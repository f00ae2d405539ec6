use river_protocol::{Address, Hash, StreamId, SyncCookie};

use std::{path::Path, str::FromStr};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{
	sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow},
	Row,
};
use tracing::{debug, info};

use super::{Error, StoredSyncCookie, SyncCookieStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieStoreConfig {
	/// sqlite connection url, the database file is created when missing.
	pub url: String,
	pub max_connections: u32,
}

impl Default for CookieStoreConfig {
	fn default() -> Self {
		Self {
			url: "sqlite://river-sync-cookies.db".to_string(),
			max_connections: 10,
		}
	}
}

/// [`SyncCookieStore`] backed by a sqlite database.
#[derive(Debug, Clone)]
pub struct SqliteSyncCookieStore {
	pool: SqlitePool,
}

impl SqliteSyncCookieStore {
	pub async fn connect(config: &CookieStoreConfig) -> Result<Self, Error> {
		let options = SqliteConnectOptions::from_str(&config.url)?.create_if_missing(true);

		let pool = SqlitePoolOptions::new()
			.max_connections(config.max_connections.max(1))
			.connect_with(options)
			.await?;

		Self::migrate(pool, &config.url).await
	}

	pub async fn new(path: impl AsRef<Path>) -> Result<Self, Error> {
		let path = path.as_ref();
		let options = SqliteConnectOptions::new()
			.filename(path)
			.create_if_missing(true);

		let pool = SqlitePoolOptions::new()
			.max_connections(CookieStoreConfig::default().max_connections)
			.connect_with(options)
			.await?;

		Self::migrate(pool, &path.display().to_string()).await
	}

	/// Every in-memory sqlite connection is its own database, so the pool is pinned to a single
	/// connection that is never recycled.
	pub async fn new_in_memory() -> Result<Self, Error> {
		let pool = SqlitePoolOptions::new()
			.max_connections(1)
			.min_connections(1)
			.idle_timeout(None)
			.max_lifetime(None)
			.connect("sqlite::memory:")
			.await?;

		Self::migrate(pool, "sqlite::memory:").await
	}

	async fn migrate(pool: SqlitePool, location: &str) -> Result<Self, Error> {
		sqlx::migrate!("./migrations").run(&pool).await?;

		info!(%location, "Sync cookie store ready;");

		Ok(Self { pool })
	}
}

fn now_ms() -> i64 {
	Utc::now().timestamp_millis()
}

fn decode_row(row: &SqliteRow) -> Result<StoredSyncCookie, Error> {
	let stream_id = row.try_get::<Vec<u8>, _>("stream_id")?;
	let node_address = row.try_get::<Vec<u8>, _>("node_address")?;
	let prev_miniblock_hash = row.try_get::<Vec<u8>, _>("prev_miniblock_hash")?;
	let updated_at = row.try_get::<i64, _>("updated_at")?;

	Ok(StoredSyncCookie {
		cookie: SyncCookie {
			node_address: Address::from_slice(&node_address).map_err(|source| {
				Error::CorruptRow {
					column: "node_address",
					source,
				}
			})?,
			stream_id: StreamId::from_bytes(&stream_id).map_err(|source| Error::CorruptRow {
				column: "stream_id",
				source,
			})?,
			minipool_gen: row.try_get("minipool_gen")?,
			prev_miniblock_hash: Hash::from_slice(&prev_miniblock_hash).map_err(|source| {
				Error::CorruptRow {
					column: "prev_miniblock_hash",
					source,
				}
			})?,
		},
		updated_at: DateTime::from_timestamp_millis(updated_at).unwrap_or_default(),
	})
}

#[async_trait]
impl SyncCookieStore for SqliteSyncCookieStore {
	async fn get_sync_cookie(
		&self,
		stream_id: &StreamId,
	) -> Result<(Option<SyncCookie>, Option<DateTime<Utc>>), Error> {
		let row = sqlx::query(
			"SELECT stream_id, node_address, minipool_gen, prev_miniblock_hash, updated_at
			FROM sync_cookies WHERE stream_id = ?",
		)
		.bind(stream_id.as_bytes())
		.fetch_optional(&self.pool)
		.await?;

		row.as_ref().map(decode_row).transpose().map(|stored| {
			stored.map_or((None, None), |StoredSyncCookie { cookie, updated_at }| {
				(Some(cookie), Some(updated_at))
			})
		})
	}

	async fn write_sync_cookie(
		&self,
		stream_id: &StreamId,
		cookie: &SyncCookie,
	) -> Result<(), Error> {
		sqlx::query(
			"INSERT INTO sync_cookies
				(stream_id, node_address, minipool_gen, prev_miniblock_hash, updated_at)
			VALUES (?, ?, ?, ?, ?)
			ON CONFLICT(stream_id) DO UPDATE SET
				node_address = excluded.node_address,
				minipool_gen = excluded.minipool_gen,
				prev_miniblock_hash = excluded.prev_miniblock_hash,
				updated_at = excluded.updated_at",
		)
		.bind(stream_id.as_bytes())
		.bind(cookie.node_address.as_bytes().as_slice())
		.bind(cookie.minipool_gen)
		.bind(cookie.prev_miniblock_hash.as_bytes().as_slice())
		.bind(now_ms())
		.execute(&self.pool)
		.await?;

		debug!(%stream_id, minipool_gen = cookie.minipool_gen, "Wrote sync cookie;");

		Ok(())
	}

	async fn delete_stream_cookie(&self, stream_id: &StreamId) -> Result<(), Error> {
		sqlx::query("DELETE FROM sync_cookies WHERE stream_id = ?")
			.bind(stream_id.as_bytes())
			.execute(&self.pool)
			.await?;

		Ok(())
	}

	async fn get_all_stream_cookies(&self) -> Result<Vec<StoredSyncCookie>, Error> {
		sqlx::query(
			"SELECT stream_id, node_address, minipool_gen, prev_miniblock_hash, updated_at
			FROM sync_cookies",
		)
		.fetch_all(&self.pool)
		.await?
		.iter()
		.map(decode_row)
		.collect()
	}
}
