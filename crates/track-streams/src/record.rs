use river_nodes::StreamNodes;
use river_protocol::{Address, Hash, StreamId, SyncCookie};

use std::sync::Arc;

use tokio::sync::Mutex;

use super::view::TrackedStreamView;

/// Minipool generation of a cookie asking the node for a full reset of the stream.
pub const COLD_START_MINIPOOL_GEN: i64 = i64::MAX;
pub const COLD_START_PREV_MINIBLOCK_HASH: Hash = Hash::ZERO;

/// Last position written to the cookie store, the input of gap detection after a reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PersistedPosition {
	pub snapshot_miniblock: i64,
	pub minipool_gen: i64,
}

impl PersistedPosition {
	/// A loaded cookie carries no snapshot number, its generation stands in for it.
	pub const fn from_cookie(cookie: &SyncCookie) -> Self {
		Self {
			snapshot_miniblock: cookie.minipool_gen,
			minipool_gen: cookie.minipool_gen,
		}
	}
}

/// Whether, and from which miniblock on, the content carried by a stream's first reset is
/// notified to its view instead of being taken as already seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct HistoricalContent {
	pub enabled: bool,
	/// First miniblock to notify, anything at or below the reset's snapshot notifies the whole
	/// reset.
	pub from_miniblock: i64,
}

impl HistoricalContent {
	pub const fn new(enabled: bool) -> Self {
		Self {
			enabled,
			from_miniblock: 0,
		}
	}

	pub const fn from_miniblock(from_miniblock: i64) -> Self {
		Self {
			enabled: true,
			from_miniblock,
		}
	}

	/// Index of the first reset miniblock to notify, the reset starting at `server_snapshot`.
	pub fn start_index(&self, server_snapshot: i64) -> usize {
		usize::try_from(self.from_miniblock.saturating_sub(server_snapshot)).unwrap_or(0)
	}
}

/// Scheduling unit of a stream. Created once when the stream is first scheduled and then moved
/// between the queue and sync sessions for as long as the process runs.
pub(crate) struct StreamSyncInitRecord {
	pub stream_id: StreamId,
	pub remotes: Arc<StreamNodes>,
	pub state: Mutex<RecordState>,
}

pub(crate) struct RecordState {
	pub view: Option<Box<dyn TrackedStreamView>>,
	pub minipool_gen: i64,
	pub prev_miniblock_hash: Hash,
	pub historical: HistoricalContent,
	/// Snapshot miniblock reported by the last reset.
	pub snapshot_miniblock: i64,
	pub persisted: Option<PersistedPosition>,
}

impl StreamSyncInitRecord {
	pub fn new(
		stream_id: StreamId,
		remotes: Arc<StreamNodes>,
		historical: HistoricalContent,
		persisted: Option<PersistedPosition>,
	) -> Self {
		Self {
			stream_id,
			remotes,
			state: Mutex::new(RecordState {
				view: None,
				minipool_gen: COLD_START_MINIPOOL_GEN,
				prev_miniblock_hash: COLD_START_PREV_MINIBLOCK_HASH,
				historical,
				snapshot_miniblock: 0,
				persisted,
			}),
		}
	}
}

impl RecordState {
	pub const fn cookie(&self, node_address: Address, stream_id: StreamId) -> SyncCookie {
		SyncCookie {
			node_address,
			stream_id,
			minipool_gen: self.minipool_gen,
			prev_miniblock_hash: self.prev_miniblock_hash,
		}
	}
}
