use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};

use super::{Address, Envelope, ErrorCode, Hash, Miniblock, StreamId};

#[derive(
	Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, IntoStaticStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncOp {
	#[default]
	SyncUnspecified,
	SyncNew,
	SyncClose,
	SyncUpdate,
	SyncPong,
	SyncDown,
}

/// Resumption token for a stream: the next sync resumes after minipool generation
/// `minipool_gen` on top of `prev_miniblock_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCookie {
	pub node_address: Address,
	pub stream_id: StreamId,
	pub minipool_gen: i64,
	pub prev_miniblock_hash: Hash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamAndCookie {
	/// Minipool events, not yet checkpointed into a miniblock.
	pub events: Vec<Envelope>,
	pub next_sync_cookie: SyncCookie,
	pub miniblocks: Vec<Miniblock>,
	pub sync_reset: bool,
	pub snapshot: Option<Envelope>,
}

impl StreamAndCookie {
	#[must_use]
	pub const fn stream_id(&self) -> &StreamId {
		&self.next_sync_cookie.stream_id
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncStreamsResponse {
	pub sync_id: String,
	pub sync_op: SyncOp,
	pub stream: Option<StreamAndCookie>,
	pub pong_nonce: String,
	/// Set on `SyncDown`.
	pub stream_id: Option<StreamId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModifySyncRequest {
	pub sync_id: String,
	pub add_streams: Vec<SyncCookie>,
	pub remove_streams: Vec<StreamId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStreamOpStatus {
	pub stream_id: StreamId,
	pub code: ErrorCode,
	pub message: String,
}

/// Lists the adds and removals that failed, an empty response means everything was applied.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModifySyncResponse {
	pub adds: Vec<SyncStreamOpStatus>,
	pub removals: Vec<SyncStreamOpStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetMiniblocksRequest {
	pub stream_id: StreamId,
	pub from_inclusive: i64,
	pub to_exclusive: i64,
	pub omit_snapshots: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GetMiniblocksResponse {
	pub miniblocks: Vec<Miniblock>,
	/// True when the node has no miniblocks before the requested range.
	pub terminus: bool,
}
