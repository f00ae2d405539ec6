use river_protocol::{Address, Envelope, Hash, Miniblock, ParsedEvent, StreamAndCookie, StreamId};

use std::collections::BTreeMap;

use async_trait::async_trait;

/// On-chain settings in effect when tracking started, handed untouched to the consumer when it
/// builds views.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OnChainConfig {
	pub block_number: u64,
	pub values: BTreeMap<String, Vec<u8>>,
}

/// Consumer owned state machine of a single tracked stream.
///
/// A view is created from the reset payload of its stream's first update and then receives
/// every later update of that stream, in order, from a single task.
#[async_trait]
pub trait TrackedStreamView: Send + Sync + 'static {
	/// Applies a sealed miniblock received after the view was created.
	fn apply_block(&mut self, miniblock: &Miniblock, snapshot: Option<&Envelope>)
		-> anyhow::Result<()>;

	/// Applies a new minipool event, notifying the consumer when it is new to the view.
	async fn apply_event(&mut self, envelope: &Envelope) -> anyhow::Result<()>;

	/// Notifies the consumer about an event without touching the view's state. Used for
	/// historical content and for events recovered after a gap.
	async fn send_event_notification(&self, event: &ParsedEvent) -> anyhow::Result<()>;

	/// Whether the sync position of this stream should be written to the cookie store.
	async fn should_persist_cookie(&self) -> bool;
}

/// Decides which streams get tracked and builds their views.
#[async_trait]
pub trait StreamFilter: Send + Sync + 'static {
	/// `is_init` is set while the tracker walks the registry on startup, live registry events
	/// are filtered with `is_init = false`.
	fn track_stream(&self, stream_id: &StreamId, is_init: bool) -> bool;

	async fn new_tracked_stream(
		&self,
		stream_id: StreamId,
		config: &OnChainConfig,
		stream: &StreamAndCookie,
	) -> anyhow::Result<Box<dyn TrackedStreamView>>;
}

/// Observer of stream placements, called every time a stream is added to a sync session.
pub trait StreamPlacementListener: Send + Sync + 'static {
	fn on_stream_placement(
		&self,
		stream_id: &StreamId,
		sync_id: &str,
		node: Address,
		minipool_gen: i64,
		prev_miniblock_hash: Hash,
	);
}
