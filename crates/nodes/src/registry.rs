use river_protocol::{Address, Hash, StreamId};

use async_channel as chan;
use async_trait::async_trait;

use super::Error;

/// Buffer size of each registry event channel.
pub const REGISTRY_EVENTS_CAPACITY: usize = 1024;

/// On-chain record of a stream.
///
/// The first `replication_factor` entries of `nodes` form the quorum, the rest are nodes that
/// are still catching up with the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamWithId {
	pub id: StreamId,
	pub last_miniblock_hash: Hash,
	pub last_miniblock_num: i64,
	pub replication_factor: usize,
	pub flags: u64,
	pub nodes: Vec<Address>,
}

impl StreamWithId {
	/// Quorum part of the node list.
	#[must_use]
	pub fn quorum(&self) -> &[Address] {
		let len = if self.replication_factor == 0 {
			self.nodes.len()
		} else {
			self.replication_factor.min(self.nodes.len())
		};

		&self.nodes[..len]
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMiniblockUpdate {
	pub stream_id: StreamId,
	pub last_miniblock_hash: Hash,
	pub last_miniblock_num: i64,
	pub is_sealed: bool,
}

/// Receiving halves of a registry subscription, one typed channel per event kind so each kind is
/// delivered in order.
#[derive(Debug)]
pub struct RegistryEvents {
	pub allocated: chan::Receiver<StreamWithId>,
	pub added: chan::Receiver<StreamWithId>,
	pub last_miniblock_updated: chan::Receiver<StreamMiniblockUpdate>,
	pub placement_updated: chan::Receiver<StreamWithId>,
}

/// Sending halves matching a [`RegistryEvents`], held by whatever watches the chain.
#[derive(Debug, Clone)]
pub struct RegistryEventsSender {
	pub allocated: chan::Sender<StreamWithId>,
	pub added: chan::Sender<StreamWithId>,
	pub last_miniblock_updated: chan::Sender<StreamMiniblockUpdate>,
	pub placement_updated: chan::Sender<StreamWithId>,
}

impl RegistryEvents {
	#[must_use]
	pub fn channel() -> (RegistryEventsSender, Self) {
		let (allocated_tx, allocated_rx) = chan::bounded(REGISTRY_EVENTS_CAPACITY);
		let (added_tx, added_rx) = chan::bounded(REGISTRY_EVENTS_CAPACITY);
		let (miniblock_tx, miniblock_rx) = chan::bounded(REGISTRY_EVENTS_CAPACITY);
		let (placement_tx, placement_rx) = chan::bounded(REGISTRY_EVENTS_CAPACITY);

		(
			RegistryEventsSender {
				allocated: allocated_tx,
				added: added_tx,
				last_miniblock_updated: miniblock_tx,
				placement_updated: placement_tx,
			},
			Self {
				allocated: allocated_rx,
				added: added_rx,
				last_miniblock_updated: miniblock_rx,
				placement_updated: placement_rx,
			},
		)
	}
}

impl RegistryEventsSender {
	/// Closes every channel, subscribers see the end of all four streams.
	pub fn close(&self) {
		self.allocated.close();
		self.added.close();
		self.last_miniblock_updated.close();
		self.placement_updated.close();
	}
}

/// Read access to the stream registry contract.
#[async_trait]
pub trait StreamRegistry: Send + Sync + 'static {
	/// Calls `visit` for every stream in the registry until it returns `false`.
	async fn for_all_streams(
		&self,
		visit: &mut (dyn FnMut(StreamWithId) -> bool + Send),
	) -> Result<(), Error>;

	async fn get_stream(&self, stream_id: &StreamId) -> Result<StreamWithId, Error>;

	async fn subscribe_stream_events(&self) -> Result<RegistryEvents, Error>;

	/// Whether `node` is currently an operational member of the network.
	fn is_valid_node(&self, node: &Address) -> bool;
}
