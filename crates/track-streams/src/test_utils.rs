#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use crate::{
	config::StreamTrackingConfig,
	metrics::SyncMetrics,
	record::StreamSyncInitRecord,
	session_runner::SessionContext,
	view::{OnChainConfig, StreamFilter, StreamPlacementListener, TrackedStreamView},
};

use river_cookie_store::SyncCookieStore;
use river_nodes::{
	Error as NodesError, NodeRegistry, RegistryEvents, RegistryEventsSender, RemoteStreamSyncer,
	StreamRegistry, StreamServiceClient, StreamWithId, SyncResponseStream,
};
use river_protocol::{
	Address, Envelope, ErrorCode, EventPayload, GetMiniblocksRequest, GetMiniblocksResponse, Hash,
	Miniblock, ModifySyncRequest, ModifySyncResponse, ParsedEvent, RpcError, StreamAndCookie,
	StreamEvent, StreamId, SyncCookie, SyncOp, SyncStreamOpStatus, SyncStreamsResponse,
};

use std::{
	collections::{HashMap, HashSet},
	sync::{
		atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
		Arc,
	},
	time::Duration,
};

use async_channel as chan;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::{
	sync::Notify,
	time::{sleep, timeout},
};

pub const fn node(n: u8) -> Address {
	Address([n; 20])
}

pub fn content_event(data: &str) -> Envelope {
	Envelope::seal(&StreamEvent {
		creator_address: node(0xEE),
		salt: data.as_bytes().to_vec(),
		prev_miniblock_hash: None,
		created_at_epoch_ms: 0,
		payload: EventPayload::Content {
			kind: "message".to_string(),
			data: data.as_bytes().to_vec(),
		},
	})
	.unwrap()
}

pub fn miniblock(num: i64, events: Vec<Envelope>) -> Miniblock {
	Miniblock::build(node(0xEE), num, Hash::ZERO, events).unwrap()
}

pub fn stream_update(
	stream_id: StreamId,
	node: Address,
	reset: bool,
	miniblocks: Vec<Miniblock>,
	events: Vec<Envelope>,
	minipool_gen: i64,
) -> SyncStreamsResponse {
	SyncStreamsResponse {
		sync_op: SyncOp::SyncUpdate,
		stream: Some(StreamAndCookie {
			events,
			next_sync_cookie: SyncCookie {
				node_address: node,
				stream_id,
				minipool_gen,
				prev_miniblock_hash: Hash::of(&minipool_gen.to_be_bytes()),
			},
			miniblocks,
			sync_reset: reset,
			snapshot: None,
		}),
		..Default::default()
	}
}

pub fn sync_down(stream_id: StreamId) -> SyncStreamsResponse {
	SyncStreamsResponse {
		sync_op: SyncOp::SyncDown,
		stream_id: Some(stream_id),
		..Default::default()
	}
}

/// Polls `condition` until it holds, panics after a few seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
	timeout(Duration::from_secs(5), async {
		while !condition() {
			sleep(Duration::from_millis(10)).await;
		}
	})
	.await
	.expect("condition never became true");
}

pub fn test_config() -> StreamTrackingConfig {
	StreamTrackingConfig {
		num_workers: 4,
		streams_per_sync_session: 4,
		max_concurrent_node_requests: 4,
		queue_capacity: 64,
		message_buffer_capacity: 64,
		modify_sync_request_timeout_ms: 1_000,
		metrics_tick_ms: 50,
	}
}

// Nodes

/// Holds `modify` calls of a node while stalled and counts how many are in flight at once.
#[derive(Debug, Default)]
pub struct ModifyGate {
	stalled: AtomicBool,
	released: Notify,
	in_flight: AtomicUsize,
	max_in_flight: AtomicUsize,
}

struct InFlightModify<'gate>(&'gate ModifyGate);

impl Drop for InFlightModify<'_> {
	fn drop(&mut self) {
		self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
	}
}

impl ModifyGate {
	async fn pass(&self) -> InFlightModify<'_> {
		let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
		self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
		let guard = InFlightModify(self);

		loop {
			let released = self.released.notified();
			if !self.stalled.load(Ordering::SeqCst) {
				break;
			}
			released.await;
		}

		guard
	}

	fn set_stalled(&self, stalled: bool) {
		self.stalled.store(stalled, Ordering::SeqCst);
		if !stalled {
			self.released.notify_waiters();
		}
	}
}

#[derive(Debug)]
pub struct FakeSyncer {
	sync_id: String,
	node: Address,
	responses: chan::Sender<Result<SyncStreamsResponse, RpcError>>,
	added: Mutex<Vec<SyncCookie>>,
	reject_adds: Arc<Mutex<Option<ErrorCode>>>,
	modify_gate: Arc<ModifyGate>,
	cancelled: AtomicBool,
}

impl FakeSyncer {
	pub fn send(&self, response: SyncStreamsResponse) {
		self.responses.try_send(Ok(response)).unwrap();
	}

	pub fn fail(&self, error: RpcError) {
		self.responses.try_send(Err(error)).unwrap();
	}

	/// Ends the response stream as if the remote went away.
	pub fn disconnect(&self) {
		self.responses.close();
	}

	pub fn added(&self) -> Vec<SyncCookie> {
		self.added.lock().clone()
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancelled.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl RemoteStreamSyncer for FakeSyncer {
	fn sync_id(&self) -> &str {
		&self.sync_id
	}

	fn node(&self) -> Address {
		self.node
	}

	async fn modify(&self, request: ModifySyncRequest) -> Result<ModifySyncResponse, RpcError> {
		let _in_flight = self.modify_gate.pass().await;

		if let Some(code) = *self.reject_adds.lock() {
			return Ok(ModifySyncResponse {
				adds: request
					.add_streams
					.iter()
					.map(|cookie| SyncStreamOpStatus {
						stream_id: cookie.stream_id,
						code,
						message: "rejected".to_string(),
					})
					.collect(),
				removals: vec![],
			});
		}

		self.added.lock().extend(request.add_streams);

		Ok(ModifySyncResponse::default())
	}

	async fn cancel(&self) {
		self.cancelled.store(true, Ordering::SeqCst);
		self.responses.close();
	}
}

#[derive(Debug)]
pub struct FakeNode {
	pub address: Address,
	syncers: Mutex<Vec<Arc<FakeSyncer>>>,
	next_sync: AtomicU64,
	reject_adds: Arc<Mutex<Option<ErrorCode>>>,
	modify_gate: Arc<ModifyGate>,
	unreachable: AtomicBool,
	miniblocks: Mutex<HashMap<StreamId, Vec<Miniblock>>>,
	get_miniblocks_requests: Mutex<Vec<GetMiniblocksRequest>>,
}

impl FakeNode {
	pub fn new(address: Address) -> Arc<Self> {
		Arc::new(Self {
			address,
			syncers: Mutex::default(),
			next_sync: AtomicU64::new(0),
			reject_adds: Arc::default(),
			modify_gate: Arc::default(),
			unreachable: AtomicBool::new(false),
			miniblocks: Mutex::default(),
			get_miniblocks_requests: Mutex::default(),
		})
	}

	pub fn syncers(&self) -> Vec<Arc<FakeSyncer>> {
		self.syncers.lock().clone()
	}

	pub fn latest_syncer(&self) -> Option<Arc<FakeSyncer>> {
		self.syncers.lock().last().cloned()
	}

	/// Every stream added to any session opened on this node.
	pub fn added_streams(&self) -> Vec<StreamId> {
		self.syncers()
			.iter()
			.flat_map(|syncer| syncer.added())
			.map(|cookie| cookie.stream_id)
			.collect()
	}

	pub fn reject_adds(&self, code: Option<ErrorCode>) {
		*self.reject_adds.lock() = code;
	}

	/// Holds every `modify` call on this node until called again with `false`.
	pub fn stall_modify(&self, stall: bool) {
		self.modify_gate.set_stalled(stall);
	}

	pub fn modifies_in_flight(&self) -> usize {
		self.modify_gate.in_flight.load(Ordering::SeqCst)
	}

	pub fn max_modifies_in_flight(&self) -> usize {
		self.modify_gate.max_in_flight.load(Ordering::SeqCst)
	}

	pub fn set_unreachable(&self, unreachable: bool) {
		self.unreachable.store(unreachable, Ordering::SeqCst);
	}

	pub fn set_miniblocks(&self, stream_id: StreamId, miniblocks: Vec<Miniblock>) {
		self.miniblocks.lock().insert(stream_id, miniblocks);
	}

	pub fn get_miniblocks_requests(&self) -> Vec<GetMiniblocksRequest> {
		self.get_miniblocks_requests.lock().clone()
	}
}

#[async_trait]
impl StreamServiceClient for FakeNode {
	async fn sync_streams(
		&self,
		cookies: Vec<SyncCookie>,
	) -> Result<(Arc<dyn RemoteStreamSyncer>, SyncResponseStream), RpcError> {
		if self.unreachable.load(Ordering::SeqCst) {
			return Err(RpcError::new(ErrorCode::Unavailable, "node unreachable"));
		}

		let (tx, rx) = chan::unbounded();
		let syncer = Arc::new(FakeSyncer {
			sync_id: format!(
				"{}-{}",
				self.address,
				self.next_sync.fetch_add(1, Ordering::SeqCst)
			),
			node: self.address,
			responses: tx,
			added: Mutex::new(cookies),
			reject_adds: Arc::clone(&self.reject_adds),
			modify_gate: Arc::clone(&self.modify_gate),
			cancelled: AtomicBool::new(false),
		});

		self.syncers.lock().push(Arc::clone(&syncer));

		let syncer: Arc<dyn RemoteStreamSyncer> = syncer;
		let responses: SyncResponseStream = Box::pin(rx);

		Ok((syncer, responses))
	}

	async fn get_miniblocks(
		&self,
		request: GetMiniblocksRequest,
	) -> Result<GetMiniblocksResponse, RpcError> {
		self.get_miniblocks_requests.lock().push(request.clone());

		let miniblocks = self
			.miniblocks
			.lock()
			.get(&request.stream_id)
			.map(|miniblocks| {
				miniblocks
					.iter()
					.filter(|miniblock| {
						let num = miniblock.number().unwrap();
						num >= request.from_inclusive && num < request.to_exclusive
					})
					.cloned()
					.collect()
			})
			.unwrap_or_default();

		Ok(GetMiniblocksResponse {
			miniblocks,
			terminus: false,
		})
	}
}

#[derive(Debug, Default)]
pub struct FakeNodeRegistry {
	nodes: HashMap<Address, Arc<FakeNode>>,
}

impl FakeNodeRegistry {
	pub fn new(nodes: &[Arc<FakeNode>]) -> Arc<Self> {
		Arc::new(Self {
			nodes: nodes
				.iter()
				.map(|node| (node.address, Arc::clone(node)))
				.collect(),
		})
	}
}

impl NodeRegistry for FakeNodeRegistry {
	fn stream_service_client(
		&self,
		node: &Address,
	) -> Result<Arc<dyn StreamServiceClient>, NodesError> {
		self.nodes
			.get(node)
			.map(|node| Arc::clone(node) as Arc<dyn StreamServiceClient>)
			.ok_or(NodesError::UnknownNode(*node))
	}
}

// Views

/// Everything the consumer side observed, shared by a [`RecordingFilter`] and its views.
#[derive(Debug, Default)]
pub struct ViewLog {
	pub views_created: Mutex<Vec<StreamId>>,
	pub applied_blocks: Mutex<Vec<(StreamId, i64)>>,
	pub applied_events: Mutex<Vec<(StreamId, Hash)>>,
	pub notifications: Mutex<Vec<(StreamId, Hash)>>,
}

impl ViewLog {
	pub fn views_created(&self) -> Vec<StreamId> {
		self.views_created.lock().clone()
	}

	pub fn applied_blocks(&self) -> Vec<(StreamId, i64)> {
		self.applied_blocks.lock().clone()
	}

	pub fn applied_events(&self) -> Vec<(StreamId, Hash)> {
		self.applied_events.lock().clone()
	}

	pub fn notifications(&self) -> Vec<(StreamId, Hash)> {
		self.notifications.lock().clone()
	}
}

pub struct RecordingView {
	stream_id: StreamId,
	log: Arc<ViewLog>,
	persist_cookies: bool,
}

#[async_trait]
impl TrackedStreamView for RecordingView {
	fn apply_block(
		&mut self,
		miniblock: &Miniblock,
		_snapshot: Option<&Envelope>,
	) -> anyhow::Result<()> {
		self.log
			.applied_blocks
			.lock()
			.push((self.stream_id, miniblock.number()?));
		Ok(())
	}

	async fn apply_event(&mut self, envelope: &Envelope) -> anyhow::Result<()> {
		let event = ParsedEvent::parse(envelope)?;
		self.log
			.applied_events
			.lock()
			.push((self.stream_id, event.hash));
		self.send_event_notification(&event).await
	}

	async fn send_event_notification(&self, event: &ParsedEvent) -> anyhow::Result<()> {
		self.log
			.notifications
			.lock()
			.push((self.stream_id, event.hash));
		Ok(())
	}

	async fn should_persist_cookie(&self) -> bool {
		self.persist_cookies
	}
}

#[derive(Debug, Default)]
pub struct RecordingFilter {
	pub log: Arc<ViewLog>,
	pub persist_cookies: AtomicBool,
	pub fail_views: AtomicBool,
	/// Streams `track_stream` refuses, with their `is_init` flag recorded in `filtered`.
	pub ignored: Mutex<HashSet<StreamId>>,
	pub filtered: Mutex<Vec<(StreamId, bool)>>,
}

#[async_trait]
impl StreamFilter for RecordingFilter {
	fn track_stream(&self, stream_id: &StreamId, is_init: bool) -> bool {
		self.filtered.lock().push((*stream_id, is_init));
		!self.ignored.lock().contains(stream_id)
	}

	async fn new_tracked_stream(
		&self,
		stream_id: StreamId,
		_config: &OnChainConfig,
		_stream: &StreamAndCookie,
	) -> anyhow::Result<Box<dyn TrackedStreamView>> {
		if self.fail_views.load(Ordering::SeqCst) {
			anyhow::bail!("view construction failed");
		}

		self.log.views_created.lock().push(stream_id);

		Ok(Box::new(RecordingView {
			stream_id,
			log: Arc::clone(&self.log),
			persist_cookies: self.persist_cookies.load(Ordering::SeqCst),
		}))
	}
}

#[derive(Debug, Default)]
pub struct RecordingPlacements {
	pub placements: Mutex<Vec<(StreamId, Address, i64)>>,
}

impl RecordingPlacements {
	pub fn placements(&self) -> Vec<(StreamId, Address, i64)> {
		self.placements.lock().clone()
	}
}

impl StreamPlacementListener for RecordingPlacements {
	fn on_stream_placement(
		&self,
		stream_id: &StreamId,
		_sync_id: &str,
		node: Address,
		minipool_gen: i64,
		_prev_miniblock_hash: Hash,
	) {
		self.placements
			.lock()
			.push((*stream_id, node, minipool_gen));
	}
}

// Registry

pub struct FakeStreamRegistry {
	streams: Mutex<Vec<StreamWithId>>,
	events: Mutex<Option<RegistryEvents>>,
	valid_nodes: HashSet<Address>,
}

impl FakeStreamRegistry {
	pub fn new(
		streams: Vec<StreamWithId>,
		valid_nodes: &[Address],
	) -> (Arc<Self>, RegistryEventsSender) {
		let (tx, events) = RegistryEvents::channel();

		(
			Arc::new(Self {
				streams: Mutex::new(streams),
				events: Mutex::new(Some(events)),
				valid_nodes: valid_nodes.iter().copied().collect(),
			}),
			tx,
		)
	}

	pub fn upsert(&self, stream: StreamWithId) {
		let mut streams = self.streams.lock();
		streams.retain(|existing| existing.id != stream.id);
		streams.push(stream);
	}
}

#[async_trait]
impl StreamRegistry for FakeStreamRegistry {
	async fn for_all_streams(
		&self,
		visit: &mut (dyn FnMut(StreamWithId) -> bool + Send),
	) -> Result<(), NodesError> {
		let streams = self.streams.lock().clone();
		for stream in streams {
			if !visit(stream) {
				break;
			}
		}
		Ok(())
	}

	async fn get_stream(&self, stream_id: &StreamId) -> Result<StreamWithId, NodesError> {
		self.streams
			.lock()
			.iter()
			.find(|stream| stream.id == *stream_id)
			.cloned()
			.ok_or(NodesError::StreamNotFound(*stream_id))
	}

	async fn subscribe_stream_events(&self) -> Result<RegistryEvents, NodesError> {
		self.events
			.lock()
			.take()
			.ok_or_else(|| NodesError::Subscription("already subscribed".to_string()))
	}

	fn is_valid_node(&self, node: &Address) -> bool {
		self.valid_nodes.contains(node)
	}
}

pub fn registry_stream(id: StreamId, nodes: &[Address]) -> StreamWithId {
	StreamWithId {
		id,
		last_miniblock_hash: Hash::ZERO,
		last_miniblock_num: 0,
		replication_factor: nodes.len(),
		flags: 0,
		nodes: nodes.to_vec(),
	}
}

/// Session context wired to fresh fakes, plus the receiving end of its scheduling queue.
pub fn session_context(
	config: StreamTrackingConfig,
	filter: Arc<RecordingFilter>,
	cookie_store: Option<Arc<dyn SyncCookieStore>>,
	placement_listener: Option<Arc<dyn StreamPlacementListener>>,
) -> (
	Arc<SessionContext>,
	chan::Receiver<Arc<StreamSyncInitRecord>>,
) {
	let (queue, queue_rx) = chan::bounded(config.queue_capacity);

	(
		Arc::new(SessionContext {
			config,
			on_chain_config: OnChainConfig::default(),
			filter,
			cookie_store,
			placement_listener,
			metrics: Arc::new(SyncMetrics::default()),
			queue,
		}),
		queue_rx,
	)
}
