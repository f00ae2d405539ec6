use crate::{metrics::SyncMetrics, multi_sync_runner::MultiSyncRunner, Error};

use river_nodes::{RegistryEvents, StreamMiniblockUpdate, StreamNodes, StreamRegistry, StreamWithId};
use river_protocol::{Address, StreamId};

use std::{pin::pin, sync::Arc};

use dashmap::{mapref::entry::Entry, DashMap};
use futures::{stream, StreamExt};
use futures_concurrency::stream::Merge;
use parking_lot::Mutex;
use tokio::spawn;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Decides which registry streams get synced and keeps their placement up to date.
///
/// Streams present when [`StreamsTracker::run`] starts are scheduled without historical content,
/// streams discovered afterwards through registry events have their history notified to the view
/// first.
pub struct StreamsTracker {
	registry: Arc<dyn StreamRegistry>,
	msr: Arc<MultiSyncRunner>,
	tracked: DashMap<StreamId, Arc<StreamNodes>>,
	events: Mutex<Option<RegistryEvents>>,
}

enum TrackerMessage {
	Allocated(StreamWithId),
	Added(StreamWithId),
	MiniblockUpdated(StreamMiniblockUpdate),
	PlacementUpdated(StreamWithId),
	Stop,
}

impl StreamsTracker {
	/// Subscribes to registry events. Failing to subscribe is fatal.
	///
	/// Registry streams are only scheduled once [`StreamsTracker::run`] has started the sync
	/// workers draining the queue.
	pub async fn init(
		registry: Arc<dyn StreamRegistry>,
		multi_sync_runner: MultiSyncRunner,
	) -> Result<Arc<Self>, Error> {
		let events = registry.subscribe_stream_events().await?;

		let tracker = Arc::new(Self {
			registry,
			msr: Arc::new(multi_sync_runner),
			tracked: DashMap::new(),
			events: Mutex::new(Some(events)),
		});

		tracker.log_persisted_cookies().await;

		Ok(tracker)
	}

	#[must_use]
	pub fn metrics(&self) -> &SyncMetrics {
		self.msr.metrics()
	}

	#[must_use]
	pub fn is_tracked(&self, stream_id: &StreamId) -> bool {
		self.tracked.contains_key(stream_id)
	}

	#[must_use]
	pub fn tracked_count(&self) -> usize {
		self.tracked.len()
	}

	async fn log_persisted_cookies(&self) {
		let Some(store) = &self.msr.ctx().cookie_store else {
			return;
		};

		match store.get_all_stream_cookies().await {
			Ok(cookies) => info!(count = cookies.len(), "Loaded persisted sync cookies;"),
			Err(e) => warn!(?e, "Failed to load persisted sync cookies;"),
		}
	}

	async fn track_registry_streams(&self) -> Result<(), Error> {
		let mut accepted = vec![];
		let (mut total, mut without_nodes) = (0_usize, 0_usize);

		self.registry
			.for_all_streams(&mut |stream: StreamWithId| {
				total += 1;

				if !self.has_valid_node(&stream) {
					without_nodes += 1;
					return true;
				}

				if self.msr.ctx().filter.track_stream(&stream.id, true) {
					accepted.push(stream);
				}

				true
			})
			.await?;

		if without_nodes > 0 {
			warn!(without_nodes, "Skipped registry streams without a valid node;");
		}

		let mut scheduled = 0_usize;
		for stream in &accepted {
			if self.schedule(stream, false).await {
				scheduled += 1;
			}
		}

		info!(total, scheduled, "Tracking registry streams;");

		Ok(())
	}

	fn has_valid_node(&self, stream: &StreamWithId) -> bool {
		let valid = stream
			.nodes
			.iter()
			.any(|node| self.registry.is_valid_node(node));

		if !valid {
			debug!(stream_id = %stream.id, nodes = ?stream.nodes, "Stream has no valid node;");
		}

		valid
	}

	/// Hands the stream to the multi sync runner, unless it's already tracked.
	async fn schedule(&self, stream: &StreamWithId, apply_historical_stream_contents: bool) -> bool {
		let remotes = match self.tracked.entry(stream.id) {
			Entry::Occupied(_) => return false,
			Entry::Vacant(entry) => Arc::clone(
				entry
					.insert(Arc::new(StreamNodes::new(
						stream.replication_factor,
						&stream.nodes,
						Address::ZERO,
					)))
					.value(),
			),
		};

		self.msr
			.add_stream(stream.id, remotes, apply_historical_stream_contents)
			.await;

		true
	}

	/// Starts tracking `stream_id` if the filter accepts it. Returns `false` when it was already
	/// tracked, rejected or has no valid node.
	pub async fn add_stream(&self, stream_id: StreamId) -> Result<bool, Error> {
		if self.is_tracked(&stream_id) {
			return Ok(false);
		}

		let stream = self.registry.get_stream(&stream_id).await?;

		if !self.has_valid_node(&stream) || !self.msr.ctx().filter.track_stream(&stream_id, false)
		{
			return Ok(false);
		}

		Ok(self.schedule(&stream, true).await)
	}

	/// Forgets the persisted sync position of `stream_id`, a no-op without a cookie store.
	pub async fn delete_stream_cookie(&self, stream_id: &StreamId) -> Result<(), Error> {
		if let Some(store) = &self.msr.ctx().cookie_store {
			store.delete_stream_cookie(stream_id).await?;
		}

		Ok(())
	}

	/// Schedules every registry stream the filter accepts, then syncs tracked streams and follows
	/// registry events until `cancel` fires. Problems with single streams are logged and skipped.
	#[instrument(skip_all)]
	pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
		let Some(RegistryEvents {
			allocated,
			added,
			last_miniblock_updated,
			placement_updated,
		}) = self.events.lock().take()
		else {
			warn!("Streams tracker is already running;");
			return;
		};

		let msr_handle = spawn(Arc::clone(&self.msr).run(cancel.clone()));

		if let Err(e) = self.track_registry_streams().await {
			error!(?e, "Failed to walk registry streams, following registry events only;");
		}

		let mut msg_stream = pin!((
			allocated.map(TrackerMessage::Allocated),
			added.map(TrackerMessage::Added),
			last_miniblock_updated.map(TrackerMessage::MiniblockUpdated),
			placement_updated.map(TrackerMessage::PlacementUpdated),
			stream::once(cancel.cancelled_owned()).map(|()| TrackerMessage::Stop),
		)
			.merge());

		while let Some(msg) = msg_stream.next().await {
			match msg {
				TrackerMessage::Allocated(stream) | TrackerMessage::Added(stream) => {
					self.on_new_stream(&stream).await;
				}

				TrackerMessage::PlacementUpdated(stream) => {
					if let Some(remotes) = self
						.tracked
						.get(&stream.id)
						.map(|entry| Arc::clone(entry.value()))
					{
						debug!(stream_id = %stream.id, nodes = ?stream.nodes, "Stream placement updated;");
						remotes.reset(stream.replication_factor, &stream.nodes, Address::ZERO);
					} else {
						self.on_new_stream(&stream).await;
					}
				}

				TrackerMessage::MiniblockUpdated(update) => {
					self.on_miniblock_updated(&update).await;
				}

				TrackerMessage::Stop => break,
			}
		}

		if let Err(e) = msr_handle.await {
			error!(?e, "Multi sync runner panicked;");
		}

		info!("Streams tracker stopped;");
	}

	async fn on_new_stream(&self, stream: &StreamWithId) {
		if self.is_tracked(&stream.id)
			|| !self.has_valid_node(stream)
			|| !self.msr.ctx().filter.track_stream(&stream.id, false)
		{
			return;
		}

		self.schedule(stream, true).await;
	}

	async fn on_miniblock_updated(&self, update: &StreamMiniblockUpdate) {
		if self.is_tracked(&update.stream_id)
			|| !self.msr.ctx().filter.track_stream(&update.stream_id, false)
		{
			return;
		}

		match self.registry.get_stream(&update.stream_id).await {
			Ok(stream) => {
				if self.has_valid_node(&stream) {
					self.schedule(&stream, true).await;
				}
			}
			Err(e) => error!(?e, stream_id = %update.stream_id, "Failed to fetch stream from registry;"),
		}
	}
}
