use crate::{
	config::StreamTrackingConfig,
	dynamic_buffer::DynamicBuffer,
	metrics::SyncMetrics,
	record::StreamSyncInitRecord,
	view::{OnChainConfig, StreamFilter, StreamPlacementListener},
	Error,
};

use river_cookie_store::SyncCookieStore;
use river_nodes::{NodeRegistry, RemoteStreamSyncer, SyncResponseStream};
use river_protocol::{Address, ErrorCode, ModifySyncRequest, StreamId, SyncOp, SyncStreamsResponse};

use std::sync::{Arc, OnceLock};

use async_channel as chan;
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::{
	spawn,
	sync::watch,
	time::{interval, timeout, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn, Instrument, Span};

mod gap_recovery;
mod update;

/// Everything session runners share with the [`MultiSyncRunner`](crate::MultiSyncRunner) that
/// spawned them.
pub(crate) struct SessionContext {
	pub config: StreamTrackingConfig,
	pub on_chain_config: OnChainConfig,
	pub filter: Arc<dyn StreamFilter>,
	pub cookie_store: Option<Arc<dyn SyncCookieStore>>,
	pub placement_listener: Option<Arc<dyn StreamPlacementListener>>,
	pub metrics: Arc<SyncMetrics>,
	pub queue: chan::Sender<Arc<StreamSyncInitRecord>>,
}

impl SessionContext {
	/// Puts a record back on the scheduling queue, unless `cancel` fires first.
	pub async fn requeue(&self, record: Arc<StreamSyncInitRecord>, cancel: &CancellationToken) {
		tokio::select! {
			biased;

			() = cancel.cancelled() => {}

			res = self.queue.send(record) => {
				if let Err(chan::SendError(record)) = res {
					debug!(stream_id = %record.stream_id, "Stream queue closed, dropping stream;");
				}
			}
		}
	}
}

/// Owns one multiplexed sync session with one remote node.
///
/// Lifecycle: created empty, started once the remote acknowledged the session, then accepts
/// streams until it fills up or fails. A failed runner is permanently unassignable and hands
/// every stream it still owns back to the scheduling queue.
pub(crate) struct SyncSessionRunner {
	node: Address,
	ctx: Arc<SessionContext>,
	node_registry: Arc<dyn NodeRegistry>,

	/// Shutdown of the whole tracking layer, streams are not relocated when it fires.
	root_token: CancellationToken,
	/// Child of `root_token` that tears down only this session.
	sync_token: CancellationToken,
	sync_cause: Mutex<Option<Error>>,

	syncer: OnceLock<Arc<dyn RemoteStreamSyncer>>,
	messages: DynamicBuffer<SyncStreamsResponse>,
	started: watch::Sender<bool>,

	records: DashMap<StreamId, Arc<StreamSyncInitRecord>>,
	/// Set once, guards the capacity check of `add_stream`.
	close_err: Mutex<Option<Arc<Error>>>,
}

impl SyncSessionRunner {
	pub fn new(
		ctx: Arc<SessionContext>,
		node_registry: Arc<dyn NodeRegistry>,
		root_token: &CancellationToken,
		node: Address,
	) -> Arc<Self> {
		let (started, _) = watch::channel(false);

		Arc::new(Self {
			node,
			messages: DynamicBuffer::new(ctx.config.message_buffer_capacity),
			ctx,
			node_registry,
			root_token: root_token.clone(),
			sync_token: root_token.child_token(),
			sync_cause: Mutex::new(None),
			syncer: OnceLock::new(),
			started,
			records: DashMap::new(),
			close_err: Mutex::new(None),
		})
	}

	pub fn sync_id(&self) -> &str {
		self.syncer.get().map_or("", |syncer| syncer.sync_id())
	}

	pub fn len(&self) -> usize {
		self.records.len()
	}

	pub async fn wait_until_started(&self) {
		let mut started_rx = self.started.subscribe();
		// The sender lives as long as `self`, so this can't fail
		let _ = started_rx.wait_for(|started| *started).await;
	}

	fn mark_started(&self) {
		self.started.send_replace(true);
	}

	/// Cancels the session, `cause` is what the run loop closes the runner with. The first cause
	/// wins.
	pub fn cancel_sync(&self, cause: Error) {
		{
			let mut sync_cause = self.sync_cause.lock();
			if sync_cause.is_none() && !self.sync_token.is_cancelled() {
				*sync_cause = Some(cause);
			}
		}

		self.sync_token.cancel();
	}

	#[instrument(skip_all, fields(node = %self.node, sync_id = tracing::field::Empty))]
	pub async fn run(self: Arc<Self>) {
		let client = match self.node_registry.stream_service_client(&self.node) {
			Ok(client) => client,
			Err(e) => {
				warn!(
					?e,
					"Unable to create a stream service client for node, closing sync session runner;"
				);
				self.close(e.into()).await;
				self.mark_started();
				return;
			}
		};

		let opened = tokio::select! {
			biased;

			() = self.sync_token.cancelled() => {
				self.close(Error::Canceled).await;
				self.mark_started();
				return;
			}

			opened = client.sync_streams(vec![]) => opened,
		};

		let (syncer, responses) = match opened {
			Ok(opened) => opened,
			Err(e) => {
				warn!(
					?e,
					"Unable to open a sync session on node, closing sync session runner;"
				);
				self.close(e.into()).await;
				self.mark_started();
				return;
			}
		};

		Span::current().record("sync_id", syncer.sync_id());
		// `run` is only ever called once per runner
		let _ = self.syncer.set(Arc::clone(&syncer));

		spawn(
			Arc::clone(&self)
				.forward_responses(responses)
				.in_current_span(),
		);

		let _open_session = self.ctx.metrics.open_sync_session(self.node);
		let _active_session = self.ctx.metrics.active_sync_session();

		self.mark_started();
		debug!("Sync session started;");

		let mut ticker = interval(self.ctx.config.metrics_tick());
		ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

		let mut batch = Vec::new();

		loop {
			tokio::select! {
				biased;

				// Process shutdown, streams stay where they are
				() = self.root_token.cancelled() => break,

				() = self.sync_token.cancelled() => {
					let cause = self.sync_cause.lock().take().unwrap_or(Error::Canceled);
					self.close(cause).await;
					break;
				}

				() = self.messages.wait() => {
					if !self.messages.get_batch(&mut batch) {
						self.close(Error::BufferFull { node: self.node }).await;
						break;
					}

					for update in batch.drain(..) {
						self.process_sync_update(update).await;
					}
				}

				_ = ticker.tick() => {
					self.ctx.metrics.observe_streams_per_sync_session(self.records.len());
				}
			}
		}

		syncer.cancel().await;
		debug!("Sync session stopped;");
	}

	/// Pumps the remote's responses into the message buffer. `SYNC_DOWN` relocates its stream
	/// right away, the run loop only counts it.
	async fn forward_responses(self: Arc<Self>, mut responses: SyncResponseStream) {
		loop {
			let next = tokio::select! {
				biased;

				() = self.sync_token.cancelled() => return,

				next = responses.next() => next,
			};

			match next {
				Some(Ok(response)) => {
					if response.sync_op == SyncOp::SyncDown {
						if let Some(stream_id) = response.stream_id {
							self.relocate_stream(&stream_id).await;
						}
					}

					if self.messages.add_message(response).is_err() {
						// Buffer closed itself, the run loop closes the runner
						return;
					}
				}

				Some(Err(e)) => {
					self.cancel_sync(e.into());
					return;
				}

				None => {
					info!("Remote node closed the sync stream;");
					self.cancel_sync(Error::RemoteDisconnected {
						node: self.node,
						sync_id: self.sync_id().to_string(),
					});
					return;
				}
			}
		}
	}

	#[instrument(skip_all, fields(node = %self.node, stream_id = %record.stream_id))]
	pub async fn add_stream(&self, record: Arc<StreamSyncInitRecord>) -> Result<(), Error> {
		self.wait_until_started().await;

		{
			let close_err = self.close_err.lock();
			let max_streams = self.ctx.config.streams_per_sync_session;

			if close_err.is_some()
				|| self.sync_token.is_cancelled()
				|| self.records.len() >= max_streams.saturating_sub(1)
			{
				return Err(Error::Unassignable { node: self.node });
			}

			self.records.insert(record.stream_id, Arc::clone(&record));
		}

		let Some(syncer) = self.syncer.get() else {
			self.records.remove(&record.stream_id);
			return Err(Error::Unassignable { node: self.node });
		};

		let cookie = record.state.lock().await.cookie(self.node, record.stream_id);

		debug!(
			minipool_gen = cookie.minipool_gen,
			prev_miniblock_hash = %cookie.prev_miniblock_hash,
			sync_id = syncer.sync_id(),
			"Adding stream with cookie;"
		);

		let request = ModifySyncRequest {
			sync_id: syncer.sync_id().to_string(),
			add_streams: vec![cookie.clone()],
			remove_streams: vec![],
		};

		let res = match timeout(
			self.ctx.config.modify_sync_request_timeout(),
			syncer.modify(request),
		)
		.await
		{
			Err(_) => Err(Error::ModifyTimeout {
				stream_id: record.stream_id,
				sync_id: syncer.sync_id().to_string(),
			}),
			Ok(Err(e)) => Err(e.into()),
			Ok(Ok(response)) => response.adds.into_iter().next().map_or(Ok(()), |failure| {
				Err(Error::AddStreamRejected {
					stream_id: record.stream_id,
					sync_id: syncer.sync_id().to_string(),
					node: self.node,
					code: failure.code,
					message: failure.message,
				})
			}),
		};

		if let Err(e) = res {
			self.records.remove(&record.stream_id);
			return Err(e);
		}

		if let Some(listener) = &self.ctx.placement_listener {
			listener.on_stream_placement(
				&record.stream_id,
				syncer.sync_id(),
				self.node,
				cookie.minipool_gen,
				cookie.prev_miniblock_hash,
			);
		}

		Ok(())
	}

	/// Takes the stream away from this session and puts it back on the scheduling queue with
	/// its sticky peer moved past this node. Cancels the session once it owns no streams.
	pub async fn relocate_stream(&self, stream_id: &StreamId) {
		let record = self.records.remove(stream_id).map(|(_, record)| record);
		let remaining = self.records.len();

		if remaining == 0 {
			info!(
				%stream_id,
				node = %self.node,
				"Sync session runner has no streams remaining after relocation, cancelling session;"
			);
			self.cancel_sync(Error::SessionEmpty { node: self.node });
		}

		let Some(record) = record else {
			error!(
				%stream_id,
				sync_id = self.sync_id(),
				"Expected stream to exist in the stream records of this sync session runner;"
			);
			return;
		};

		let new_target = record.remotes.advance_sticky_peer(self.node);

		info!(
			%stream_id,
			old_node = %self.node,
			%new_target,
			remaining,
			"Relocating stream to new target;"
		);

		self.ctx.requeue(record, &self.root_token).await;
	}

	/// Closes the runner, only the first call has any effect. Cancellation is a shutdown and
	/// leaves streams alone, any other error tears the session down and relocates every stream.
	pub async fn close(&self, err: Error) {
		let err = {
			let mut close_err = self.close_err.lock();
			if let Some(existing) = close_err.as_ref() {
				debug!(?existing, new_error = ?err, "Sync session runner already closed;");
				return;
			}

			let err = Arc::new(err);
			*close_err = Some(Arc::clone(&err));
			err
		};

		if err.is_cancellation() {
			return;
		}

		error!(
			?err,
			sync_id = self.sync_id(),
			node = %self.node,
			"Sync session was closed due to error;"
		);

		self.sync_token.cancel();

		let node_unavailable = err.code() == ErrorCode::Unavailable;

		let stream_ids = self
			.records
			.iter()
			.map(|entry| *entry.key())
			.collect::<Vec<_>>();

		for stream_id in stream_ids {
			if node_unavailable {
				if let Some(record) = self.records.get(&stream_id).map(|r| Arc::clone(r.value())) {
					record.remotes.advance_sticky_peer(self.node);
				}
			}

			self.relocate_stream(&stream_id).await;
		}
	}
}
