use crate::{
	config::StreamTrackingConfig,
	metrics::SyncMetrics,
	record::{HistoricalContent, PersistedPosition, StreamSyncInitRecord},
	session_runner::{SessionContext, SyncSessionRunner},
	view::{OnChainConfig, StreamFilter, StreamPlacementListener},
	Error,
};

use river_cookie_store::SyncCookieStore;
use river_nodes::{NodeRegistry, StreamNodes};
use river_protocol::{Address, ErrorCode, StreamId};

use std::{pin::pin, sync::Arc};

use async_channel as chan;
use dashmap::{mapref::entry::Entry, DashMap};
use futures::{stream, StreamExt};
use futures_concurrency::{future::Join, stream::Merge};
use rand::Rng;
use tokio::{
	spawn,
	sync::{Semaphore, SemaphorePermit},
	time::{interval, MissedTickBehavior},
};
use tokio_stream::wrappers::IntervalStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn, Instrument};

/// Places streams into sync sessions.
///
/// Streams wait on a bounded queue until a worker picks them up, looks up the open session
/// runner of the stream's sticky peer (creating one when needed) and adds the stream to it.
/// Streams relocated away from a failing session come back through the same queue.
pub struct MultiSyncRunner {
	ctx: Arc<SessionContext>,
	node_registries: Vec<Arc<dyn NodeRegistry>>,
	queue_rx: chan::Receiver<Arc<StreamSyncInitRecord>>,

	/// The single runner per node that still accepts streams.
	unfilled_syncs: DashMap<Address, Arc<SyncSessionRunner>>,
	node_requests: DashMap<Address, Arc<Semaphore>>,

	root_token: CancellationToken,
}

impl MultiSyncRunner {
	pub fn new(
		config: StreamTrackingConfig,
		on_chain_config: OnChainConfig,
		node_registries: Vec<Arc<dyn NodeRegistry>>,
		filter: Arc<dyn StreamFilter>,
		cookie_store: Option<Arc<dyn SyncCookieStore>>,
		placement_listener: Option<Arc<dyn StreamPlacementListener>>,
		metrics: Arc<SyncMetrics>,
	) -> Result<Self, Error> {
		if node_registries.is_empty() {
			return Err(Error::NoNodeRegistries);
		}

		let config = config.normalized();
		let (queue, queue_rx) = chan::bounded(config.queue_capacity);

		Ok(Self {
			ctx: Arc::new(SessionContext {
				config,
				on_chain_config,
				filter,
				cookie_store,
				placement_listener,
				metrics,
				queue,
			}),
			node_registries,
			queue_rx,
			unfilled_syncs: DashMap::new(),
			node_requests: DashMap::new(),
			root_token: CancellationToken::new(),
		})
	}

	#[must_use]
	pub fn metrics(&self) -> &SyncMetrics {
		&self.ctx.metrics
	}

	pub(crate) fn ctx(&self) -> &SessionContext {
		&self.ctx
	}

	/// Schedules `stream_id` for syncing from one of `remotes`.
	///
	/// The stream always starts from a cold cookie so the remote answers with a reset. A cookie
	/// found in the cookie store is the starting point of gap recovery, and everything from its
	/// generation on is notified to the view whatever `apply_historical_stream_contents` says.
	pub async fn add_stream(
		&self,
		stream_id: StreamId,
		remotes: Arc<StreamNodes>,
		apply_historical_stream_contents: bool,
	) {
		let cookie = match &self.ctx.cookie_store {
			Some(store) => match store.get_sync_cookie(&stream_id).await {
				Ok((cookie, updated_at)) => {
					if let Some(cookie) = &cookie {
						info!(
							%stream_id,
							persisted_minipool_gen = cookie.minipool_gen,
							?updated_at,
							"Loaded sync cookie for historical content;"
						);
					}
					cookie
				}
				Err(e) => {
					warn!(?e, %stream_id, "Failed to load persisted sync cookie, starting cold;");
					None
				}
			},
			None => None,
		};

		let (persisted, historical) = match &cookie {
			Some(cookie) => (
				Some(PersistedPosition::from_cookie(cookie)),
				HistoricalContent::from_miniblock(cookie.minipool_gen),
			),
			None => (None, HistoricalContent::new(apply_historical_stream_contents)),
		};

		self.ctx.metrics.stream_added(stream_id.stream_type());

		let record = Arc::new(StreamSyncInitRecord::new(stream_id, remotes, historical, persisted));

		self.ctx.requeue(record, &self.root_token).await;
	}

	/// Runs the worker pool until `cancel` fires, then shuts every session down without
	/// relocating its streams and waits for in flight work.
	#[instrument(skip_all)]
	pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
		let workers = (0..self.ctx.config.num_workers)
			.map(|worker_id| spawn(Arc::clone(&self).work(worker_id).in_current_span()))
			.collect::<Vec<_>>();

		info!(
			workers = workers.len(),
			"Stream sync workers started;"
		);

		enum RunnerMessage {
			Tick,
			Stop,
		}

		let mut ticker = interval(self.ctx.config.metrics_tick());
		ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

		let mut msg_stream = pin!((
			IntervalStream::new(ticker).map(|_| RunnerMessage::Tick),
			stream::once(cancel.cancelled_owned()).map(|()| RunnerMessage::Stop),
		)
			.merge());

		while let Some(msg) = msg_stream.next().await {
			match msg {
				RunnerMessage::Tick => {
					self.ctx.metrics.set_unsynced_queue_length(self.queue_rx.len());
				}

				RunnerMessage::Stop => break,
			}
		}

		self.root_token.cancel();

		for res in workers.join().await {
			if let Err(e) = res {
				error!(?e, "Stream sync worker panicked;");
			}
		}

		info!("Stream sync workers stopped;");
	}

	async fn work(self: Arc<Self>, worker_id: usize) {
		loop {
			let record = tokio::select! {
				biased;

				() = self.root_token.cancelled() => break,

				record = self.queue_rx.recv() => {
					// The context keeps a sender alive
					let Ok(record) = record else { break };
					record
				}
			};

			self.add_to_sync(record).await;
		}

		trace!(worker_id, "Stream sync worker exiting;");
	}

	#[instrument(skip_all, fields(stream_id = %record.stream_id))]
	async fn add_to_sync(&self, record: Arc<StreamSyncInitRecord>) {
		let target = record.remotes.sticky_peer();
		if target.is_zero() {
			warn!("Stream has no remote peers to sync from, dropping it;");
			return;
		}

		let semaphore = self.node_semaphore(target);

		let Some(runner) = self.unfilled_sync(target, &semaphore).await else {
			return;
		};

		let res = {
			let Some(_permit) = self.acquire(&semaphore).await else {
				return;
			};
			let _in_flight = self.ctx.metrics.sync_session_in_flight(target);

			runner.add_stream(Arc::clone(&record)).await
		};

		let Err(e) = res else {
			debug!(
				%target,
				sync_id = runner.sync_id(),
				streams = runner.len(),
				"Stream added to sync session;"
			);
			return;
		};

		match e.code() {
			ErrorCode::SyncSessionRunnerUnassignable | ErrorCode::Unavailable => {
				if self
					.replace_runner(target, &runner, &semaphore)
					.await
					.is_none()
				{
					return;
				}

				let new_target = record.remotes.advance_sticky_peer(target);
				debug!(%target, %new_target, "Sync session runner unassignable, moving stream;");
			}

			ErrorCode::NotFound => {
				warn!(%target, "Remote node lost the sync session, closing its runner;");
				runner.close(e).await;
			}

			_ => error!(?e, %target, "Failed to add stream to sync session;"),
		}

		self.ctx.requeue(record, &self.root_token).await;
	}

	fn node_semaphore(&self, node: Address) -> Arc<Semaphore> {
		Arc::clone(
			self.node_requests
				.entry(node)
				.or_insert_with(|| {
					Arc::new(Semaphore::new(self.ctx.config.max_concurrent_node_requests))
				})
				.value(),
		)
	}

	async fn acquire<'sem>(&self, semaphore: &'sem Semaphore) -> Option<SemaphorePermit<'sem>> {
		tokio::select! {
			biased;

			() = self.root_token.cancelled() => None,

			permit = semaphore.acquire() => permit.ok(),
		}
	}

	fn new_runner(&self, node: Address) -> Arc<SyncSessionRunner> {
		// `new` rejects an empty registry list
		let index = rand::thread_rng().gen_range(0..self.node_registries.len());
		let registry = &self.node_registries[index];

		SyncSessionRunner::new(
			Arc::clone(&self.ctx),
			Arc::clone(registry),
			&self.root_token,
			node,
		)
	}

	/// Open runner of `node`, created and started when there is none yet. `None` on shutdown.
	async fn unfilled_sync(
		&self,
		node: Address,
		semaphore: &Semaphore,
	) -> Option<Arc<SyncSessionRunner>> {
		if let Some(runner) = self
			.unfilled_syncs
			.get(&node)
			.map(|entry| Arc::clone(entry.value()))
		{
			runner.wait_until_started().await;
			return Some(runner);
		}

		let _permit = self.acquire(semaphore).await?;

		let (runner, created) = match self.unfilled_syncs.entry(node) {
			Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
			Entry::Vacant(entry) => {
				let runner = self.new_runner(node);
				entry.insert(Arc::clone(&runner));
				(runner, true)
			}
		};

		if created {
			debug!(%node, "Starting new sync session runner;");
			spawn(Arc::clone(&runner).run());
		}

		runner.wait_until_started().await;

		Some(runner)
	}

	/// Swaps `old` for a fresh runner, unless another worker already did. `None` on shutdown.
	async fn replace_runner(
		&self,
		node: Address,
		old: &Arc<SyncSessionRunner>,
		semaphore: &Semaphore,
	) -> Option<()> {
		let _permit = self.acquire(semaphore).await?;

		let replacement = match self.unfilled_syncs.get_mut(&node) {
			Some(mut current) if Arc::ptr_eq(current.value(), old) => {
				let runner = self.new_runner(node);
				*current = Arc::clone(&runner);
				Some(runner)
			}
			_ => None,
		};

		if let Some(runner) = replacement {
			debug!(%node, "Replacing unassignable sync session runner;");
			spawn(Arc::clone(&runner).run());
			runner.wait_until_started().await;
		}

		Some(())
	}
}
