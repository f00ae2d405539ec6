use crate::{
	record::{PersistedPosition, RecordState, StreamSyncInitRecord},
	view::TrackedStreamView,
	Error,
};

use river_protocol::{ParsedEvent, StreamAndCookie, StreamId, SyncCookie, SyncOp, SyncStreamsResponse};

use std::sync::Arc;

use tracing::{debug, error, info, instrument};

use super::SyncSessionRunner;

impl SyncSessionRunner {
	pub(super) async fn process_sync_update(&self, update: SyncStreamsResponse) {
		match update.sync_op {
			SyncOp::SyncUpdate => {
				let Some(stream) = update.stream else {
					error!(
						sync_id = self.sync_id(),
						"Received corrupt update, missing stream;"
					);
					self.cancel_sync(Error::MissingStream {
						sync_id: self.sync_id().to_string(),
					});
					return;
				};

				let stream_id = *stream.stream_id();

				let Some(record) = self
					.records
					.get(&stream_id)
					.map(|entry| Arc::clone(entry.value()))
				else {
					error!(
						%stream_id,
						sync_id = self.sync_id(),
						"Expected stream id for sync to be in the sync session runner records;"
					);
					return;
				};

				self.apply_update_to_stream(stream, &record).await;
			}

			SyncOp::SyncDown => {
				self.ctx.metrics.sync_down(self.node);
				info!(
					stream_id = ?update.stream_id,
					sync_id = self.sync_id(),
					node = %self.node,
					"Received SYNC_DOWN from remote node;"
				);
			}

			SyncOp::SyncClose | SyncOp::SyncPong | SyncOp::SyncUnspecified | SyncOp::SyncNew => {
				self.cancel_sync(Error::UnexpectedSyncOp {
					sync_op: update.sync_op,
					sync_id: self.sync_id().to_string(),
				});
			}
		}
	}

	#[instrument(skip_all, fields(stream_id = %record.stream_id, reset = stream.sync_reset))]
	pub(super) async fn apply_update_to_stream(
		&self,
		stream: StreamAndCookie,
		record: &StreamSyncInitRecord,
	) {
		let stream_id = record.stream_id;
		let reset = stream.sync_reset;

		self.ctx.metrics.sync_update(reset);

		let mut state = record.state.lock().await;

		if reset {
			match self
				.ctx
				.filter
				.new_tracked_stream(stream_id, &self.ctx.on_chain_config, &stream)
				.await
			{
				Ok(view) => {
					self.ctx.metrics.stream_tracked(stream_id.stream_type());
					state.view = Some(view);
				}
				Err(e) => {
					error!(?e, "Error constructing tracked view for stream;");
					self.cancel_sync(Error::ViewConstruction {
						stream_id,
						source: e,
					});
					return;
				}
			}
		}

		let RecordState {
			view,
			minipool_gen,
			prev_miniblock_hash,
			historical,
			snapshot_miniblock,
			persisted,
		} = &mut *state;

		let Some(view) = view.as_mut() else {
			error!(
				sync_id = self.sync_id(),
				"Expected a reset as the first update of a stream;"
			);
			self.cancel_sync(Error::MissingReset {
				stream_id,
				sync_id: self.sync_id().to_string(),
			});
			return;
		};

		if reset {
			// A reset's miniblocks are already part of the freshly built view
			if let Some(server_snapshot) = self
				.handle_gap_on_reset(&stream_id, *persisted, &**view, &stream.miniblocks)
				.await
			{
				*snapshot_miniblock = server_snapshot;

				if historical.enabled {
					let start = historical.start_index(server_snapshot);
					self.notify_events_from_miniblocks(
						&stream_id,
						&**view,
						stream.miniblocks.get(start..).unwrap_or_default(),
					)
					.await;
				}
			}
		} else {
			for miniblock in &stream.miniblocks {
				if let Err(e) = view.apply_block(miniblock, stream.snapshot.as_ref()) {
					error!(?e, "Unable to apply block;");
				}
			}
		}

		for envelope in &stream.events {
			if historical.enabled {
				match ParsedEvent::parse(envelope) {
					Ok(event) => {
						if let Err(e) = view.send_event_notification(&event).await {
							error!(?e, hash = %envelope.hash, "Unable to notify about historical event;");
						}
					}
					Err(e) => error!(?e, hash = %envelope.hash, "Unable to parse historical event;"),
				}
			} else if let Err(e) = view.apply_event(envelope).await {
				error!(?e, hash = %envelope.hash, "Unable to apply event;");
			}
		}

		historical.enabled = false;
		*minipool_gen = stream.next_sync_cookie.minipool_gen;
		*prev_miniblock_hash = stream.next_sync_cookie.prev_miniblock_hash;

		self.maybe_persist_cookie(
			&stream_id,
			&stream.next_sync_cookie,
			&**view,
			persisted,
			*snapshot_miniblock,
		)
		.await;
	}

	/// Writes `cookie` to the cookie store when the view asks for it and the generation moved
	/// since the last write.
	async fn maybe_persist_cookie(
		&self,
		stream_id: &StreamId,
		cookie: &SyncCookie,
		view: &dyn TrackedStreamView,
		persisted: &mut Option<PersistedPosition>,
		snapshot_miniblock: i64,
	) {
		let Some(store) = &self.ctx.cookie_store else {
			return;
		};

		if persisted.is_some_and(|position| position.minipool_gen == cookie.minipool_gen) {
			return;
		}

		if !view.should_persist_cookie().await {
			return;
		}

		match store.write_sync_cookie(stream_id, cookie).await {
			Ok(()) => {
				debug!(%stream_id, minipool_gen = cookie.minipool_gen, "Persisted sync cookie;");
				*persisted = Some(PersistedPosition {
					snapshot_miniblock,
					minipool_gen: cookie.minipool_gen,
				});
			}
			Err(e) => error!(?e, %stream_id, "Failed to persist sync cookie;"),
		}
	}
}
