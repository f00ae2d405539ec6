use crate::{record::PersistedPosition, view::TrackedStreamView, Error};

use river_nodes::NodeRegistry;
use river_protocol::{Address, GetMiniblocksRequest, Miniblock, ParsedEvent, StreamId};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::SyncSessionRunner;

impl SyncSessionRunner {
	/// Detects miniblocks produced while nobody was watching the stream and notifies the view
	/// about their events.
	///
	/// Returns the snapshot miniblock number of the reset, `None` when the reset carried no
	/// usable miniblock.
	pub(super) async fn handle_gap_on_reset(
		&self,
		stream_id: &StreamId,
		persisted: Option<PersistedPosition>,
		view: &dyn TrackedStreamView,
		miniblocks: &[Miniblock],
	) -> Option<i64> {
		let first = miniblocks.first()?;

		let server_snapshot = match first.number() {
			Ok(number) => number,
			Err(e) => {
				error!(?e, %stream_id, "Failed to read the snapshot miniblock of a reset;");
				return None;
			}
		};

		// Nothing was persisted, so there is no earlier position to recover from
		let Some(persisted) = persisted else {
			return Some(server_snapshot);
		};

		if persisted.snapshot_miniblock == server_snapshot {
			return Some(server_snapshot);
		}

		if persisted.minipool_gen > server_snapshot {
			debug!(
				%stream_id,
				persisted_minipool_gen = persisted.minipool_gen,
				server_snapshot,
				"Persisted position is ahead of the reset snapshot, skipping gap recovery;"
			);
			return Some(server_snapshot);
		}

		info!(
			%stream_id,
			from_inclusive = persisted.minipool_gen,
			to_exclusive = server_snapshot,
			"Detected gap on reset, fetching missing miniblocks;"
		);

		match fetch_miniblocks(
			self.node_registry.as_ref(),
			self.node,
			*stream_id,
			persisted.minipool_gen,
			server_snapshot,
			&self.sync_token,
		)
		.await
		{
			Ok(missing) => {
				info!(%stream_id, count = missing.len(), "Recovered missing miniblocks;");
				self.notify_events_from_miniblocks(stream_id, view, &missing)
					.await;
			}
			Err(e) => warn!(?e, %stream_id, "Failed to fetch missing miniblocks;"),
		}

		Some(server_snapshot)
	}

	/// Sends a notification for every event of `miniblocks`, in order. Broken events are logged
	/// and skipped.
	pub(super) async fn notify_events_from_miniblocks(
		&self,
		stream_id: &StreamId,
		view: &dyn TrackedStreamView,
		miniblocks: &[Miniblock],
	) {
		for envelope in miniblocks.iter().flat_map(|miniblock| &miniblock.events) {
			let event = match ParsedEvent::parse(envelope) {
				Ok(event) => event,
				Err(e) => {
					error!(?e, %stream_id, hash = %envelope.hash, "Failed to parse miniblock event;");
					continue;
				}
			};

			if let Err(e) = view.send_event_notification(&event).await {
				error!(?e, %stream_id, hash = %event.hash, "Failed to send event notification;");
			}
		}
	}
}

async fn fetch_miniblocks(
	node_registry: &dyn NodeRegistry,
	node: Address,
	stream_id: StreamId,
	from_inclusive: i64,
	to_exclusive: i64,
	cancel: &CancellationToken,
) -> Result<Vec<Miniblock>, Error> {
	let client = node_registry.stream_service_client(&node)?;

	let request = GetMiniblocksRequest {
		stream_id,
		from_inclusive,
		to_exclusive,
		omit_snapshots: true,
	};

	tokio::select! {
		biased;

		() = cancel.cancelled() => Err(Error::Canceled),

		res = client.get_miniblocks(request) => Ok(res?.miniblocks),
	}
}
