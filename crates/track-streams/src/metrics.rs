use river_protocol::{Address, StreamType};

use std::{
	collections::BTreeMap,
	hash::Hash,
	sync::atomic::{AtomicI64, AtomicU64, Ordering},
};

use dashmap::DashMap;
use serde::Serialize;

/// Process local counters of the tracking layer. Nothing here is exported, the host service
/// reads a [`MetricsSnapshot`] and publishes it however it likes.
#[derive(Debug, Default)]
pub struct SyncMetrics {
	total_streams: DashMap<StreamType, u64>,
	tracked_streams: DashMap<StreamType, u64>,
	sync_updates: AtomicU64,
	sync_resets: AtomicU64,
	sync_downs: DashMap<Address, u64>,
	open_sync_sessions: DashMap<Address, i64>,
	sync_sessions_in_flight: DashMap<Address, i64>,
	active_sync_sessions: AtomicI64,
	streams_per_sync_session: AtomicU64,
	unsynced_queue_length: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
	pub total_streams: BTreeMap<String, u64>,
	pub tracked_streams: BTreeMap<String, u64>,
	pub sync_updates: u64,
	pub sync_resets: u64,
	pub sync_downs: BTreeMap<String, u64>,
	pub open_sync_sessions: BTreeMap<String, i64>,
	pub sync_sessions_in_flight: BTreeMap<String, i64>,
	pub active_sync_sessions: i64,
	pub streams_per_sync_session: u64,
	pub unsynced_queue_length: u64,
}

fn add<K: Eq + Hash, V: Copy + Default + std::ops::Add<Output = V>>(
	map: &DashMap<K, V>,
	key: K,
	delta: V,
) {
	let mut entry = map.entry(key).or_default();
	*entry = *entry + delta;
}

fn labeled<K: ToString, V: Copy>(map: &DashMap<K, V>) -> BTreeMap<String, V>
where
	K: Eq + Hash,
{
	map.iter()
		.map(|entry| (entry.key().to_string(), *entry.value()))
		.collect()
}

/// Keeps a per node gauge up for as long as it lives.
#[must_use]
pub(crate) struct GaugeGuard<'a> {
	map: &'a DashMap<Address, i64>,
	node: Address,
}

impl Drop for GaugeGuard<'_> {
	fn drop(&mut self) {
		add(self.map, self.node, -1);
	}
}

/// Same as [`GaugeGuard`] for the global active sessions gauge.
#[must_use]
pub(crate) struct ActiveSessionGuard<'a>(&'a AtomicI64);

impl Drop for ActiveSessionGuard<'_> {
	fn drop(&mut self) {
		self.0.fetch_sub(1, Ordering::Relaxed);
	}
}

impl SyncMetrics {
	pub(crate) fn stream_added(&self, stream_type: StreamType) {
		add(&self.total_streams, stream_type, 1);
	}

	pub(crate) fn stream_tracked(&self, stream_type: StreamType) {
		add(&self.tracked_streams, stream_type, 1);
	}

	pub(crate) fn sync_update(&self, reset: bool) {
		if reset {
			self.sync_resets.fetch_add(1, Ordering::Relaxed);
		} else {
			self.sync_updates.fetch_add(1, Ordering::Relaxed);
		}
	}

	pub(crate) fn sync_down(&self, node: Address) {
		add(&self.sync_downs, node, 1);
	}

	pub(crate) fn open_sync_session(&self, node: Address) -> GaugeGuard<'_> {
		add(&self.open_sync_sessions, node, 1);
		GaugeGuard {
			map: &self.open_sync_sessions,
			node,
		}
	}

	pub(crate) fn sync_session_in_flight(&self, node: Address) -> GaugeGuard<'_> {
		add(&self.sync_sessions_in_flight, node, 1);
		GaugeGuard {
			map: &self.sync_sessions_in_flight,
			node,
		}
	}

	pub(crate) fn active_sync_session(&self) -> ActiveSessionGuard<'_> {
		self.active_sync_sessions.fetch_add(1, Ordering::Relaxed);
		ActiveSessionGuard(&self.active_sync_sessions)
	}

	pub(crate) fn observe_streams_per_sync_session(&self, streams: usize) {
		self.streams_per_sync_session
			.store(streams as u64, Ordering::Relaxed);
	}

	pub(crate) fn set_unsynced_queue_length(&self, len: usize) {
		self.unsynced_queue_length
			.store(len as u64, Ordering::Relaxed);
	}

	#[must_use]
	pub fn snapshot(&self) -> MetricsSnapshot {
		MetricsSnapshot {
			total_streams: labeled(&self.total_streams),
			tracked_streams: labeled(&self.tracked_streams),
			sync_updates: self.sync_updates.load(Ordering::Relaxed),
			sync_resets: self.sync_resets.load(Ordering::Relaxed),
			sync_downs: labeled(&self.sync_downs),
			open_sync_sessions: labeled(&self.open_sync_sessions),
			sync_sessions_in_flight: labeled(&self.sync_sessions_in_flight),
			active_sync_sessions: self.active_sync_sessions.load(Ordering::Relaxed),
			streams_per_sync_session: self.streams_per_sync_session.load(Ordering::Relaxed),
			unsynced_queue_length: self.unsynced_queue_length.load(Ordering::Relaxed),
		}
	}
}
