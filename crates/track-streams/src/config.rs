use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_NUM_WORKERS: usize = 20;
const DEFAULT_STREAMS_PER_SYNC_SESSION: usize = 100;
const DEFAULT_MAX_CONCURRENT_NODE_REQUESTS: usize = 50;
const DEFAULT_QUEUE_CAPACITY: usize = 2048;
const DEFAULT_MESSAGE_BUFFER_CAPACITY: usize = 2048;
const DEFAULT_MODIFY_SYNC_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_METRICS_TICK_MS: u64 = 1_000;

/// Tuning knobs of the stream tracking layer, meant to be embedded in the host service's own
/// configuration file. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamTrackingConfig {
	/// Workers placing queued streams into sync sessions.
	pub num_workers: usize,
	/// A session accepts at most `streams_per_sync_session - 1` streams.
	pub streams_per_sync_session: usize,
	/// Concurrent session setup and modify requests allowed per remote node.
	pub max_concurrent_node_requests: usize,
	/// Streams waiting for (re)placement before producers start to block.
	pub queue_capacity: usize,
	/// Responses a session may hold before it is considered stuck and closed.
	pub message_buffer_capacity: usize,
	pub modify_sync_request_timeout_ms: u64,
	pub metrics_tick_ms: u64,
}

impl Default for StreamTrackingConfig {
	fn default() -> Self {
		Self {
			num_workers: DEFAULT_NUM_WORKERS,
			streams_per_sync_session: DEFAULT_STREAMS_PER_SYNC_SESSION,
			max_concurrent_node_requests: DEFAULT_MAX_CONCURRENT_NODE_REQUESTS,
			queue_capacity: DEFAULT_QUEUE_CAPACITY,
			message_buffer_capacity: DEFAULT_MESSAGE_BUFFER_CAPACITY,
			modify_sync_request_timeout_ms: DEFAULT_MODIFY_SYNC_REQUEST_TIMEOUT_MS,
			metrics_tick_ms: DEFAULT_METRICS_TICK_MS,
		}
	}
}

impl StreamTrackingConfig {
	/// Replaces zeroed values with their defaults.
	#[must_use]
	pub fn normalized(mut self) -> Self {
		fn or_default<T: PartialEq + Default>(value: &mut T, default: T) {
			if *value == T::default() {
				*value = default;
			}
		}

		or_default(&mut self.num_workers, DEFAULT_NUM_WORKERS);
		or_default(
			&mut self.streams_per_sync_session,
			DEFAULT_STREAMS_PER_SYNC_SESSION,
		);
		or_default(
			&mut self.max_concurrent_node_requests,
			DEFAULT_MAX_CONCURRENT_NODE_REQUESTS,
		);
		or_default(&mut self.queue_capacity, DEFAULT_QUEUE_CAPACITY);
		or_default(
			&mut self.message_buffer_capacity,
			DEFAULT_MESSAGE_BUFFER_CAPACITY,
		);
		or_default(
			&mut self.modify_sync_request_timeout_ms,
			DEFAULT_MODIFY_SYNC_REQUEST_TIMEOUT_MS,
		);
		or_default(&mut self.metrics_tick_ms, DEFAULT_METRICS_TICK_MS);

		self
	}

	#[must_use]
	pub const fn modify_sync_request_timeout(&self) -> Duration {
		Duration::from_millis(self.modify_sync_request_timeout_ms)
	}

	#[must_use]
	pub const fn metrics_tick(&self) -> Duration {
		Duration::from_millis(self.metrics_tick_ms)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use pretty_assertions::assert_eq;

	#[test]
	fn partial_configs_fall_back_to_defaults() {
		let config = serde_json::from_str::<StreamTrackingConfig>(
			r#"{ "num_workers": 4, "streams_per_sync_session": 0 }"#,
		)
		.unwrap()
		.normalized();

		assert_eq!(config.num_workers, 4);
		assert_eq!(config.streams_per_sync_session, 100);
		assert_eq!(config.max_concurrent_node_requests, 50);
		assert_eq!(config.queue_capacity, 2048);
		assert_eq!(config.modify_sync_request_timeout(), Duration::from_secs(10));
		assert_eq!(config.metrics_tick(), Duration::from_secs(1));
	}
}
