//!
//! # River Track Streams
//!
//! Keeps a large, changing set of River streams synced from their remote replicas:
//! - [`StreamsTracker`] decides which registry streams to watch;
//! - [`MultiSyncRunner`] places every watched stream in a sync session on one of its replicas;
//! - each session feeds the updates of its streams to the consumer's [`TrackedStreamView`]s,
//!   recovering content gaps after resets and relocating streams away from failing nodes.
//!

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod config;
mod dynamic_buffer;
mod error;
mod metrics;
mod multi_sync_runner;
mod record;
mod session_runner;
mod tracker;
mod view;

#[cfg(test)]
mod test_utils;

pub use config::StreamTrackingConfig;
pub use dynamic_buffer::{BufferFull, DynamicBuffer};
pub use error::Error;
pub use metrics::{MetricsSnapshot, SyncMetrics};
pub use multi_sync_runner::MultiSyncRunner;
pub use record::{COLD_START_MINIPOOL_GEN, COLD_START_PREV_MINIBLOCK_HASH};
pub use tracker::StreamsTracker;
pub use view::{OnChainConfig, StreamFilter, StreamPlacementListener, TrackedStreamView};
