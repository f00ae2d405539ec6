//!
//! # River Nodes
//!
//! Everything the tracking layer needs to know about where a stream lives:
//! - [`StreamNodes`], the per-stream quorum view with a round robin sticky peer;
//! - registry records and change events ([`StreamWithId`], [`RegistryEvents`]);
//! - the node client seams ([`NodeRegistry`], [`StreamServiceClient`], [`RemoteStreamSyncer`]).
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

use river_protocol::{Address, ErrorCode, RpcError, StreamId};

use thiserror::Error;

mod client;
mod registry;
mod stream_nodes;

pub use client::{NodeRegistry, RemoteStreamSyncer, StreamServiceClient, SyncResponseStream};
pub use registry::{
	RegistryEvents, RegistryEventsSender, StreamMiniblockUpdate, StreamRegistry, StreamWithId,
	REGISTRY_EVENTS_CAPACITY,
};
pub use stream_nodes::StreamNodes;

#[derive(Debug, Error)]
pub enum Error {
	#[error("no client available for node <node='{0}'>")]
	UnknownNode(Address),
	#[error("stream not found in registry <stream_id='{0}'>")]
	StreamNotFound(StreamId),
	#[error("registry subscription failed: {0}")]
	Subscription(String),
	#[error("registry read failed: {0}")]
	Registry(String),
	#[error(transparent)]
	Rpc(#[from] RpcError),
}

impl Error {
	#[must_use]
	pub const fn code(&self) -> ErrorCode {
		match self {
			Self::UnknownNode(_) => ErrorCode::Unavailable,
			Self::StreamNotFound(_) => ErrorCode::NotFound,
			Self::Subscription(_) | Self::Registry(_) => ErrorCode::Internal,
			Self::Rpc(e) => e.code,
		}
	}
}
