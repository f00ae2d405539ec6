//!
//! # River Protocol
//!
//! Plain Rust renditions of the messages exchanged with River stream nodes: stream ids, node
//! addresses, event envelopes, miniblocks and the streaming sync wire messages.
//!
//! Nothing in here talks to the network. Node clients live in `river-nodes` and the tracking
//! machinery in `river-track-streams`; both only depend on the shapes defined here.
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

mod common;
mod error;
mod event;
mod stream_id;
mod sync;

pub use common::{Address, Hash};
pub use error::{Error, ErrorCode, RpcError};
pub use event::{Envelope, EventPayload, Miniblock, MiniblockHeader, ParsedEvent, StreamEvent};
pub use stream_id::{StreamId, StreamType};
pub use sync::{
	GetMiniblocksRequest, GetMiniblocksResponse, ModifySyncRequest, ModifySyncResponse,
	StreamAndCookie, SyncCookie, SyncOp, SyncStreamOpStatus, SyncStreamsResponse,
};
