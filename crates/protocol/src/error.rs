use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use thiserror::Error;

use super::Hash;

/// Stable error codes, shared between node responses and the errors raised by the tracking
/// crates so a failure can be classified without matching on message strings.
#[derive(
	Debug,
	Clone,
	Copy,
	PartialEq,
	Eq,
	Hash,
	Default,
	Serialize,
	Deserialize,
	Display,
	EnumString,
	IntoStaticStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
	#[default]
	Unknown,
	Internal,
	Canceled,
	DeadlineExceeded,
	NotFound,
	Unavailable,
	BufferFull,
	BadStreamId,
	BadEvent,
	DbOperationFailure,
	UnexpectedSyncOp,
	SyncSessionRunnerUnassignable,
	SyncSessionRunnerEmpty,
}

#[derive(Debug, Error)]
pub enum Error {
	#[error("invalid stream id length: {0}")]
	InvalidStreamIdLength(usize),
	#[error("stream id length {len} does not match the length required by its type {expected}")]
	StreamIdLengthMismatch { len: usize, expected: usize },
	#[error("unknown stream type prefix: {0:#04x}")]
	UnknownStreamType(u8),
	#[error("invalid address length: {0}")]
	InvalidAddressLength(usize),
	#[error("invalid hash length: {0}")]
	InvalidHashLength(usize),
	#[error("invalid hex: {0}")]
	Hex(#[from] hex::FromHexError),
	#[error("event hash mismatch <envelope='{envelope}', computed='{computed}'>")]
	EventHashMismatch { envelope: Hash, computed: Hash },
	#[error("failed to decode event: {0}")]
	EventDecode(#[from] rmp_serde::decode::Error),
	#[error("failed to encode event: {0}")]
	EventEncode(#[from] rmp_serde::encode::Error),
	#[error("miniblock header envelope does not hold a miniblock header <hash='{0}'>")]
	NotAMiniblockHeader(Hash),
}

impl Error {
	#[must_use]
	pub const fn code(&self) -> ErrorCode {
		match self {
			Self::InvalidStreamIdLength(_)
			| Self::StreamIdLengthMismatch { .. }
			| Self::UnknownStreamType(_) => ErrorCode::BadStreamId,
			Self::EventHashMismatch { .. }
			| Self::EventDecode(_)
			| Self::NotAMiniblockHeader(_) => ErrorCode::BadEvent,
			Self::InvalidAddressLength(_)
			| Self::InvalidHashLength(_)
			| Self::Hex(_)
			| Self::EventEncode(_) => ErrorCode::Internal,
		}
	}
}

/// Error returned by a remote node call.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("rpc error <code='{code}'>: {message}")]
pub struct RpcError {
	pub code: ErrorCode,
	pub message: String,
}

impl RpcError {
	pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
		Self {
			code,
			message: message.into(),
		}
	}

	#[must_use]
	pub const fn code(&self) -> ErrorCode {
		self.code
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn error_codes_render_in_wire_format() {
		assert_eq!(
			ErrorCode::SyncSessionRunnerUnassignable.to_string(),
			"SYNC_SESSION_RUNNER_UNASSIGNABLE"
		);
		assert_eq!(
			"BUFFER_FULL".parse::<ErrorCode>().unwrap(),
			ErrorCode::BufferFull
		);
	}
}
