use river_protocol::{Address, ErrorCode, RpcError, StreamId, SyncOp};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
	#[error("sync session runner is not assignable <node='{node}'>")]
	Unassignable { node: Address },
	#[error("sync session runner has no streams remaining <node='{node}'>")]
	SessionEmpty { node: Address },
	#[error(
		"failed to add stream to existing sync \
		<stream_id='{stream_id}', sync_id='{sync_id}', node='{node}', code='{code}'>: {message}"
	)]
	AddStreamRejected {
		stream_id: StreamId,
		sync_id: String,
		node: Address,
		code: ErrorCode,
		message: String,
	},
	#[error("modify sync request timed out <stream_id='{stream_id}', sync_id='{sync_id}'>")]
	ModifyTimeout { stream_id: StreamId, sync_id: String },
	#[error("unexpected sync operation <sync_op='{sync_op}', sync_id='{sync_id}'>")]
	UnexpectedSyncOp { sync_op: SyncOp, sync_id: String },
	#[error("invalid SYNC_UPDATE, missing stream <sync_id='{sync_id}'>")]
	MissingStream { sync_id: String },
	#[error("error constructing tracked view for stream <stream_id='{stream_id}'>: {source}")]
	ViewConstruction {
		stream_id: StreamId,
		source: anyhow::Error,
	},
	#[error("expected reset for stream's first update <stream_id='{stream_id}', sync_id='{sync_id}'>")]
	MissingReset { stream_id: StreamId, sync_id: String },
	#[error("sync session runner messages buffer is full <node='{node}'>")]
	BufferFull { node: Address },
	#[error("remote node closed the sync stream <node='{node}', sync_id='{sync_id}'>")]
	RemoteDisconnected { node: Address, sync_id: String },
	#[error("at least one node registry is required")]
	NoNodeRegistries,
	#[error("stream tracking was canceled")]
	Canceled,

	// Crate errors
	#[error(transparent)]
	Nodes(#[from] river_nodes::Error),
	#[error(transparent)]
	Rpc(#[from] RpcError),
	#[error(transparent)]
	CookieStore(#[from] river_cookie_store::Error),
}

impl Error {
	#[must_use]
	pub const fn code(&self) -> ErrorCode {
		match self {
			Self::Unassignable { .. } => ErrorCode::SyncSessionRunnerUnassignable,
			Self::SessionEmpty { .. } => ErrorCode::SyncSessionRunnerEmpty,
			Self::AddStreamRejected { code, .. } => *code,
			Self::ModifyTimeout { .. } => ErrorCode::DeadlineExceeded,
			Self::UnexpectedSyncOp { .. } => ErrorCode::UnexpectedSyncOp,
			Self::MissingStream { .. } => ErrorCode::BadStreamId,
			Self::ViewConstruction { .. } | Self::MissingReset { .. } | Self::NoNodeRegistries => {
				ErrorCode::Internal
			}
			Self::BufferFull { .. } => ErrorCode::BufferFull,
			Self::RemoteDisconnected { .. } => ErrorCode::Unavailable,
			Self::Canceled => ErrorCode::Canceled,
			Self::Nodes(e) => e.code(),
			Self::Rpc(e) => e.code(),
			Self::CookieStore(e) => e.code(),
		}
	}

	/// Closing with a cancellation means the process is shutting down, nothing gets relocated.
	#[must_use]
	pub const fn is_cancellation(&self) -> bool {
		matches!(self.code(), ErrorCode::Canceled)
	}
}
