use river_protocol::{
	Address, GetMiniblocksRequest, GetMiniblocksResponse, ModifySyncRequest, ModifySyncResponse,
	RpcError, SyncCookie, SyncStreamsResponse,
};

use std::{fmt, pin::Pin, sync::Arc};

use async_trait::async_trait;
use futures::Stream;

use super::Error;

/// Server side stream of sync responses, ends when the remote closes the connection.
pub type SyncResponseStream =
	Pin<Box<dyn Stream<Item = Result<SyncStreamsResponse, RpcError>> + Send + 'static>>;

/// Handle on one established multiplexed sync session on a remote node.
#[async_trait]
pub trait RemoteStreamSyncer: fmt::Debug + Send + Sync + 'static {
	fn sync_id(&self) -> &str;

	fn node(&self) -> Address;

	/// Adds or removes streams from the running session. Per stream failures are reported in the
	/// response, the error is reserved for the request itself failing.
	async fn modify(&self, request: ModifySyncRequest) -> Result<ModifySyncResponse, RpcError>;

	/// Tears the remote session down, the response stream ends afterwards.
	async fn cancel(&self);
}

/// Client for the stream service of a single node.
#[async_trait]
pub trait StreamServiceClient: Send + Sync + 'static {
	/// Opens a sync session seeded with `cookies`. Resolves once the remote acknowledged the
	/// session and assigned it a sync id.
	async fn sync_streams(
		&self,
		cookies: Vec<SyncCookie>,
	) -> Result<(Arc<dyn RemoteStreamSyncer>, SyncResponseStream), RpcError>;

	async fn get_miniblocks(
		&self,
		request: GetMiniblocksRequest,
	) -> Result<GetMiniblocksResponse, RpcError>;
}

/// Directory of node clients.
pub trait NodeRegistry: Send + Sync + 'static {
	fn stream_service_client(&self, node: &Address)
		-> Result<Arc<dyn StreamServiceClient>, Error>;
}
