//! Incoming protocol handler for storage nodes.
//!
//! Implements iroh's [`ProtocolHandler`] trait so the iroh [`Router`] hands
//! every gateway connection to the node's [`NodeService`].
//!
//! [`ProtocolHandler`]: iroh::protocol::ProtocolHandler
//! [`Router`]: iroh::protocol::Router

use std::fmt;
use std::sync::Arc;

use iroh::endpoint::Connection;
use iroh::protocol::AcceptError;
use reef_net::NodeService;
use tracing::{debug, warn};

/// Serves chunk uploads and downloads on accepted connections.
///
/// Each bidirectional stream carries one transfer and is handled on its own
/// task, so a gateway can move several chunks over one connection at once.
pub struct NodeProtocol {
    service: Arc<NodeService>,
}

impl fmt::Debug for NodeProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeProtocol").finish_non_exhaustive()
    }
}

impl NodeProtocol {
    /// Create a handler around `service`.
    pub fn new(service: Arc<NodeService>) -> Self {
        Self { service }
    }
}

impl iroh::protocol::ProtocolHandler for NodeProtocol {
    async fn accept(&self, conn: Connection) -> Result<(), AcceptError> {
        let remote = conn.remote_id();
        debug!(remote = %remote.fmt_short(), "gateway connected");

        loop {
            let (send, recv) = match conn.accept_bi().await {
                Ok(streams) => streams,
                Err(e) => {
                    debug!(remote = %remote.fmt_short(), %e, "connection closed");
                    break;
                }
            };

            let service = Arc::clone(&self.service);
            tokio::spawn(async move {
                if let Err(e) = service.handle_stream(recv, send).await {
                    warn!(remote = %remote.fmt_short(), %e, "stream failed");
                }
            });
        }

        Ok(())
    }
}
