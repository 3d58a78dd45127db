//! Call channel between cluster members and the hub.

use ipc_mutex_core::prelude::*;
use tokio::sync::{mpsc, oneshot};

/// A call a cluster member issues against the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterRequest {
    /// Announces a new member to the primary (issued on `open()`).
    Register,
    /// Requests the lock for `resource`; replied to once granted. The
    /// `request` id identifies this attempt so an abandoned grant can be
    /// reaped without touching another member's hold.
    Acquire { resource: String, request: u64 },
    /// Releases the lock for `resource`.
    Release { resource: String },
    /// Withdraws acquire attempt `request` after its deadline expired.
    Abandon { resource: String, request: u64 },
    /// Drops any held grant for `resource` (issued on primary `close()`).
    Destroy { resource: String },
}

/// Reply to a [`ClusterRequest`]; errors travel as strings over the channel.
pub type ClusterReply = Result<(), String>;

type CallSender = mpsc::Sender<(ClusterRequest, oneshot::Sender<ClusterReply>)>;

/// In-process request/reply channel to a [`ClusterHub`](crate::ClusterHub).
///
/// Each request is served on its own task so a pending grant never blocks
/// other members' calls. Clones address the same hub.
#[derive(Clone)]
pub struct LocalChannel {
    tx: CallSender,
}

impl LocalChannel {
    /// Spawns a serve loop for `hub` and returns a channel to it.
    ///
    /// The loop ends once every channel clone is dropped.
    pub fn spawn(hub: crate::ClusterHub) -> Self {
        let (tx, mut rx) = mpsc::channel::<(ClusterRequest, oneshot::Sender<ClusterReply>)>(16);
        tokio::spawn(async move {
            while let Some((request, reply_tx)) = rx.recv().await {
                let hub = hub.clone();
                tokio::spawn(async move {
                    let _ = reply_tx.send(hub.handle(request).await);
                });
            }
        });
        Self { tx }
    }

    /// Issues one call and waits for the reply.
    pub async fn call(&self, request: ClusterRequest) -> MutexResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((request, reply_tx))
            .await
            .map_err(|_| connection_lost())?;
        match reply_rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => Err(MutexError::Backend(message.into())),
            Err(_) => Err(connection_lost()),
        }
    }
}

fn connection_lost() -> MutexError {
    MutexError::Connection(
        std::io::Error::new(std::io::ErrorKind::BrokenPipe, "cluster channel closed").into(),
    )
}
