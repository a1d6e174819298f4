//! Request channel from proxies to a backing store

use tokio::sync::{mpsc, oneshot};

use strand_core::{StoreRequest, StrandError, StrandResult};

/// Receiving end of a store channel, held by the backing store
pub type RequestReceiver = mpsc::UnboundedReceiver<StoreRequest>;

/// Sending half of the proxy-to-store channel
///
/// Writes are fire-and-forget; reads and cursor operations are correlated
/// with their answer through a oneshot carried in the request.
#[derive(Clone, Debug)]
pub struct StoreChannel {
    tx: mpsc::UnboundedSender<StoreRequest>,
}

impl StoreChannel {
    /// Create a channel and the receiver the store serves
    pub fn new() -> (Self, RequestReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (StoreChannel { tx }, rx)
    }

    /// Send a request without waiting for any answer
    pub fn send(&self, request: StoreRequest) -> StrandResult<()> {
        tracing::trace!(operation = request.operation(), "store request");
        self.tx.send(request).map_err(|err| {
            tracing::error!(operation = err.0.operation(), "store channel closed");
            StrandError::ChannelClosed
        })
    }

    /// Send a request and wait for its answer
    pub async fn request<T>(
        &self,
        operation: &'static str,
        build: impl FnOnce(oneshot::Sender<T>) -> StoreRequest,
    ) -> StrandResult<T> {
        let (reply, answer) = oneshot::channel();
        self.send(build(reply))?;
        answer
            .await
            .map_err(|_| StrandError::NoResponse { operation })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
