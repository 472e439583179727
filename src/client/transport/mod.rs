//! Client transports.
//!
//! A transport carries one request batch to the server and returns the reply
//! batch. `abort` tears down whatever is in flight; the transport stays
//! usable for later requests.

mod long_polling;
mod websocket;

pub use long_polling::LongPollingTransport;
pub use websocket::WebSocketTransport;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::client::TransportError;
use crate::domain::entities::Message;

#[async_trait]
pub trait ClientTransport: Send + Sync {
    /// Bayeux connection type, e.g. `"websocket"`
    fn name(&self) -> &'static str;

    async fn send(&self, messages: Vec<Message>) -> Result<Vec<Message>, TransportError>;

    fn abort(&self);
}

/// Cancels every request started before the last `abort`.
#[derive(Debug, Default)]
pub(crate) struct AbortSignal {
    current: Mutex<CancellationToken>,
}

impl AbortSignal {
    pub(crate) fn token(&self) -> CancellationToken {
        self.current.lock().clone()
    }

    pub(crate) fn abort(&self) {
        let previous = std::mem::take(&mut *self.current.lock());
        previous.cancel();
    }
}
