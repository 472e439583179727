//! Bayeux client.
//!
//! [`Negotiator`] picks a transport (websocket, then long-polling), falls
//! back when one fails to answer within the connect timeout, and then
//! follows the server's reconnect advice. Observers hear about it through
//! the [`EventBus`].

pub mod backoff;
mod error;
pub mod events;
pub mod negotiator;
pub mod transport;

pub use backoff::Backoff;
pub use error::{NegotiatorError, TransportError};
pub use events::{ClientEvent, DisconnectReason, EventBus, ListenerId};
pub use negotiator::{Negotiator, NegotiatorState};
pub use transport::{ClientTransport, LongPollingTransport, WebSocketTransport};
