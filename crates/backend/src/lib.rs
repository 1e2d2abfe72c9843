//! Chat-completion backend integration.
//!
//! Provides the HTTP transport for chat-style inference endpoints, the
//! bounded per-worker conversation [`Session`] with compliance
//! reminders, and the batch [`Connector`] that composes requests and
//! maps parsed records back to items.

pub mod connector;
pub mod session;
pub mod transport;

pub use connector::{Connector, SendError};
pub use session::{Session, SessionConfig};
pub use transport::{BackendError, ChatMessage, ChatTransport, HttpTransport};
