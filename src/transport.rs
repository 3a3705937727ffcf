//! Transport abstraction for lobby and matchmaking-frontend traffic.
//!
//! The [`Transport`] trait defines a bidirectional text message channel. Both
//! the lobby protocol and the frontend protocol are JSON text messages, so
//! every implementation must handle message framing internally (WebSocket
//! frames, length-prefixed TCP and so on).
//!
//! Sockets are never opened by this crate directly. A [`Connector`] turns an
//! [`Endpoint`] into a connected [`Transport`]; the concrete implementation is
//! supplied by the game.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use match_handoff::error::HandoffError;
//! use match_handoff::transport::Transport;
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), HandoffError> {
//!         // Send the JSON text message over your transport
//!         Ok(())
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, HandoffError>> {
//!         // Return None when the connection is closed cleanly
//!         None
//!     }
//!
//!     async fn close(&mut self) -> Result<(), HandoffError> {
//!         Ok(())
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::HandoffError;
use crate::protocol::Endpoint;

/// A bidirectional text message transport.
///
/// Each call to [`send`](Transport::send) transmits one complete JSON message
/// and each call to [`recv`](Transport::recv) returns one.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe because it is polled
/// inside `tokio::select!`. Channel-based implementations are naturally
/// cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text message.
    ///
    /// # Errors
    ///
    /// Returns [`HandoffError::TransportSend`] if the message could not be sent.
    async fn send(&mut self, message: String) -> Result<(), HandoffError>;

    /// Receive the next JSON text message.
    ///
    /// Returns:
    /// - `Some(Ok(text))`: a complete message was received
    /// - `Some(Err(e))`: a transport error occurred
    /// - `None`: the peer closed the connection cleanly
    async fn recv(&mut self) -> Option<Result<String, HandoffError>>;

    /// Close the connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful shutdown fails. Implementations should
    /// still release resources in that case.
    async fn close(&mut self) -> Result<(), HandoffError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn send(&mut self, message: String) -> Result<(), HandoffError> {
        (**self).send(message).await
    }

    async fn recv(&mut self) -> Option<Result<String, HandoffError>> {
        (**self).recv().await
    }

    async fn close(&mut self) -> Result<(), HandoffError> {
        (**self).close().await
    }
}

/// Opens transports to endpoints.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connect to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`HandoffError::Connect`] (or an I/O error) when the endpoint
    /// cannot be reached.
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Transport>, HandoffError>;
}
