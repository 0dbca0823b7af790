//! HTTP subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, tower layers, graceful shutdown)
//!     → request.rs (assign / propagate x-request-id)
//!     → dispatch.rs (transaction created and bound)
//!     → route handler
//!         → outbound.rs (outbound calls run without the transaction)
//!     → dispatch.rs (transaction finalized when the body completes)
//!     → Send to client
//! ```

pub mod dispatch;
pub mod outbound;
pub mod request;
pub mod server;

pub use dispatch::{DispatchShim, Dispatcher};
pub use outbound::{OutboundClient, OutboundError};
pub use request::X_REQUEST_ID;
pub use server::{HttpServer, ServerError};
