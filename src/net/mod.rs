//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Listener configuration (cert_path, key_path)
//!     → tls.rs (file checks, PEM validation)
//!     → RustlsConfig
//!     → http::server (TLS accept loop)
//! ```
//!
//! # Design Decisions
//! - TLS is optional; without a certificate pair the server speaks plain HTTP
//! - PEM contents are validated up front so a bad key fails at startup with a
//!   message naming the file, not on the first handshake

pub mod tls;

pub use tls::{load_tls_config, TlsError};
