//! `selenia_tls`: handshake negotiation, record-layer encryption, session
//! management, and the cryptographic toolbox behind them, covering TLS 1.0
//! through TLS 1.3. See `DESIGN.md` for how each module grounds in the
//! teacher this crate was grown from.

pub mod codec;
pub mod config;
pub mod connection;
pub mod crypto;
pub mod error;
pub mod extensions;
pub mod handshake;
pub mod kex;
pub mod key_schedule;
pub mod logger;
pub mod message;
pub mod protocol;
pub mod record;
pub mod session;
pub mod transcript;

pub use config::{Config, ConfigError};
pub use connection::Connection;
pub use error::TlsError;
pub use message::HeartbeatMode;
pub use protocol::{CipherSuite, ProtocolVersion};
pub use session::{Session, SessionCache};
