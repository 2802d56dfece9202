//! HandshakeFSM (§4.9): message types/codec plus the client- and
//! server-side state machines that negotiate version, cipher suite, key
//! exchange, and (for TLS 1.3) drive the full secret schedule.

pub mod client;
pub mod messages;
pub mod server;

pub use messages::{Alert, HandshakeMessage};

use crate::protocol::{CipherSuite, NamedGroup, ProtocolVersion, SignatureScheme};

/// Negotiated parameters both FSMs converge on by the time the handshake
/// reaches `Established`. `Connection` reads this to build the record
/// layer's post-handshake cipher states.
#[derive(Clone)]
pub struct NegotiatedParams {
    pub version: ProtocolVersion,
    pub cipher_suite: CipherSuite,
    pub extended_master_secret: bool,
    pub alpn_protocol: Option<Vec<u8>>,
    pub server_name: Option<String>,
}

/// Handshake progress, shared vocabulary between the client and server
/// FSMs even though the concrete transition tables differ (§4.9). Not
/// every state is reachable from every role; `client.rs`/`server.rs`
/// assert the subset they use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeState {
    Start,
    HelloSent,
    AwaitingServerHello,
    AwaitingHelloRetry,
    AwaitingEncryptedExtensions,
    AwaitingCertificateOrPsk,
    AwaitingCertificateVerify,
    AwaitingServerKeyExchange,
    AwaitingCertificateRequest,
    AwaitingServerHelloDone,
    SentClientFlight,
    AwaitingFinished,
    Established,
}

/// Key-exchange group and signature-scheme preference lists a `Config`
/// resolves into before the FSM starts, so negotiation never has to ask
/// the config object mid-handshake.
#[derive(Clone)]
pub struct NegotiationPolicy {
    pub min_version: ProtocolVersion,
    pub max_version: ProtocolVersion,
    pub cipher_suites: Vec<CipherSuite>,
    pub groups: Vec<NamedGroup>,
    pub ff_dh_groups: Vec<NamedGroup>,
    pub signature_schemes: Vec<SignatureScheme>,
    pub alpn_protocols: Vec<Vec<u8>>,
    pub require_extended_master_secret: bool,
    pub min_key_size: usize,
    pub max_key_size: usize,
}
