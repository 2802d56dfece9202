//! Connection (§4.11): the public facade. Owns a `HandshakeFSM` until it
//! reaches `Established`, then routes user bytes through `RecordLayer` /
//! `MessageSocket`. An alert received at any point surfaces as a typed
//! error rather than a panic or a silent drop.

use crate::config::Config;
use crate::error::TlsError;
use crate::handshake::client::ClientHandshake;
use crate::handshake::server::{ServerHandshake, ServerIdentity};
use crate::handshake::{messages::Alert, HandshakeState, NegotiationPolicy};
use crate::message::MessageSocket;
use crate::protocol::{AlertDescription, AlertLevel, CipherSuite, ContentType, KeyExchangeKind, ProtocolVersion, SignatureScheme};
use crate::record::layer::RecordLayer;
use crate::session::SessionCache;
use std::io::{Read, Write};
use std::sync::Arc;

/// Everything a live connection needs once past the handshake: the
/// record-layer socket plus the bits of negotiated state later calls
/// (`read`/`write`/`close`) still need to see (§9's "owned State struct"
/// to avoid a Connection/RecordLayer/HandshakeFSM ownership cycle).
struct Established<T: Read + Write> {
    socket: MessageSocket<T>,
    suite: CipherSuite,
}

enum Phase<T: Read + Write> {
    Client(ClientHandshake<T>),
    Established(Established<T>),
    Closed,
}

/// Orchestrates one TLS connection end to end: handshake negotiation,
/// then plaintext-in/ciphertext-out application data, then shutdown.
pub struct Connection<T: Read + Write> {
    phase: Phase<T>,
    ignore_abrupt_close: bool,
}

fn policy_from_config(config: &Config) -> NegotiationPolicy {
    NegotiationPolicy {
        min_version: config.min_version,
        max_version: config.max_version,
        cipher_suites: config.cipher_suites.clone(),
        groups: config.ec_curves.clone(),
        ff_dh_groups: config.ff_dh_groups.clone(),
        signature_schemes: config.signature_algorithms.clone(),
        alpn_protocols: config.alpn_protocols.clone(),
        require_extended_master_secret: config.require_extended_master_secret,
        min_key_size: config.min_key_size,
        max_key_size: config.max_key_size,
    }
}

impl<T: Read + Write> Connection<T> {
    /// Run the full client-side handshake over `transport` and return a
    /// `Connection` ready for `read`/`write`. Drives either the TLS 1.3
    /// key-share path or, for a suite negotiated below TLS 1.3, whichever
    /// of ECDHE/FFDHE/static-RSA the negotiated suite names. `verify_fn` is
    /// handed the peer's raw certificate chain DER, the exact bytes the
    /// ServerKeyExchange signature covers, the negotiated signature scheme
    /// (absent below TLS 1.2), and the signature itself; this crate never
    /// parses X.509, so chain validation and the signature check both live
    /// with the caller. `rsa_public_key_fn` is only called for a
    /// static-RSA suite, to extract the leaf certificate's RSA public key
    /// (as PKCS#1 DER) to encrypt the pre-master secret to.
    pub fn handshake_client(
        config: &Config,
        transport: T,
        verify_fn: impl Fn(&[Vec<u8>], &[u8], Option<SignatureScheme>, &[u8]) -> Result<(), TlsError>,
        rsa_public_key_fn: impl Fn(&[Vec<u8>]) -> Result<Vec<u8>, TlsError>,
    ) -> Result<Connection<T>, TlsError> {
        config.validate().map_err(|e| TlsError::Internal(e.to_string()))?;
        let policy = policy_from_config(config);
        let layer = RecordLayer::new(transport, config.min_version, config.record_size_limit);
        let socket = MessageSocket::new(layer, config.heartbeat_mode);
        let mut hs = ClientHandshake::new(socket, policy);

        hs.send_client_hello(config.server_name.as_deref())?;
        crate::log_debug!("client hello sent");
        let (sh, secrets) = hs.recv_server_hello()?;

        let suite = CipherSuite::by_id(sh.cipher_suite)
            .ok_or_else(|| TlsError::IllegalParameter(format!("unknown cipher suite {:#06x}", sh.cipher_suite)))?;

        let socket = match secrets {
            Some(secrets) => {
                hs.install_handshake_traffic_keys(suite, &secrets);
                let transcript = hs.transcript_hash(suite);
                let server_hs_secret = secrets.server_handshake_traffic_secret(&transcript);

                hs.complete_server_flight(suite, &secrets, &server_hs_secret)?;

                let client_hs_secret = secrets.client_handshake_traffic_secret(&transcript);
                hs.send_client_finished(suite, &secrets, &client_hs_secret)?;
                hs.into_socket()
            }
            None => {
                if matches!(suite.kx, KeyExchangeKind::Srp | KeyExchangeKind::Tls13) {
                    return Err(TlsError::Internal(format!(
                        "negotiated {:?} key exchange is not implemented for pre-TLS1.3 suites",
                        suite.kx
                    )));
                }
                hs.run_legacy_client_handshake(suite, &sh, verify_fn, rsa_public_key_fn)?;
                hs.into_socket()
            }
        };

        crate::log_info!("client handshake established, suite={:#06x}", suite.id);
        Ok(Connection {
            phase: Phase::Established(Established { socket, suite }),
            ignore_abrupt_close: config.ignore_abrupt_close,
        })
    }

    /// Run the full server-side handshake over `transport`. Drives either
    /// the TLS 1.3 path or, for a client that only offers suites below TLS
    /// 1.3, whichever of ECDHE/FFDHE/static-RSA the negotiated suite names;
    /// a client offering none of those is rejected with `handshake_failure`.
    /// `sign_fn` signs the CertificateVerify input (TLS 1.3) or the
    /// ServerKeyExchange params (legacy ECDHE/DHE) with the private key
    /// matching `identity.certificate_chain[0]` -- the key itself never
    /// crosses into this crate for that path (§6). `rsa_private_key` is the
    /// one exception: a static-RSA suite needs the private key in-process
    /// to decrypt the ClientKeyExchange, so it is passed directly rather
    /// than through a signing closure.
    pub fn handshake_server(
        config: &Config,
        identity: ServerIdentity,
        session_cache: Option<Arc<SessionCache>>,
        transport: T,
        sign_fn: impl FnOnce(&[u8]) -> Vec<u8>,
        rsa_private_key: Option<&rsa::RsaPrivateKey>,
    ) -> Result<Connection<T>, TlsError> {
        config.validate().map_err(|e| TlsError::Internal(e.to_string()))?;
        let policy = policy_from_config(config);
        let layer = RecordLayer::new(transport, config.min_version, config.record_size_limit);
        let socket = MessageSocket::new(layer, config.heartbeat_mode);
        let mut hs = ServerHandshake::new(socket, policy, session_cache);

        let ch = hs.recv_client_hello()?;
        let version = hs.select_version(&ch)?;
        let suite = hs.select_cipher_suite(&ch)?;

        if !version.is_tls13() || !suite.is_tls13() {
            if matches!(suite.kx, KeyExchangeKind::Srp | KeyExchangeKind::Tls13) {
                let _ = hs.socket_mut().send_alert(AlertLevel::Fatal, AlertDescription::HandshakeFailure);
                return Err(TlsError::Internal(format!(
                    "negotiated {:?} key exchange is not implemented for pre-TLS1.3 suites",
                    suite.kx
                )));
            }
            hs.run_legacy_server_handshake(&ch, suite, version, &identity, sign_fn, rsa_private_key)?;

            if config.session_tickets_enabled {
                crate::log_debug!("session tickets are a TLS 1.3 feature; skipping for legacy handshake");
            }

            crate::log_info!("server handshake established, suite={:#06x}", suite.id);
            let socket = hs.into_socket();
            return Ok(Connection {
                phase: Phase::Established(Established { socket, suite }),
                ignore_abrupt_close: config.ignore_abrupt_close,
            });
        }

        let (secrets, ch) = hs.send_server_hello_tls13(&ch, suite)?;
        hs.send_encrypted_extensions(alpn_pick(config, &ch).as_deref())?;
        hs.send_certificate(&identity)?;
        hs.send_certificate_verify(suite, identity.signature_scheme, sign_fn)?;

        let transcript_before_finished = hs.transcript_hash(suite);
        let server_hs_secret = secrets.server_handshake_traffic_secret(&transcript_before_finished);
        hs.send_server_finished(suite, &secrets, &server_hs_secret)?;
        hs.install_application_write_keys(suite, &secrets);

        let transcript_before_client_finished = hs.transcript_hash(suite);
        let client_hs_secret = secrets.client_handshake_traffic_secret(&transcript_before_client_finished);
        hs.verify_client_finished(suite, &secrets, &client_hs_secret)?;

        if config.session_tickets_enabled {
            hs.issue_new_session_ticket(suite, &secrets, ch.session_id.clone())?;
        }

        crate::log_info!("server handshake established, suite={:#06x}", suite.id);
        let socket = hs.into_socket();
        Ok(Connection {
            phase: Phase::Established(Established { socket, suite }),
            ignore_abrupt_close: config.ignore_abrupt_close,
        })
    }

    /// Read up to `max` bytes of application data, blocking until at
    /// least `min` bytes are available (or the peer closes).
    pub fn read(&mut self, max: usize, min: usize) -> Result<Vec<u8>, TlsError> {
        let established = self.established_mut()?;
        let mut out = Vec::new();
        while out.len() < min {
            let (content_type, bytes) = established.socket.recv_message()?;
            match content_type {
                ContentType::ApplicationData => out.extend_from_slice(&bytes),
                ContentType::Alert => return Err(decode_alert_as_error(&bytes)?),
                ContentType::Handshake => {
                    // Post-handshake handshake messages (NewSessionTicket,
                    // KeyUpdate) are swallowed here rather than handed to
                    // the caller, which only expects application data.
                    continue;
                }
                other => {
                    return Err(TlsError::UnexpectedMessage {
                        expected: "ApplicationData".into(),
                        got: format!("{other:?}"),
                    })
                }
            }
            if out.len() >= max {
                out.truncate(max);
                break;
            }
        }
        Ok(out)
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<(), TlsError> {
        let established = self.established_mut()?;
        established.socket.send_application_data(bytes)
    }

    /// Perform the close_notify exchange (§4.9/§7) unless
    /// `ignore_abrupt_close` was set, in which case we only send our own
    /// close_notify and don't wait for the peer's.
    pub fn close(&mut self) -> Result<(), TlsError> {
        if matches!(self.phase, Phase::Closed) {
            return Ok(());
        }
        let ignore_abrupt_close = self.ignore_abrupt_close;
        let established = self.established_mut()?;
        established
            .socket
            .send_alert(AlertLevel::Warning, AlertDescription::CloseNotify)?;

        if !ignore_abrupt_close {
            loop {
                match established_recv_until_alert(established) {
                    Ok(true) => break,
                    Ok(false) => continue,
                    Err(e) => {
                        self.phase = Phase::Closed;
                        return Err(e);
                    }
                }
            }
        }
        self.phase = Phase::Closed;
        Ok(())
    }

    /// The cipher suite negotiated during the handshake, once established.
    pub fn negotiated_suite(&self) -> Option<CipherSuite> {
        match &self.phase {
            Phase::Established(e) => Some(e.suite),
            _ => None,
        }
    }

    pub fn state(&self) -> HandshakeState {
        match &self.phase {
            Phase::Client(hs) => hs.state(),
            Phase::Established(_) => HandshakeState::Established,
            Phase::Closed => HandshakeState::Established,
        }
    }

    fn established_mut(&mut self) -> Result<&mut Established<T>, TlsError> {
        match &mut self.phase {
            Phase::Established(e) => Ok(e),
            Phase::Closed => Err(TlsError::ClosedConnection),
            _ => Err(TlsError::Internal("connection used before handshake completed".into())),
        }
    }
}

/// Drain one message; returns `Ok(true)` once a close_notify alert was
/// seen, `Ok(false)` if some other message was skipped over.
fn established_recv_until_alert<T: Read + Write>(established: &mut Established<T>) -> Result<bool, TlsError> {
    let (content_type, bytes) = established.socket.recv_message()?;
    match content_type {
        ContentType::Alert => {
            let alert = Alert::decode(&bytes)?;
            if alert.description == AlertDescription::CloseNotify {
                Ok(true)
            } else {
                Err(TlsError::RemoteAlert(alert.description))
            }
        }
        _ => Ok(false),
    }
}

fn decode_alert_as_error(bytes: &[u8]) -> Result<TlsError, TlsError> {
    let alert = Alert::decode(bytes)?;
    if alert.description == AlertDescription::CloseNotify {
        Ok(TlsError::ClosedConnection)
    } else {
        Ok(TlsError::RemoteAlert(alert.description))
    }
}

fn alpn_pick(config: &Config, ch: &crate::handshake::messages::ClientHello) -> Option<Vec<u8>> {
    let offered = ch.extensions.alpn_protocols().ok()?;
    config
        .alpn_protocols
        .iter()
        .find(|ours| offered.iter().any(|theirs| theirs == *ours))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_rejects_read_before_handshake() {
        struct NullIo;
        impl Read for NullIo {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Ok(0)
            }
        }
        impl Write for NullIo {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }
        let layer = RecordLayer::new(NullIo, ProtocolVersion::TLS1_2, 16384);
        let socket = MessageSocket::new(layer, crate::message::HeartbeatMode::Disabled);
        let policy = policy_from_config(&Config::default());
        let mut conn: Connection<NullIo> = Connection {
            phase: Phase::Client(ClientHandshake::new(socket, policy)),
            ignore_abrupt_close: false,
        };
        assert!(conn.read(16, 1).is_err());
    }

    /// Full client+server round trip over a real TCP loopback connection,
    /// forced onto the legacy ECDHE path by pinning both ends to TLS 1.2.
    /// `sign_fn`/`verify_fn` stand in for a real certificate: the "chain"
    /// is just the raw Ed25519 public key, which is all `verify_fn` needs
    /// to check the ServerKeyExchange signature.
    #[test]
    fn legacy_ecdhe_handshake_establishes_and_exchanges_application_data() {
        use crate::protocol::NamedGroup;
        use ed25519_dalek::{Signer, SigningKey};
        use std::net::{TcpListener, TcpStream};

        let signing_key = SigningKey::generate(&mut rand_core::OsRng);
        let public_key = signing_key.verifying_key().to_bytes().to_vec();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let base_config = Config {
            min_version: ProtocolVersion::TLS1_2,
            max_version: ProtocolVersion::TLS1_2,
            cipher_suites: vec![CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384],
            ec_curves: vec![NamedGroup::X25519],
            signature_algorithms: vec![crate::protocol::SignatureScheme::Ed25519],
            require_extended_master_secret: true,
            session_tickets_enabled: false,
            ignore_abrupt_close: true,
            ..Config::default()
        };

        let server_config = base_config.clone();
        let server_public_key = public_key.clone();
        let server_thread = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let identity = ServerIdentity {
                certificate_chain: vec![server_public_key],
                signature_scheme: crate::protocol::SignatureScheme::Ed25519,
            };
            let sign_fn = move |msg: &[u8]| signing_key.sign(msg).to_bytes().to_vec();
            let mut conn = Connection::handshake_server(&server_config, identity, None, stream, sign_fn, None).unwrap();
            let request = conn.read(64, 5).unwrap();
            assert_eq!(&request, b"hello");
            conn.write(b"world").unwrap();
            conn.close().unwrap();
        });

        let client_config = base_config;
        let stream = TcpStream::connect(addr).unwrap();
        let verify_fn = move |certs: &[Vec<u8>], msg: &[u8], scheme: Option<SignatureScheme>, sig: &[u8]| {
            assert_eq!(scheme, Some(SignatureScheme::Ed25519));
            let key_bytes: [u8; 32] = certs[0].clone().try_into().unwrap();
            let verifying = ed25519_dalek::VerifyingKey::from_bytes(&key_bytes)
                .map_err(|e| TlsError::Decode(format!("bad test key: {e}")))?;
            let sig_bytes: [u8; 64] = sig.try_into().map_err(|_| TlsError::Decode("bad test signature length".into()))?;
            let signature = ed25519_dalek::Signature::from_bytes(&sig_bytes);
            verifying
                .verify_strict(msg, &signature)
                .map_err(|_| TlsError::Decode("test signature did not verify".into()))
        };
        let no_rsa = |_: &[Vec<u8>]| -> Result<Vec<u8>, TlsError> { Err(TlsError::Internal("test harness offers no RSA suites".into())) };
        let mut conn = Connection::handshake_client(&client_config, stream, verify_fn, no_rsa).unwrap();
        assert_eq!(conn.negotiated_suite().unwrap().id, CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384.id);
        conn.write(b"hello").unwrap();
        let response = conn.read(64, 5).unwrap();
        assert_eq!(&response, b"world");

        server_thread.join().unwrap();
    }
}
