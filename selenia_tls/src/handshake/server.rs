//! Server-side HandshakeFSM (§4.9). Mirrors `client.rs`'s TLS 1.3 path:
//! receive ClientHello, negotiate, send ServerHello and the rest of the
//! server flight, verify the client's Finished.

use crate::codec::Writer;
use crate::crypto;
use crate::error::TlsError;
use crate::extensions::ExtensionBlock;
use crate::handshake::messages::{
    Certificate, CertificateEntry, ClientHello, Finished, HandshakeMessage, KeyUpdate, ServerHello, ServerKeyExchange,
};
use crate::handshake::{HandshakeState, NegotiationPolicy};
use crate::key_schedule::{self, Tls13Secrets};
use crate::kex::{self, EcdheKeyExchange, Tls13KeyShare};
use crate::message::MessageSocket;
use crate::protocol::{AlertDescription, AlertLevel, CipherSuite, ContentType, NamedGroup, ProtocolVersion};
use crate::record::cipher_state::{AeadRecipe, CipherState};
use crate::record::layer::recipe_for;
use crate::session::{Session, SessionCache, Ticket};
use crate::transcript::{HandshakeHashes, TranscriptHash};
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What the caller hands us to build Certificate/CertificateVerify. The
/// private key itself never enters this module -- signing is delegated
/// back to the caller via a closure, the same seam §6 draws around
/// `certificate_chain`/`private_key`.
pub struct ServerIdentity {
    pub certificate_chain: Vec<Vec<u8>>,
    pub signature_scheme: crate::protocol::SignatureScheme,
}

pub struct ServerHandshake<T: Read + Write> {
    socket: MessageSocket<T>,
    hashes: HandshakeHashes,
    policy: NegotiationPolicy,
    state: HandshakeState,
    session_cache: Option<Arc<SessionCache>>,
}

impl<T: Read + Write> ServerHandshake<T> {
    pub fn new(
        socket: MessageSocket<T>,
        policy: NegotiationPolicy,
        session_cache: Option<Arc<SessionCache>>,
    ) -> ServerHandshake<T> {
        ServerHandshake {
            socket,
            hashes: HandshakeHashes::new(),
            policy,
            state: HandshakeState::Start,
            session_cache,
        }
    }

    fn send_handshake(&mut self, msg: &HandshakeMessage) -> Result<(), TlsError> {
        let encoded = msg.encode();
        self.hashes.update(&encoded);
        self.socket.send_flight(&[encoded])
    }

    pub fn recv_client_hello(&mut self) -> Result<ClientHello, TlsError> {
        let (content_type, bytes) = self.socket.recv_message()?;
        if content_type != ContentType::Handshake {
            return Err(TlsError::UnexpectedMessage {
                expected: "ClientHello".into(),
                got: format!("{content_type:?}"),
            });
        }
        let ch = match HandshakeMessage::decode(&bytes)? {
            HandshakeMessage::ClientHello(ch) => ch,
            other => {
                return Err(TlsError::UnexpectedMessage {
                    expected: "ClientHello".into(),
                    got: format!("{:?}", other.message_type()),
                })
            }
        };
        self.hashes.update(&bytes);
        self.state = HandshakeState::AwaitingCertificateOrPsk;
        Ok(ch)
    }

    /// Pick the first of our own suites (preference order) the client also
    /// offered. §4.9: no overlap is a `handshake_failure`.
    pub fn select_cipher_suite(&self, client_hello: &ClientHello) -> Result<CipherSuite, TlsError> {
        self.policy
            .cipher_suites
            .iter()
            .find(|s| client_hello.cipher_suites.contains(&s.id))
            .copied()
            .ok_or_else(|| TlsError::IllegalParameter("no mutually supported cipher suite".into()))
    }

    /// Highest version in [min_version, max_version] the client advertised,
    /// via `supported_versions` if present or `legacy_version` otherwise.
    pub fn select_version(&self, client_hello: &ClientHello) -> Result<ProtocolVersion, TlsError> {
        let versions = client_hello.extensions.supported_versions_list().unwrap_or_default();
        let candidates: Vec<ProtocolVersion> = if versions.is_empty() {
            vec![client_hello.legacy_version]
        } else {
            versions
                .into_iter()
                .map(|(major, minor)| ProtocolVersion::from_bytes([major, minor]))
                .collect()
        };
        candidates
            .into_iter()
            .filter(|v| *v >= self.policy.min_version && *v <= self.policy.max_version)
            .max()
            .ok_or_else(|| TlsError::ProtocolVersion("no version overlap with client".into()))
    }

    /// Pick a mutual TLS 1.3 group: prefer one the client already sent a
    /// `key_share` for (no retry needed); otherwise fall back to any group
    /// mutually supported per `supported_groups`, which costs a
    /// HelloRetryRequest round trip. Both branches walk `policy.groups` in
    /// our own preference order, unlike `kex::negotiate_group`'s
    /// client-preference order -- the server is the one picking here.
    fn pick_tls13_group(&self, client_hello: &ClientHello) -> Result<(NamedGroup, Option<Vec<u8>>), TlsError> {
        let offered_shares = client_hello.extensions.key_share_entries()?;
        if let Some(group) = self.policy.groups.iter().find(|g| offered_shares.iter().any(|(og, _)| og == *g)) {
            let peer_share = offered_shares.iter().find(|(og, _)| og == group).map(|(_, s)| s.clone()).unwrap();
            return Ok((*group, Some(peer_share)));
        }
        let client_groups = client_hello.extensions.supported_groups()?;
        let group = self
            .policy
            .groups
            .iter()
            .find(|g| client_groups.contains(g))
            .copied()
            .ok_or_else(|| TlsError::Internal("no mutually supported key exchange group".into()))?;
        Ok((group, None))
    }

    /// Send a HelloRetryRequest naming `group` and fold it into the
    /// transcript per RFC 8446 §4.4.1 (the first ClientHello collapses to
    /// a `message_hash`), then receive and return the client's second
    /// ClientHello.
    fn send_hello_retry_request(&mut self, suite: CipherSuite, group: NamedGroup) -> Result<ClientHello, TlsError> {
        self.hashes.replace_first_client_hello_with_message_hash(suite.hash);

        let mut extensions = ExtensionBlock::new();
        {
            let mut w = Writer::new();
            w.u16(crate::extensions::ExtensionType::KeyShare as u16);
            w.length_prefixed16(|w| w.u16(group as u16));
            reparse_single_extension(&mut extensions, w.into_bytes());
        }
        {
            let mut w = Writer::new();
            w.u16(crate::extensions::ExtensionType::SupportedVersions as u16);
            w.length_prefixed16(|w| w.u16(u16::from_be_bytes(ProtocolVersion::TLS1_3.to_bytes())));
            reparse_single_extension(&mut extensions, w.into_bytes());
        }
        let hrr = ServerHello {
            legacy_version: ProtocolVersion::TLS1_2,
            random: crate::handshake::messages::ServerHello::HRR_RANDOM,
            session_id: Vec::new(),
            cipher_suite: suite.id,
            compression_method: 0,
            extensions,
        };
        self.send_handshake(&HandshakeMessage::ServerHello(hrr))?;
        self.state = HandshakeState::AwaitingHelloRetry;

        let (content_type, bytes) = self.socket.recv_message()?;
        if content_type != ContentType::Handshake {
            return Err(TlsError::UnexpectedMessage {
                expected: "ClientHello".into(),
                got: format!("{content_type:?}"),
            });
        }
        let ch2 = match HandshakeMessage::decode(&bytes)? {
            HandshakeMessage::ClientHello(ch) => ch,
            other => {
                return Err(TlsError::UnexpectedMessage {
                    expected: "ClientHello".into(),
                    got: format!("{:?}", other.message_type()),
                })
            }
        };
        self.hashes.update(&bytes);
        Ok(ch2)
    }

    /// Send ServerHello (TLS 1.3 path) and immediately derive and install
    /// the handshake traffic keys, since everything after ServerHello is
    /// encrypted. Transparently sends one HelloRetryRequest (§4.9's
    /// `(HelloRetry?)` state) when the client's initial `key_share` list
    /// has no overlap with our groups but `supported_groups` does; returns
    /// whichever ClientHello (first or, after a retry, second) ended up
    /// negotiated, since its extensions (ALPN, session_id, ...) are what
    /// the rest of the flight must honor.
    pub fn send_server_hello_tls13(
        &mut self,
        client_hello: &ClientHello,
        suite: CipherSuite,
    ) -> Result<(Tls13Secrets, ClientHello), TlsError> {
        let (group, peer_share) = self.pick_tls13_group(client_hello)?;
        let (client_hello, peer_share) = match peer_share {
            Some(share) => (client_hello.clone(), share),
            None => {
                let ch2 = self.send_hello_retry_request(suite, group)?;
                let shares = ch2.extensions.key_share_entries()?;
                let share = shares
                    .into_iter()
                    .find(|(g, _)| *g == group)
                    .map(|(_, s)| s)
                    .ok_or_else(|| TlsError::IllegalParameter("second ClientHello missing the requested key_share group".into()))?;
                (ch2, share)
            }
        };

        let (our_share, shared_secret) = Tls13KeyShare::server_respond(group, &peer_share)?;
        let secrets = Tls13Secrets::new(suite.hash, None, &shared_secret);

        let mut random = [0u8; 32];
        crypto::rand::fill_random(&mut random);

        let mut extensions = ExtensionBlock::new();
        {
            let mut w = Writer::new();
            w.u16(crate::extensions::ExtensionType::KeyShare as u16);
            w.length_prefixed16(|w| {
                w.u16(group as u16);
                w.vec16(&our_share);
            });
            reparse_single_extension(&mut extensions, w.into_bytes());
        }
        {
            let mut w = Writer::new();
            w.u16(crate::extensions::ExtensionType::SupportedVersions as u16);
            w.length_prefixed16(|w| w.u16(u16::from_be_bytes(ProtocolVersion::TLS1_3.to_bytes())));
            reparse_single_extension(&mut extensions, w.into_bytes());
        }

        let sh = ServerHello {
            legacy_version: ProtocolVersion::TLS1_2,
            random,
            session_id: client_hello.session_id.clone(),
            cipher_suite: suite.id,
            compression_method: 0,
            extensions,
        };
        self.send_handshake(&HandshakeMessage::ServerHello(sh))?;

        let transcript = self.hashes.digest(TranscriptHash::Intrinsic(suite.hash));
        let client_hs = secrets.client_handshake_traffic_secret(&transcript);
        let server_hs = secrets.server_handshake_traffic_secret(&transcript);
        let algo = crate::crypto::aead::for_bulk(suite.bulk);
        let key_len = algo.key_len();
        let iv_len = algo.nonce_len();
        let recipe = recipe_for(suite.bulk, ProtocolVersion::TLS1_3);

        self.socket
            .layer_mut()
            .stage_write(build_state(&secrets, &server_hs, suite, key_len, iv_len, recipe));
        self.socket
            .layer_mut()
            .stage_read(build_state(&secrets, &client_hs, suite, key_len, iv_len, recipe));
        self.socket.layer_mut().change_write_state()?;
        self.socket.layer_mut().change_read_state()?;

        self.state = HandshakeState::AwaitingCertificateVerify;
        Ok((secrets, client_hello))
    }

    pub fn send_encrypted_extensions(&mut self, alpn_selected: Option<&[u8]>) -> Result<(), TlsError> {
        let mut extensions = ExtensionBlock::new();
        if let Some(proto) = alpn_selected {
            let mut w = Writer::new();
            ExtensionBlock::encode_alpn(&mut w, &[proto]);
            reparse_single_extension(&mut extensions, w.into_bytes());
        }
        self.send_handshake(&HandshakeMessage::EncryptedExtensions(extensions))
    }

    pub fn send_certificate(&mut self, identity: &ServerIdentity) -> Result<(), TlsError> {
        let entries = identity
            .certificate_chain
            .iter()
            .map(|der| CertificateEntry {
                cert_data: der.clone(),
                extensions: ExtensionBlock::new(),
            })
            .collect();
        self.send_handshake(&HandshakeMessage::Certificate(Certificate {
            certificate_request_context: Vec::new(),
            entries,
        }))
    }

    /// Sign the transcript so far with the server's private key (RFC 8446
    /// §4.4.3's context string plus the transcript hash) and send
    /// CertificateVerify. Signing itself is delegated to `sign_fn` since the
    /// private key handle's shape is an external-collaborator concern (§6).
    pub fn send_certificate_verify(
        &mut self,
        suite: CipherSuite,
        scheme: crate::protocol::SignatureScheme,
        sign_fn: impl FnOnce(&[u8]) -> Vec<u8>,
    ) -> Result<(), TlsError> {
        let transcript = self.hashes.digest(TranscriptHash::Intrinsic(suite.hash));
        let mut signing_input = vec![0x20; 64];
        signing_input.extend_from_slice(b"TLS 1.3, server CertificateVerify");
        signing_input.push(0);
        signing_input.extend_from_slice(&transcript);
        let signature = sign_fn(&signing_input);
        self.send_handshake(&HandshakeMessage::CertificateVerify(
            crate::handshake::messages::CertificateVerify {
                scheme: scheme as u16,
                signature,
            },
        ))
    }

    pub fn send_server_finished(
        &mut self,
        suite: CipherSuite,
        secrets: &Tls13Secrets,
        server_hs_secret: &[u8],
    ) -> Result<(), TlsError> {
        let transcript = self.hashes.digest(TranscriptHash::Intrinsic(suite.hash));
        let finished_key = secrets.finished_key(server_hs_secret);
        let hash_adapter = crate::crypto::hash::for_modern_hash(suite.hash);
        let verify_data = hash_adapter.hmac(&finished_key, &transcript);
        self.send_handshake(&HandshakeMessage::Finished(Finished { verify_data }))
    }

    /// After sending our Finished, switch the write direction over to
    /// application traffic keys -- the client's Finished (next message) is
    /// still read under handshake keys.
    pub fn install_application_write_keys(&mut self, suite: CipherSuite, secrets: &Tls13Secrets) {
        let transcript = self.hashes.digest(TranscriptHash::Intrinsic(suite.hash));
        let server_ap = secrets.server_application_traffic_secret(&transcript);
        let algo = crate::crypto::aead::for_bulk(suite.bulk);
        let state = build_state(
            secrets,
            &server_ap,
            suite,
            algo.key_len(),
            algo.nonce_len(),
            recipe_for(suite.bulk, ProtocolVersion::TLS1_3),
        );
        self.socket.layer_mut().rekey_write(state);
    }

    pub fn verify_client_finished(
        &mut self,
        suite: CipherSuite,
        secrets: &Tls13Secrets,
        client_hs_secret: &[u8],
    ) -> Result<(), TlsError> {
        let (content_type, bytes) = self.socket.recv_message()?;
        if content_type != ContentType::Handshake {
            return Err(TlsError::UnexpectedMessage {
                expected: "Finished".into(),
                got: format!("{content_type:?}"),
            });
        }
        let finished = match HandshakeMessage::decode(&bytes)? {
            HandshakeMessage::Finished(f) => f,
            other => {
                return Err(TlsError::UnexpectedMessage {
                    expected: "Finished".into(),
                    got: format!("{:?}", other.message_type()),
                })
            }
        };
        let transcript = self.hashes.digest(TranscriptHash::Intrinsic(suite.hash));
        let finished_key = secrets.finished_key(client_hs_secret);
        let hash_adapter = crate::crypto::hash::for_modern_hash(suite.hash);
        let expected = hash_adapter.hmac(&finished_key, &transcript);
        if !constant_time_eq(&expected, &finished.verify_data) {
            return Err(TlsError::LocalAlert(AlertDescription::DecryptError));
        }
        self.hashes.update(&bytes);

        let client_ap = secrets.client_application_traffic_secret(&transcript);
        let algo = crate::crypto::aead::for_bulk(suite.bulk);
        let read_state = build_state(
            secrets,
            &client_ap,
            suite,
            algo.key_len(),
            algo.nonce_len(),
            recipe_for(suite.bulk, ProtocolVersion::TLS1_3),
        );
        self.socket.layer_mut().rekey_read(read_state);

        self.state = HandshakeState::Established;
        Ok(())
    }

    /// Run the entire server side of a pre-TLS1.3 handshake, from
    /// ServerHello through the client's Finished, for whichever of
    /// ECDHE/DHE/static-RSA `suite.kx` names. Signing the ServerKeyExchange
    /// params (ECDHE/DHE) is delegated to `sign_fn`, the same seam
    /// `send_certificate_verify` uses for TLS 1.3. Below TLS 1.2 the wire
    /// format carries no explicit signature_algorithm, and the legacy hash
    /// convention for that case (MD5||SHA1 for RSA, SHA-1 for ECDSA, per
    /// RFC 2246 §7.4.3) is `sign_fn`'s concern, not this crate's.
    ///
    /// `rsa_private_key` is only consulted for a static-RSA suite, to
    /// decrypt the ClientKeyExchange's encrypted pre-master secret with the
    /// RFC 5246 §7.4.7.1 Bleichenbacher countermeasure (any decode/version
    /// mismatch silently substitutes a random pre-master secret rather than
    /// erroring, so a timing or error-shape oracle can't be built against
    /// it).
    pub fn run_legacy_server_handshake(
        &mut self,
        ch: &ClientHello,
        suite: CipherSuite,
        version: ProtocolVersion,
        identity: &ServerIdentity,
        sign_fn: impl FnOnce(&[u8]) -> Vec<u8>,
        rsa_private_key: Option<&rsa::RsaPrivateKey>,
    ) -> Result<(), TlsError> {
        let client_random = ch.random;
        let mut server_random = [0u8; 32];
        crypto::rand::fill_random(&mut server_random);

        let extended_master_secret = self.policy.require_extended_master_secret
            && ch.extensions.has(crate::extensions::ExtensionType::ExtendedMasterSecret);
        let encrypt_then_mac =
            !suite.bulk.is_aead() && ch.extensions.has(crate::extensions::ExtensionType::EncryptThenMac);

        let mut extensions = ExtensionBlock::new();
        if extended_master_secret {
            let mut w = Writer::new();
            ExtensionBlock::encode_extended_master_secret(&mut w);
            reparse_single_extension(&mut extensions, w.into_bytes());
        }
        if encrypt_then_mac {
            let mut w = Writer::new();
            ExtensionBlock::encode_encrypt_then_mac(&mut w);
            reparse_single_extension(&mut extensions, w.into_bytes());
        }

        let sh = ServerHello {
            legacy_version: version,
            random: server_random,
            session_id: ch.session_id.clone(),
            cipher_suite: suite.id,
            compression_method: 0,
            extensions,
        };
        self.send_handshake(&HandshakeMessage::ServerHello(sh))?;

        self.send_certificate(identity)?;

        enum ServerShare {
            Ecdhe(EcdheKeyExchange),
            Dhe(kex::DheKeyExchange),
            Rsa,
        }

        let share = match suite.kx {
            crate::protocol::KeyExchangeKind::Ecdhe => {
                let offered_groups = ch.extensions.supported_groups().unwrap_or_default();
                let group = offered_groups
                    .into_iter()
                    .find(|g| self.policy.groups.contains(g))
                    .ok_or_else(|| TlsError::IllegalParameter("no mutually supported curve for ECDHE".into()))?;
                let ecdhe = EcdheKeyExchange::generate(group)?;
                let params = kex::EcdheServerParams {
                    named_group: group,
                    public: ecdhe.public(),
                };
                let mut signing_input = client_random.to_vec();
                signing_input.extend_from_slice(&server_random);
                signing_input.extend_from_slice(&params.params_bytes());
                let signature = sign_fn(&signing_input);
                let scheme = (version >= ProtocolVersion::TLS1_2).then_some(identity.signature_scheme);
                let ske_body = kex::encode_server_key_exchange(&params, version, scheme, &signature);
                self.send_handshake(&HandshakeMessage::ServerKeyExchange(ServerKeyExchange { body: ske_body }))?;
                ServerShare::Ecdhe(ecdhe)
            }
            crate::protocol::KeyExchangeKind::Dhe => {
                let offered_groups = ch.extensions.supported_groups().unwrap_or_default();
                let group = offered_groups
                    .into_iter()
                    .find(|g| self.policy.ff_dh_groups.contains(g))
                    .ok_or_else(|| TlsError::IllegalParameter("no mutually supported group for FFDHE".into()))?;
                let dhe = kex::DheKeyExchange::generate(group)?;
                let params = dhe.params();
                let mut signing_input = client_random.to_vec();
                signing_input.extend_from_slice(&server_random);
                signing_input.extend_from_slice(&params.params_bytes());
                let signature = sign_fn(&signing_input);
                let scheme = (version >= ProtocolVersion::TLS1_2).then_some(identity.signature_scheme);
                let mut w = Writer::new();
                w.bytes(&params.params_bytes());
                if let Some(scheme) = scheme {
                    w.u16(scheme as u16);
                }
                w.vec16(&signature);
                self.send_handshake(&HandshakeMessage::ServerKeyExchange(ServerKeyExchange { body: w.into_bytes() }))?;
                ServerShare::Dhe(dhe)
            }
            crate::protocol::KeyExchangeKind::Rsa => ServerShare::Rsa,
            other => return Err(TlsError::Internal(format!("{other:?} key exchange is not implemented"))),
        };

        self.send_handshake(&HandshakeMessage::ServerHelloDone)?;
        self.state = HandshakeState::AwaitingServerHelloDone;

        let (content_type, bytes) = self.socket.recv_message()?;
        if content_type != ContentType::Handshake {
            return Err(TlsError::UnexpectedMessage {
                expected: "ClientKeyExchange".into(),
                got: format!("{content_type:?}"),
            });
        }
        let cke_body = match HandshakeMessage::decode(&bytes)? {
            HandshakeMessage::ClientKeyExchange(cke) => cke.body,
            other => {
                return Err(TlsError::UnexpectedMessage {
                    expected: "ClientKeyExchange".into(),
                    got: format!("{:?}", other.message_type()),
                })
            }
        };
        self.hashes.update(&bytes);
        self.state = HandshakeState::SentClientFlight;

        let shared_secret = match share {
            ServerShare::Ecdhe(ecdhe) => {
                let client_public = kex::decode_client_key_exchange_ecdhe(&cke_body)?;
                ecdhe.shared_secret(&client_public)?
            }
            ServerShare::Dhe(dhe) => {
                let client_public = kex::decode_client_key_exchange_dhe(&cke_body)?;
                dhe.shared_secret(&client_public)?
            }
            ServerShare::Rsa => {
                let rsa_key = rsa_private_key
                    .ok_or_else(|| TlsError::Internal("static-RSA suite negotiated without a server RSA private key".into()))?;
                let encrypted = kex::decode_client_key_exchange_rsa(&cke_body)?;
                let candidate = rsa_key.decrypt(rsa::Pkcs1v15Encrypt, &encrypted).ok();
                let pms = match candidate {
                    Some(bytes) if bytes.len() == 48 && bytes[0..2] == ch.legacy_version.to_bytes() => bytes,
                    _ => kex::RsaPreMasterSecret::generate(ch.legacy_version).0.to_vec(),
                };
                pms
            }
        };
        let ems_seed = extended_master_secret.then(|| self.hashes.digest(TranscriptHash::Intrinsic(suite.hash)));
        let master_secret = key_schedule::master_secret(
            version,
            suite.hash,
            &shared_secret,
            &client_random,
            &server_random,
            ems_seed.as_deref(),
        );

        let (client_state, server_state) =
            key_schedule::legacy_cipher_states(suite, version, &master_secret, &client_random, &server_random, encrypt_then_mac);
        self.socket.layer_mut().stage_write(server_state);
        self.socket.layer_mut().stage_read(client_state);

        let (content_type, _) = self.socket.recv_message()?;
        if content_type != ContentType::ChangeCipherSpec {
            return Err(TlsError::UnexpectedMessage {
                expected: "ChangeCipherSpec".into(),
                got: format!("{content_type:?}"),
            });
        }
        self.socket.layer_mut().change_read_state()?;

        let expected_client_verify_data =
            key_schedule::legacy_finished_verify_data(version, suite.hash, &master_secret, b"client finished", &self.hashes);
        let (content_type, bytes) = self.socket.recv_message()?;
        if content_type != ContentType::Handshake {
            return Err(TlsError::UnexpectedMessage {
                expected: "Finished".into(),
                got: format!("{content_type:?}"),
            });
        }
        let finished = match HandshakeMessage::decode(&bytes)? {
            HandshakeMessage::Finished(f) => f,
            other => {
                return Err(TlsError::UnexpectedMessage {
                    expected: "Finished".into(),
                    got: format!("{:?}", other.message_type()),
                })
            }
        };
        if !constant_time_eq(&expected_client_verify_data, &finished.verify_data) {
            return Err(TlsError::LocalAlert(AlertDescription::DecryptError));
        }
        self.hashes.update(&bytes);

        self.socket.send_change_cipher_spec()?;
        self.socket.layer_mut().change_write_state()?;
        self.socket.reset_defragmenter();

        let server_verify_data =
            key_schedule::legacy_finished_verify_data(version, suite.hash, &master_secret, b"server finished", &self.hashes);
        self.send_handshake(&HandshakeMessage::Finished(Finished {
            verify_data: server_verify_data,
        }))?;

        self.state = HandshakeState::Established;
        Ok(())
    }

    /// Issue a NewSessionTicket and, if a cache was supplied, stash it so a
    /// future ClientHello's PSK can resume this session (§4.9, §4.10).
    pub fn issue_new_session_ticket(
        &mut self,
        suite: CipherSuite,
        secrets: &Tls13Secrets,
        session_id: Vec<u8>,
    ) -> Result<(), TlsError> {
        let transcript = self.hashes.digest(TranscriptHash::Intrinsic(suite.hash));
        let resumption_secret = secrets.resumption_master_secret(&transcript);
        let mut nonce = [0u8; 4];
        crypto::rand::fill_random(&mut nonce);
        let mut ticket_bytes = [0u8; 32];
        crypto::rand::fill_random(&mut ticket_bytes);
        let mut ticket_age_add = [0u8; 4];
        crypto::rand::fill_random(&mut ticket_age_add);

        let msg = HandshakeMessage::NewSessionTicket(crate::handshake::messages::NewSessionTicket {
            ticket_lifetime: 7200,
            ticket_age_add: u32::from_be_bytes(ticket_age_add),
            ticket_nonce: nonce.to_vec(),
            ticket: ticket_bytes.to_vec(),
            extensions: ExtensionBlock::new(),
        });
        self.send_handshake(&msg)?;

        if let Some(cache) = &self.session_cache {
            let ticket = Ticket {
                ticket: ticket_bytes.to_vec(),
                ticket_lifetime: Duration::from_secs(7200),
                ticket_age_add: u32::from_be_bytes(ticket_age_add),
                ticket_nonce: nonce.to_vec(),
                resumption_master_secret: resumption_secret.clone(),
                issued_at: Instant::now(),
            };
            let cache_key = session_id.clone();
            let session = Session::new(session_id, ProtocolVersion::TLS1_3, suite, resumption_secret, true);
            cache.put(session);
            cache.add_ticket(&cache_key, ticket);
        }
        Ok(())
    }

    /// HelloRequest after establishment: per §4.9/§7, this engine never
    /// renegotiates. Reply with a `no_renegotiation` warning rather than
    /// tearing down the connection.
    pub fn reject_renegotiation(&mut self) -> Result<(), TlsError> {
        self.socket.send_alert(AlertLevel::Warning, AlertDescription::NoRenegotiation)
    }

    /// KeyUpdate handling (§4.4/§4.9): rekey the read direction, and if the
    /// peer requested an acknowledgment, rekey our write direction too and
    /// send our own `KeyUpdate(update_requested = false)`.
    pub fn handle_key_update(
        &mut self,
        suite: CipherSuite,
        secrets: &Tls13Secrets,
        current_read_secret: &[u8],
        current_write_secret: Option<&[u8]>,
        requested: bool,
    ) -> Result<Vec<u8>, TlsError> {
        let new_read_secret = secrets.update_traffic_secret(current_read_secret);
        let algo = crate::crypto::aead::for_bulk(suite.bulk);
        let recipe = recipe_for(suite.bulk, ProtocolVersion::TLS1_3);
        let read_state = build_state(secrets, &new_read_secret, suite, algo.key_len(), algo.nonce_len(), recipe);
        self.socket.layer_mut().rekey_read(read_state);

        if requested {
            if let Some(write_secret) = current_write_secret {
                let new_write_secret = secrets.update_traffic_secret(write_secret);
                let write_state = build_state(secrets, &new_write_secret, suite, algo.key_len(), algo.nonce_len(), recipe);
                self.socket.layer_mut().rekey_write(write_state);
            }
            let msg = HandshakeMessage::KeyUpdate(KeyUpdate { update_requested: false });
            self.send_handshake(&msg)?;
        }
        Ok(new_read_secret)
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn into_socket(self) -> MessageSocket<T> {
        self.socket
    }

    pub fn socket_mut(&mut self) -> &mut MessageSocket<T> {
        &mut self.socket
    }
}

fn build_state(
    secrets: &Tls13Secrets,
    traffic_secret: &[u8],
    suite: CipherSuite,
    key_len: usize,
    iv_len: usize,
    recipe: AeadRecipe,
) -> CipherState {
    let key = secrets.traffic_key(traffic_secret, key_len);
    let iv = secrets.traffic_iv(traffic_secret, iv_len);
    CipherState::aead(ProtocolVersion::TLS1_3, suite.bulk, key, iv, recipe)
}

/// Parse a single pre-encoded `(type, vec16-body)` extension back into an
/// `ExtensionBlock` entry, mirroring `client.rs`'s helper of the same name.
fn reparse_single_extension(block: &mut ExtensionBlock, bytes: Vec<u8>) {
    let type_id = u16::from_be_bytes([bytes[0], bytes[1]]);
    let len = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
    block.push(type_id, bytes[4..4 + len].to_vec());
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.len() == b.len() && a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::messages::ClientHello;
    use crate::message::HeartbeatMode;
    use crate::protocol::{BulkAlgorithm, HashAlgorithm, KeyExchangeKind};
    use crate::record::layer::RecordLayer;
    use std::io::Cursor;

    #[derive(Default)]
    struct Pipe {
        read: Cursor<Vec<u8>>,
        written: Vec<u8>,
    }
    impl Read for Pipe {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.read.read(buf)
        }
    }
    impl Write for Pipe {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn policy() -> NegotiationPolicy {
        NegotiationPolicy {
            min_version: ProtocolVersion::TLS1_2,
            max_version: ProtocolVersion::TLS1_3,
            cipher_suites: vec![CipherSuite::TLS_AES_128_GCM_SHA256],
            groups: vec![NamedGroup::X25519],
            ff_dh_groups: vec![NamedGroup::Ffdhe3072],
            signature_schemes: vec![crate::protocol::SignatureScheme::Ed25519],
            alpn_protocols: Vec::new(),
            require_extended_master_secret: true,
            min_key_size: 2048,
            max_key_size: 8192,
        }
    }

    fn handshake() -> ServerHandshake<Pipe> {
        let layer = RecordLayer::new(Pipe::default(), ProtocolVersion::TLS1_2, 16384);
        let socket = MessageSocket::new(layer, HeartbeatMode::Disabled);
        ServerHandshake::new(socket, policy(), None)
    }

    #[test]
    fn selects_mutually_supported_cipher_suite() {
        let hs = handshake();
        let ch = ClientHello {
            legacy_version: ProtocolVersion::TLS1_2,
            random: [1u8; 32],
            session_id: Vec::new(),
            cipher_suites: vec![0x1301, 0xC02F],
            compression_methods: vec![0],
            extensions: ExtensionBlock::new(),
        };
        let suite = hs.select_cipher_suite(&ch).unwrap();
        assert_eq!(suite.id, 0x1301);
    }

    #[test]
    fn no_overlapping_suite_is_illegal_parameter() {
        let hs = handshake();
        let ch = ClientHello {
            legacy_version: ProtocolVersion::TLS1_2,
            random: [1u8; 32],
            session_id: Vec::new(),
            cipher_suites: vec![0xC02C],
            compression_methods: vec![0],
            extensions: ExtensionBlock::new(),
        };
        assert!(hs.select_cipher_suite(&ch).is_err());
    }

    #[test]
    fn version_falls_back_to_legacy_version_without_extension() {
        let hs = handshake();
        let ch = ClientHello {
            legacy_version: ProtocolVersion::TLS1_2,
            random: [1u8; 32],
            session_id: Vec::new(),
            cipher_suites: vec![0x1301],
            compression_methods: vec![0],
            extensions: ExtensionBlock::new(),
        };
        assert_eq!(hs.select_version(&ch).unwrap(), ProtocolVersion::TLS1_2);
    }

    #[test]
    fn version_picks_highest_within_policy_from_supported_versions() {
        let hs = handshake();
        let mut w = Writer::new();
        w.u8(2);
        w.u16(u16::from_be_bytes(ProtocolVersion::TLS1_3.to_bytes()));
        let mut extensions = ExtensionBlock::new();
        extensions.push(43, w.into_bytes());
        let ch = ClientHello {
            legacy_version: ProtocolVersion::TLS1_2,
            random: [1u8; 32],
            session_id: Vec::new(),
            cipher_suites: vec![0x1301],
            compression_methods: vec![0],
            extensions,
        };
        assert_eq!(hs.select_version(&ch).unwrap(), ProtocolVersion::TLS1_3);
    }

    #[test]
    fn full_tls13_flight_reaches_established_ciphersuite_check() {
        let mut hs = handshake();

        let (_client_kex, client_public) = Tls13KeyShare::generate(NamedGroup::X25519).unwrap();
        let mut key_share_w = Writer::new();
        key_share_w.length_prefixed16(|w| {
            w.u16(NamedGroup::X25519 as u16);
            w.vec16(&client_public);
        });
        let mut extensions = ExtensionBlock::new();
        extensions.push(51, key_share_w.into_bytes());
        let ch = ClientHello {
            legacy_version: ProtocolVersion::TLS1_2,
            random: [2u8; 32],
            session_id: vec![9, 9, 9],
            cipher_suites: vec![0x1301],
            compression_methods: vec![0],
            extensions,
        };

        let suite = hs.select_cipher_suite(&ch).unwrap();
        assert_eq!(suite.hash, HashAlgorithm::Sha256);
        assert_eq!(suite.bulk, BulkAlgorithm::Aes128Gcm);
        assert_eq!(suite.kx, KeyExchangeKind::Tls13);

        let (secrets, _ch) = hs.send_server_hello_tls13(&ch, suite).unwrap();
        hs.send_encrypted_extensions(None).unwrap();
        assert_eq!(hs.state(), HandshakeState::AwaitingCertificateVerify);

        let transcript = hs.hashes.digest(TranscriptHash::Intrinsic(suite.hash));
        let server_hs_secret = secrets.server_handshake_traffic_secret(&transcript);
        hs.send_server_finished(suite, &secrets, &server_hs_secret).unwrap();
        hs.install_application_write_keys(suite, &secrets);
    }
}
