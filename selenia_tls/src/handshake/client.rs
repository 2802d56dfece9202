//! Client-side HandshakeFSM (§4.9). Drives `Start -> HelloSent ->
//! AwaitingServerHello -> (HelloRetry?) -> ... -> Established`.

use crate::codec::Writer;
use crate::crypto;
use crate::error::TlsError;
use crate::extensions::ExtensionBlock;
use crate::handshake::messages::{ClientHello, ClientKeyExchange, Finished, HandshakeMessage, ServerHello};
use crate::handshake::{HandshakeState, NegotiationPolicy};
use crate::key_schedule::{self, Tls13Secrets};
use crate::kex::{self, EcdheKeyExchange, Tls13KeyShare};
use crate::message::MessageSocket;
use crate::protocol::{AlertDescription, CipherSuite, ContentType, HashAlgorithm, NamedGroup, ProtocolVersion, SignatureScheme};
use crate::record::cipher_state::{AeadRecipe, CipherState};
use crate::record::layer::recipe_for;
use crate::transcript::{HandshakeHashes, TranscriptHash};
use std::io::{Read, Write};

/// Pad ClientHello to the next multiple of 512 bytes once its serialized
/// length exceeds 256, to dodge middleboxes (old F5 BIG-IP devices) that
/// mishandle ClientHellos landing near common TCP segment boundaries
/// (§4.9's "Alignment padding").
const PADDING_TRIGGER_LEN: usize = 256;
const PADDING_BLOCK: usize = 512;

pub struct ClientHandshake<T: Read + Write> {
    socket: MessageSocket<T>,
    hashes: HandshakeHashes,
    policy: NegotiationPolicy,
    state: HandshakeState,
    client_random: [u8; 32],
    server_random: [u8; 32],
    /// One keypair per TLS 1.3 group we offered a `key_share` for, kept
    /// around until the server names which one it picked (or a
    /// HelloRetryRequest asks us to supply a different one).
    key_shares: Vec<(NamedGroup, Tls13KeyShare)>,
    /// The ordered list of TLS 1.3 groups this client actually offers a
    /// `key_share` for -- the leading entries of `policy.groups` that this
    /// engine has a `Tls13KeyShare` adapter for. A HelloRetryRequest can
    /// still name any group from the full `supported_groups` list; we only
    /// pre-generate shares for this subset to keep ClientHello's size sane.
    offered_groups: Vec<NamedGroup>,
    /// The first ClientHello's fields, kept around so a HelloRetryRequest
    /// retry can resend "the same ClientHello" (RFC 8446 §4.1.2) with only
    /// `key_share`/`cookie` swapped, rather than generating a fresh
    /// `random` that would desynchronize the two flights.
    last_client_hello: Option<ClientHello>,
}

/// How many of `policy.groups`' leading (most preferred) entries get an
/// eagerly-generated `key_share` in the first ClientHello. RFC 8446
/// doesn't mandate a number; real clients typically send one or two so a
/// HelloRetryRequest round trip is the exception, not the rule.
const EAGER_KEY_SHARE_GROUPS: usize = 2;

impl<T: Read + Write> ClientHandshake<T> {
    pub fn new(socket: MessageSocket<T>, policy: NegotiationPolicy) -> ClientHandshake<T> {
        ClientHandshake {
            socket,
            hashes: HandshakeHashes::new(),
            policy,
            state: HandshakeState::Start,
            client_random: [0u8; 32],
            server_random: [0u8; 32],
            key_shares: Vec::new(),
            offered_groups: Vec::new(),
            last_client_hello: None,
        }
    }

    fn send_handshake(&mut self, msg: &HandshakeMessage) -> Result<(), TlsError> {
        let encoded = msg.encode();
        self.hashes.update(&encoded);
        self.socket.send_flight(&[encoded])
    }

    /// Generate a fresh `Tls13KeyShare` for each of `groups`, returning the
    /// wire-ready `(group, share_bytes)` pairs to put in a ClientHello's
    /// `key_share` extension. Replaces any previously generated share for
    /// the same group (RFC 8446 §4.1.2: a HelloRetryRequest retry always
    /// gets a fresh keypair, never a reused one).
    fn generate_key_shares(&mut self, groups: &[NamedGroup]) -> Vec<(NamedGroup, Vec<u8>)> {
        let mut out = Vec::new();
        for &group in groups {
            self.key_shares.retain(|(g, _)| *g != group);
            if let Ok((share, public)) = Tls13KeyShare::generate(group) {
                self.key_shares.push((group, share));
                out.push((group, public));
            }
        }
        out
    }

    fn build_client_hello(&mut self, server_name: Option<&str>) -> ClientHello {
        let mut random = [0u8; 32];
        crypto::rand::fill_random(&mut random);
        self.client_random = random;

        self.offered_groups = self
            .policy
            .groups
            .iter()
            .copied()
            .filter(|g| !g.is_ffdhe())
            .take(EAGER_KEY_SHARE_GROUPS)
            .collect();
        let shares = self.generate_key_shares(&self.offered_groups.clone());

        let mut extensions = ExtensionBlock::new();
        if let Some(name) = server_name {
            let mut w = Writer::new();
            ExtensionBlock::encode_server_name(&mut w, name);
            reparse_single_extension(&mut extensions, w.into_bytes());
        }
        {
            let mut w = Writer::new();
            ExtensionBlock::encode_supported_groups(&mut w, &self.policy.groups);
            reparse_single_extension(&mut extensions, w.into_bytes());
        }
        if !shares.is_empty() {
            let mut w = Writer::new();
            w.u16(crate::extensions::ExtensionType::KeyShare as u16);
            w.length_prefixed16(|w| {
                w.length_prefixed16(|w| {
                    for (group, public) in &shares {
                        w.u16(*group as u16);
                        w.vec16(public);
                    }
                });
            });
            reparse_single_extension(&mut extensions, w.into_bytes());
        }
        // supported_versions (RFC 8446 §4.2.1) is a TLS 1.3 concept; a peer
        // negotiating TLS 1.2 or below reads `legacy_version` instead, so
        // this is only worth sending when our policy actually allows 1.3.
        if self.policy.max_version >= ProtocolVersion::TLS1_3 {
            let mut w = Writer::new();
            w.u16(43); // supported_versions
            w.length_prefixed16(|w| {
                w.u8(2);
                w.u16(u16::from_be_bytes(ProtocolVersion::TLS1_3.to_bytes()));
            });
            reparse_single_extension(&mut extensions, w.into_bytes());
        }
        if !self.policy.signature_schemes.is_empty() {
            let mut w = Writer::new();
            ExtensionBlock::encode_signature_algorithms(&mut w, &self.policy.signature_schemes);
            reparse_single_extension(&mut extensions, w.into_bytes());
        }
        {
            let mut w = Writer::new();
            ExtensionBlock::encode_ec_point_formats(&mut w, &[0]); // uncompressed
            reparse_single_extension(&mut extensions, w.into_bytes());
        }
        if self.policy.require_extended_master_secret {
            let mut w = Writer::new();
            ExtensionBlock::encode_extended_master_secret(&mut w);
            reparse_single_extension(&mut extensions, w.into_bytes());
        }

        ClientHello {
            legacy_version: ProtocolVersion::TLS1_2,
            random,
            session_id: Vec::new(),
            cipher_suites: self.policy.cipher_suites.iter().map(|s| s.id).collect(),
            compression_methods: vec![0],
            extensions,
        }
    }

    /// Send the ClientHello, padded per §4.9 once its length exceeds 256
    /// bytes.
    pub fn send_client_hello(&mut self, server_name: Option<&str>) -> Result<(), TlsError> {
        let ch = self.build_client_hello(server_name);
        self.last_client_hello = Some(ch.clone());
        let msg = HandshakeMessage::ClientHello(ch);
        let mut encoded = msg.encode();
        if encoded.len() > PADDING_TRIGGER_LEN {
            let target = ((encoded.len() + PADDING_BLOCK - 1) / PADDING_BLOCK) * PADDING_BLOCK;
            encoded.resize(target, 0);
        }
        self.hashes.update(&encoded);
        self.socket.send_flight(&[encoded])?;
        self.state = HandshakeState::HelloSent;
        Ok(())
    }

    /// Receive ServerHello, validate the negotiated version/suite against
    /// policy, and (TLS 1.3 only) derive the handshake traffic keys.
    /// Transparently handles at most one HelloRetryRequest round trip
    /// (§4.9's `(HelloRetry?)` state): on HRR this resends a second
    /// ClientHello with a key_share for the server-selected group (and any
    /// cookie echoed back) before looping to read the real ServerHello.
    /// RFC 8446 §4.1.4 forbids a second HRR in the same handshake, so this
    /// only ever retries once.
    pub fn recv_server_hello(&mut self) -> Result<(ServerHello, Option<Tls13Secrets>), TlsError> {
        let sh = self.recv_server_hello_or_hrr()?;
        if sh.is_hello_retry_request() {
            let retry_sh = self.handle_hello_retry(&sh)?;
            if retry_sh.is_hello_retry_request() {
                return Err(TlsError::UnexpectedMessage {
                    expected: "ServerHello".into(),
                    got: "a second HelloRetryRequest".into(),
                });
            }
            return self.finish_server_hello(retry_sh);
        }
        self.finish_server_hello(sh)
    }

    /// Read one ServerHello/HelloRetryRequest off the wire and fold it into
    /// the transcript; the caller decides what to do with either kind.
    fn recv_server_hello_or_hrr(&mut self) -> Result<ServerHello, TlsError> {
        let (content_type, bytes) = self.socket.recv_message()?;
        if content_type != ContentType::Handshake {
            return Err(TlsError::UnexpectedMessage {
                expected: "ServerHello".into(),
                got: format!("{content_type:?}"),
            });
        }
        let msg = HandshakeMessage::decode(&bytes)?;
        let sh = match msg {
            HandshakeMessage::ServerHello(sh) => sh,
            other => {
                return Err(TlsError::UnexpectedMessage {
                    expected: "ServerHello".into(),
                    got: format!("{:?}", other.message_type()),
                })
            }
        };

        if sh.is_hello_retry_request() {
            // §4.4.1: the transcript keeps only a digest of CH1 from this
            // point on, computed *before* HRR's own bytes are folded in.
            let suite = CipherSuite::by_id(sh.cipher_suite)
                .ok_or_else(|| TlsError::IllegalParameter(format!("unknown cipher suite {:#06x}", sh.cipher_suite)))?;
            self.hashes.replace_first_client_hello_with_message_hash(suite.hash);
        }
        self.hashes.update(&bytes);
        Ok(sh)
    }

    /// Resend ClientHello with a key_share for whichever group the
    /// HelloRetryRequest named, echoing its cookie if present, then read
    /// the next message (the real ServerHello, or -- which the caller
    /// rejects -- a second HRR).
    fn handle_hello_retry(&mut self, hrr: &ServerHello) -> Result<ServerHello, TlsError> {
        self.state = HandshakeState::AwaitingHelloRetry;
        let selected_group = hrr
            .extensions
            .key_share_hrr_group()?
            .ok_or_else(|| TlsError::IllegalParameter("HelloRetryRequest missing key_share group".into()))?;
        if !self.policy.groups.contains(&selected_group) {
            return Err(TlsError::IllegalParameter("HelloRetryRequest named a group we did not offer".into()));
        }
        let cookie = hrr.extensions.cookie().map(|c| c.to_vec());

        let mut ch = self
            .last_client_hello
            .clone()
            .ok_or_else(|| TlsError::Internal("HelloRetryRequest received before any ClientHello was sent".into()))?;
        self.offered_groups = vec![selected_group];
        let shares = self.generate_key_shares(&[selected_group]);
        ch.extensions
            .entries
            .retain(|e| e.type_id != crate::extensions::ExtensionType::KeyShare as u16 && e.type_id != crate::extensions::ExtensionType::Cookie as u16);
        {
            let mut w = Writer::new();
            w.u16(crate::extensions::ExtensionType::KeyShare as u16);
            w.length_prefixed16(|w| {
                w.length_prefixed16(|w| {
                    for (group, public) in &shares {
                        w.u16(*group as u16);
                        w.vec16(public);
                    }
                });
            });
            reparse_single_extension(&mut ch.extensions, w.into_bytes());
        }
        if let Some(cookie) = cookie {
            let mut w = Writer::new();
            ExtensionBlock::encode_cookie(&mut w, &cookie);
            reparse_single_extension(&mut ch.extensions, w.into_bytes());
        }

        let msg = HandshakeMessage::ClientHello(ch);
        let mut encoded = msg.encode();
        if encoded.len() > PADDING_TRIGGER_LEN {
            let target = ((encoded.len() + PADDING_BLOCK - 1) / PADDING_BLOCK) * PADDING_BLOCK;
            encoded.resize(target, 0);
        }
        self.hashes.update(&encoded);
        self.socket.send_flight(&[encoded])?;
        self.state = HandshakeState::HelloSent;

        self.recv_server_hello_or_hrr()
    }

    /// Common tail of `recv_server_hello` once we have a genuine (non-HRR)
    /// ServerHello in hand: negotiate version/suite, and for TLS 1.3
    /// compute the shared secret from whichever group the server picked.
    fn finish_server_hello(&mut self, sh: ServerHello) -> Result<(ServerHello, Option<Tls13Secrets>), TlsError> {
        let suite = CipherSuite::by_id(sh.cipher_suite)
            .ok_or_else(|| TlsError::IllegalParameter(format!("unknown cipher suite {:#06x}", sh.cipher_suite)))?;
        if !self.policy.cipher_suites.iter().any(|s| s.id == suite.id) {
            return Err(TlsError::IllegalParameter("server selected a suite we did not offer".into()));
        }

        let versions = sh.extensions.supported_versions_list().unwrap_or_default();
        let negotiated_version = if suite.is_tls13() {
            ProtocolVersion::TLS1_3
        } else {
            sh.legacy_version
        };
        if versions.is_empty() && suite.is_tls13() {
            return Err(TlsError::IllegalParameter("TLS 1.3 suite without supported_versions".into()));
        }
        if negotiated_version < self.policy.min_version || negotiated_version > self.policy.max_version {
            return Err(TlsError::ProtocolVersion(format!("{negotiated_version:?} outside configured range")));
        }

        // §4.9: a SHA-256 PRF suite presumes TLS 1.2's PRF, which only
        // exists from TLS 1.2 onward -- pairing one with an earlier
        // negotiated version is a contradiction, not just unusual.
        if !suite.is_tls13()
            && suite.hash != HashAlgorithm::LegacyMd5Sha1
            && negotiated_version < ProtocolVersion::TLS1_2
        {
            return Err(TlsError::IllegalParameter(format!(
                "{:?} requires TLS 1.2's PRF but {negotiated_version:?} was negotiated",
                suite.hash
            )));
        }

        if !suite.is_tls13() {
            self.server_random = sh.random;
            self.state = HandshakeState::AwaitingServerKeyExchange;
            return Ok((sh, None));
        }

        let (peer_group, peer_public) = sh
            .extensions
            .key_share_selected()?
            .ok_or_else(|| TlsError::IllegalParameter("ServerHello missing key_share".into()))?;
        let (_, our_share) = self
            .key_shares
            .iter()
            .position(|(g, _)| *g == peer_group)
            .map(|idx| self.key_shares.swap_remove(idx))
            .ok_or_else(|| TlsError::IllegalParameter("ServerHello selected a group we did not offer a key_share for".into()))?;
        let shared_secret = our_share.shared_secret(&peer_public)?;

        let secrets = Tls13Secrets::new(suite.hash, None, &shared_secret);
        self.state = HandshakeState::AwaitingEncryptedExtensions;
        Ok((sh, Some(secrets)))
    }

    /// After ServerHello, install the handshake traffic keys on both
    /// directions of the record layer (§4.4's `calcPendingStates`
    /// analogue for TLS 1.3, which derives straight from the secret tree
    /// rather than a PRF key block).
    pub fn install_handshake_traffic_keys(
        &mut self,
        suite: CipherSuite,
        secrets: &Tls13Secrets,
    ) {
        let transcript = self.hashes.digest(TranscriptHash::Intrinsic(suite.hash));
        let client_secret = secrets.client_handshake_traffic_secret(&transcript);
        let server_secret = secrets.server_handshake_traffic_secret(&transcript);
        let algo = crate::crypto::aead::for_bulk(suite.bulk);
        let key_len = algo.key_len();
        let iv_len = algo.nonce_len();
        let recipe = recipe_for(suite.bulk, ProtocolVersion::TLS1_3);

        let write_state = build_tls13_state(secrets, &client_secret, suite, key_len, iv_len, recipe);
        let read_state = build_tls13_state(secrets, &server_secret, suite, key_len, iv_len, recipe);

        self.socket.layer_mut().stage_write(write_state);
        self.socket.layer_mut().stage_read(read_state);
        let _ = self.socket.layer_mut().change_write_state();
        let _ = self.socket.layer_mut().change_read_state();
    }

    /// Verify the server's Finished message against the handshake
    /// transcript. Mismatch maps to `decrypt_error` per §4.9.
    pub fn verify_server_finished(&mut self, suite: CipherSuite, secrets: &Tls13Secrets, server_hs_secret: &[u8]) -> Result<(), TlsError> {
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
        let finished_key = secrets.finished_key(server_hs_secret);
        let hash_adapter = crate::crypto::hash::for_modern_hash(suite.hash);
        let expected = hash_adapter.hmac(&finished_key, &transcript);
        if !constant_time_eq(&expected, &finished.verify_data) {
            return Err(TlsError::LocalAlert(AlertDescription::DecryptError));
        }
        self.hashes.update(&bytes);
        self.state = HandshakeState::AwaitingFinished;
        Ok(())
    }

    /// Receive and hash every message of the server's first flight
    /// (EncryptedExtensions, optional CertificateRequest/Certificate/
    /// CertificateVerify) up to and including a verified Finished, in one
    /// call. This crate doesn't yet validate the server's certificate
    /// chain or CertificateVerify signature against a trust store, so
    /// those messages are hashed into the transcript and otherwise
    /// ignored; Finished is the one message this path actually checks.
    pub fn complete_server_flight(
        &mut self,
        suite: CipherSuite,
        secrets: &Tls13Secrets,
        server_hs_secret: &[u8],
    ) -> Result<(), TlsError> {
        loop {
            let (content_type, bytes) = self.socket.recv_message()?;
            if content_type != ContentType::Handshake {
                return Err(TlsError::UnexpectedMessage {
                    expected: "Handshake".into(),
                    got: format!("{content_type:?}"),
                });
            }
            let msg = HandshakeMessage::decode(&bytes)?;
            if let HandshakeMessage::Finished(finished) = msg {
                let transcript = self.hashes.digest(TranscriptHash::Intrinsic(suite.hash));
                let finished_key = secrets.finished_key(server_hs_secret);
                let hash_adapter = crate::crypto::hash::for_modern_hash(suite.hash);
                let expected = hash_adapter.hmac(&finished_key, &transcript);
                if !constant_time_eq(&expected, &finished.verify_data) {
                    return Err(TlsError::LocalAlert(AlertDescription::DecryptError));
                }
                self.hashes.update(&bytes);
                self.state = HandshakeState::AwaitingFinished;
                return Ok(());
            }
            self.hashes.update(&bytes);
        }
    }

    /// Drive a TLS ≤1.2 ECDHE handshake (RFC 8422/RFC 5246) to completion
    /// from the point `recv_server_hello` handed back a non-1.3 suite:
    /// Certificate/ServerKeyExchange/[CertificateRequest]/ServerHelloDone
    /// in, ClientKeyExchange/ChangeCipherSpec/Finished out, then the
    /// server's ChangeCipherSpec/Finished verified back. `verify_fn` is
    /// handed the peer's raw certificate chain (as received, unparsed) plus
    /// the exact bytes the ServerKeyExchange signature covers -- this
    /// engine doesn't parse X.509 itself, so chain validation and signature
    /// verification against the leaf's public key are both the caller's
    /// responsibility, mirroring how `sign_fn` keeps private-key material
    /// out of this crate on the server side. `rsa_public_key_fn` plays the
    /// same role for static-RSA suites, handing back the leaf's RSA public
    /// key as a PKCS#1-DER `RSAPublicKey` so the pre-master secret can be
    /// encrypted under it -- RSA suites carry no ServerKeyExchange, so
    /// there is no signature to verify here, only a key to encrypt to.
    /// `CertificateRequest` is answered with an empty `Certificate` (RFC
    /// 5246 §7.4.6: "if no suitable certificate is available, the client
    /// SHOULD send a certificate message containing no certificates"),
    /// this crate does not hold or sign with client private keys.
    pub fn run_legacy_client_handshake(
        &mut self,
        suite: CipherSuite,
        sh: &ServerHello,
        verify_fn: impl Fn(&[Vec<u8>], &[u8], Option<SignatureScheme>, &[u8]) -> Result<(), TlsError>,
        rsa_public_key_fn: impl Fn(&[Vec<u8>]) -> Result<Vec<u8>, TlsError>,
    ) -> Result<(), TlsError> {
        let negotiated_version = sh.legacy_version;
        let server_random = self.server_random;
        let extended_master_secret = self.policy.require_extended_master_secret
            && sh.extensions.has(crate::extensions::ExtensionType::ExtendedMasterSecret);
        let encrypt_then_mac = sh.extensions.has(crate::extensions::ExtensionType::EncryptThenMac);

        let mut peer_certs: Vec<Vec<u8>> = Vec::new();
        let mut ecdhe_params: Option<kex::DecodedServerKeyExchange> = None;
        let mut dhe_params: Option<kex::DheServerParams> = None;
        let mut client_cert_requested = false;
        loop {
            let (content_type, bytes) = self.socket.recv_message()?;
            if content_type != ContentType::Handshake {
                return Err(TlsError::UnexpectedMessage {
                    expected: "Handshake".into(),
                    got: format!("{content_type:?}"),
                });
            }
            let msg = HandshakeMessage::decode(&bytes)?;
            match &msg {
                HandshakeMessage::Certificate(cert) => {
                    peer_certs = cert.entries.iter().map(|e| e.cert_data.clone()).collect();
                }
                HandshakeMessage::ServerKeyExchange(ske) => match suite.kx {
                    crate::protocol::KeyExchangeKind::Ecdhe => {
                        let decoded = kex::decode_server_key_exchange(&ske.body, negotiated_version)?;
                        let mut signing_input = self.client_random.to_vec();
                        signing_input.extend_from_slice(&server_random);
                        signing_input.extend_from_slice(&decoded.params_bytes);
                        verify_fn(&peer_certs, &signing_input, decoded.scheme, &decoded.signature)?;
                        ecdhe_params = Some(decoded);
                    }
                    crate::protocol::KeyExchangeKind::Dhe => {
                        let (params, params_bytes, scheme, signature) = kex::decode_server_key_exchange_dhe(&ske.body)?;
                        let mut signing_input = self.client_random.to_vec();
                        signing_input.extend_from_slice(&server_random);
                        signing_input.extend_from_slice(&params_bytes);
                        verify_fn(&peer_certs, &signing_input, scheme, &signature)?;
                        dhe_params = Some(params);
                    }
                    other => {
                        return Err(TlsError::Internal(format!("{other:?} suites do not carry a ServerKeyExchange")))
                    }
                },
                HandshakeMessage::CertificateRequest(_) => {
                    client_cert_requested = true;
                }
                HandshakeMessage::ServerHelloDone => {
                    self.hashes.update(&bytes);
                    break;
                }
                other => {
                    return Err(TlsError::UnexpectedMessage {
                        expected: "server legacy handshake flight".into(),
                        got: format!("{:?}", other.message_type()),
                    })
                }
            }
            self.hashes.update(&bytes);
        }
        self.state = HandshakeState::AwaitingServerHelloDone;

        if client_cert_requested {
            self.send_handshake(&HandshakeMessage::Certificate(crate::handshake::messages::Certificate {
                certificate_request_context: Vec::new(),
                entries: Vec::new(),
            }))?;
        }

        let (cke_body, shared_secret) = match suite.kx {
            crate::protocol::KeyExchangeKind::Ecdhe => {
                let server_params = ecdhe_params
                    .ok_or_else(|| TlsError::IllegalParameter("ECDHE suite negotiated without a ServerKeyExchange".into()))?;
                let ecdhe = EcdheKeyExchange::generate(server_params.params.named_group)?;
                let client_public = ecdhe.public();
                let shared_secret = ecdhe.shared_secret(&server_params.params.public)?;
                (kex::encode_client_key_exchange_ecdhe(&client_public), shared_secret)
            }
            crate::protocol::KeyExchangeKind::Dhe => {
                let server_params =
                    dhe_params.ok_or_else(|| TlsError::IllegalParameter("DHE suite negotiated without a ServerKeyExchange".into()))?;
                let group = server_params
                    .matches_known_group()
                    .ok_or_else(|| TlsError::InsufficientSecurity("server FFDHE prime is not one of our known groups".into()))?;
                kex::validate_ffdhe_bit_length(server_params.prime.len() * 8, self.policy.min_key_size, self.policy.max_key_size)?;
                let dhe = kex::DheKeyExchange::generate(group)?;
                let client_public = dhe.public.clone();
                let shared_secret = dhe.shared_secret(&server_params.public)?;
                (kex::encode_client_key_exchange_dhe(&client_public), shared_secret)
            }
            crate::protocol::KeyExchangeKind::Rsa => {
                let server_pubkey_der = rsa_public_key_fn(&peer_certs)?;
                let pms = kex::RsaPreMasterSecret::generate(ProtocolVersion::TLS1_2);
                let encrypted = pms.encrypt(&server_pubkey_der)?;
                (kex::encode_client_key_exchange_rsa(&encrypted), pms.0.to_vec())
            }
            other => return Err(TlsError::Internal(format!("{other:?} key exchange is not implemented"))),
        };

        self.send_handshake(&HandshakeMessage::ClientKeyExchange(ClientKeyExchange { body: cke_body }))?;
        self.state = HandshakeState::SentClientFlight;

        let ems_seed = extended_master_secret.then(|| self.hashes.digest(TranscriptHash::Intrinsic(suite.hash)));
        let master_secret = key_schedule::master_secret(
            negotiated_version,
            suite.hash,
            &shared_secret,
            &self.client_random,
            &server_random,
            ems_seed.as_deref(),
        );

        let (write_state, read_state) =
            key_schedule::legacy_cipher_states(suite, negotiated_version, &master_secret, &self.client_random, &server_random, encrypt_then_mac);
        self.socket.layer_mut().stage_write(write_state);
        self.socket.layer_mut().stage_read(read_state);

        self.socket.send_change_cipher_spec()?;
        self.socket.layer_mut().change_write_state()?;
        self.socket.reset_defragmenter();

        let client_verify_data =
            key_schedule::legacy_finished_verify_data(negotiated_version, suite.hash, &master_secret, b"client finished", &self.hashes);
        self.send_handshake(&HandshakeMessage::Finished(Finished {
            verify_data: client_verify_data,
        }))?;

        let (content_type, _) = self.socket.recv_message()?;
        if content_type != ContentType::ChangeCipherSpec {
            return Err(TlsError::UnexpectedMessage {
                expected: "ChangeCipherSpec".into(),
                got: format!("{content_type:?}"),
            });
        }
        self.socket.layer_mut().change_read_state()?;

        let expected_server_verify_data =
            key_schedule::legacy_finished_verify_data(negotiated_version, suite.hash, &master_secret, b"server finished", &self.hashes);
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
        if !constant_time_eq(&expected_server_verify_data, &finished.verify_data) {
            return Err(TlsError::LocalAlert(AlertDescription::DecryptError));
        }

        self.state = HandshakeState::Established;
        Ok(())
    }

    /// Build and send our own Finished, transitioning to `Established`.
    pub fn send_client_finished(&mut self, suite: CipherSuite, secrets: &Tls13Secrets, client_hs_secret: &[u8]) -> Result<(), TlsError> {
        let transcript = self.hashes.digest(TranscriptHash::Intrinsic(suite.hash));
        let finished_key = secrets.finished_key(client_hs_secret);
        let hash_adapter = crate::crypto::hash::for_modern_hash(suite.hash);
        let verify_data = hash_adapter.hmac(&finished_key, &transcript);
        self.send_handshake(&HandshakeMessage::Finished(Finished { verify_data }))?;
        self.state = HandshakeState::Established;
        Ok(())
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn transcript_hash(&self, suite: CipherSuite) -> Vec<u8> {
        self.hashes.digest(TranscriptHash::Intrinsic(suite.hash))
    }

    pub fn into_socket(self) -> MessageSocket<T> {
        self.socket
    }

    pub fn socket_mut(&mut self) -> &mut MessageSocket<T> {
        &mut self.socket
    }
}

fn build_tls13_state(
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
/// `ExtensionBlock` entry. The encode helpers in `ExtensionBlock` emit
/// `type(2) || length(2) || body`, which is exactly one `RawExtension`.
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

    #[test]
    fn constant_time_eq_rejects_length_mismatch_without_panicking() {
        assert!(!constant_time_eq(&[1, 2, 3], &[1, 2]));
    }

    #[test]
    fn constant_time_eq_accepts_equal_slices() {
        assert!(constant_time_eq(&[9, 9, 9], &[9, 9, 9]));
    }
}
