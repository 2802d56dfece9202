//! KeyExchange (§4.8): one strategy per `NamedGroup` family. Each variant
//! validates its own peer material before handing back a shared secret --
//! none of this is optional hardening, it's what separates a real
//! implementation from one that's merely round-trip-correct.

use crate::codec::{Reader, Writer};
use crate::error::TlsError;
use crate::protocol::{NamedGroup, ProtocolVersion, SignatureScheme};
use num_bigint_dig::{BigUint, RandBigInt};
use p256::ecdh::EphemeralSecret as P256EphemeralSecret;
use p256::EncodedPoint as P256EncodedPoint;
use p384::ecdh::EphemeralSecret as P384EphemeralSecret;
use p384::EncodedPoint as P384EncodedPoint;
use rand_core::OsRng;
use x25519_dalek::{EphemeralSecret as X25519EphemeralSecret, PublicKey as X25519PublicKey};

/// A well-known FFDHE group's prime and generator (RFC 7919 Appendix A),
/// enough both to validate a peer's share (bit-length policy, `1 < Y <
/// p-1`) and to actually run the exchange via `num-bigint-dig`'s modexp.
pub struct FfdheGroup {
    pub group: NamedGroup,
    pub bit_length: usize,
    prime_hex: &'static str,
    pub generator: u32,
}

/// RFC 7919 Appendix A.1/A.2/A.3 primes. ffdhe6144/ffdhe8192 are known to
/// `NamedGroup`/policy checks (bit-length validation) but this crate
/// doesn't embed their primes -- `generate()` on those groups fails with
/// `TlsError::Internal` rather than silently picking a different group.
pub fn ffdhe_groups() -> Vec<FfdheGroup> {
    vec![
        FfdheGroup {
            group: NamedGroup::Ffdhe2048,
            bit_length: 2048,
            prime_hex: "FFFFFFFFFFFFFFFFADF85458A2BB4A9AAFDC5620273D3CF1D8B9C583CE2D3695A9E13641146433FBCC939DCE249B3EF97D2FE363630C75D8F681B202AEC4617AD3DF1ED5D5FD65612433F51F5F066ED0856365553DED1AF3B557135E7F57C935984F0C70E0E68B77E2A689DAF3EFE8721DF158A136ADE73530ACCA4F483A797ABC0AB182B324FB61D108A94BB2C8E3FBB96ADAB760D7F4681D4F42A3DE394DF4AE56EDE76372BB190B07A7C8EE0A6D709E02FCE1CDF7E2ECC03404CD28342F619172FE9CE98583FF8E4F1232EEF28183C3FE3B1B4C6FAD733BB5FCBC2EC22005C58EF1837D1683B2C6F34A26C1B2EFFA886B423861285C97FFFFFFFFFFFFFFFF",
            generator: 2,
        },
        FfdheGroup {
            group: NamedGroup::Ffdhe3072,
            bit_length: 3072,
            prime_hex: "FFFFFFFFFFFFFFFFADF85458A2BB4A9AAFDC5620273D3CF1D8B9C583CE2D3695A9E13641146433FBCC939DCE249B3EF97D2FE363630C75D8F681B202AEC4617AD3DF1ED5D5FD65612433F51F5F066ED0856365553DED1AF3B557135E7F57C935984F0C70E0E68B77E2A689DAF3EFE8721DF158A136ADE73530ACCA4F483A797ABC0AB182B324FB61D108A94BB2C8E3FBB96ADAB760D7F4681D4F42A3DE394DF4AE56EDE76372BB190B07A7C8EE0A6D709E02FCE1CDF7E2ECC03404CD28342F619172FE9CE98583FF8E4F1232EEF28183C3FE3B1B4C6FAD733BB5FCBC2EC22005C58EF1837D1683B2C6F34A26C1B2EFFA886B4238611FCFDCDE355B3B6519035BBC34F4DEF99C023861B46FC9D6E6C9077AD91D2691F7F7EE598CB0FAC186D91CAEFE130985139270B4130C93BC437944F4FD4452E2D74DD364F2E21E71F54BFF5CAE82AB9C9DF69EE86D2BC522363A0DABC521979B0DEADA1DBF9A42D5C4484E0ABCD06BFA53DDEF3C1B20EE3FD59D7C25E41D2B669E1EF16E6F52C3164DF4FB7930E9E4E58857B6AC7D5F42D69F6D187763CF1D5503400487F55BA57E31CC7A7135C886EFB4318AED6A1E012D9E6832A907600A918130C46DC778F971AD0038092999A333CB8B7A1A1DB93D7140003C2A4ECEA9F98D0ACC0A8291CDCEC97DCF8EC9B55A7F88A46B4DB5A851F44182E1C68A007E5E655F6AFFFFFFFFFFFFFFFF",
            generator: 2,
        },
        FfdheGroup {
            group: NamedGroup::Ffdhe4096,
            bit_length: 4096,
            prime_hex: "FFFFFFFFFFFFFFFFADF85458A2BB4A9AAFDC5620273D3CF1D8B9C583CE2D3695A9E13641146433FBCC939DCE249B3EF97D2FE363630C75D8F681B202AEC4617AD3DF1ED5D5FD65612433F51F5F066ED0856365553DED1AF3B557135E7F57C935984F0C70E0E68B77E2A689DAF3EFE8721DF158A136ADE73530ACCA4F483A797ABC0AB182B324FB61D108A94BB2C8E3FBB96ADAB760D7F4681D4F42A3DE394DF4AE56EDE76372BB190B07A7C8EE0A6D709E02FCE1CDF7E2ECC03404CD28342F619172FE9CE98583FF8E4F1232EEF28183C3FE3B1B4C6FAD733BB5FCBC2EC22005C58EF1837D1683B2C6F34A26C1B2EFFA886B4238611FCFDCDE355B3B6519035BBC34F4DEF99C023861B46FC9D6E6C9077AD91D2691F7F7EE598CB0FAC186D91CAEFE130985139270B4130C93BC437944F4FD4452E2D74DD364F2E21E71F54BFF5CAE82AB9C9DF69EE86D2BC522363A0DABC521979B0DEADA1DBF9A42D5C4484E0ABCD06BFA53DDEF3C1B20EE3FD59D7C25E41D2B669E1EF16E6F52C3164DF4FB7930E9E4E58857B6AC7D5F42D69F6D187763CF1D5503400487F55BA57E31CC7A7135C886EFB4318AED6A1E012D9E6832A907600A918130C46DC778F971AD0038092999A333CB8B7A1A1DB93D7140003C2A4ECEA9F98D0ACC0A8291CDCEC97DCF8EC9B55A7F88A46B4DB5A851F44182E1C68A007E5E0DD9020BFD64B645036C7A4E677D2C38532A3A23BA4442CAF53EA63BB454329B7624C8917BDD64B1C0FD4CB38E8C334C701C3ACDAD0657FCCFEC719B1F5C3E4E46041F388147FB4CFDB477A52471F7A9A96910B855322EDB6340D8A00EF092350511E30ABEC1FFF9E3A26E7FB29F8C183023C3587E38DA0077D9B4763E4E4B94B2BBC194C6651E77CAF992EEAAC0232A281BF6B3A739C1226116820AE8DB5847A67CBEF9C9091B462D538CD72B03746AE77F5E62292C311562A846505DC82DB854338AE49F5235C95B91178CCF2DD5CACEF403EC9D1810C6272B045B3B71F9DC6B80D63FDD4A8E9ADB1E6962A69526D43161C1A41D570D7938DAD4A40E329CD0E40E65FFFFFFFFFFFFFFFF",
            generator: 2,
        },
    ]
}

impl FfdheGroup {
    pub fn for_group(group: NamedGroup) -> Option<FfdheGroup> {
        ffdhe_groups().into_iter().find(|g| g.group == group)
    }

    fn prime(&self) -> BigUint {
        BigUint::parse_bytes(self.prime_hex.as_bytes(), 16).expect("static FFDHE prime is valid hex")
    }

    fn byte_len(&self) -> usize {
        self.bit_length / 8
    }
}

/// One FFDHE ephemeral keypair (RFC 7919): `x` random in `[2, p-2]`,
/// public share `g^x mod p`.
pub struct DheKeyExchange {
    group: FfdheGroup,
    private: BigUint,
    pub public: Vec<u8>,
}

impl DheKeyExchange {
    pub fn generate(group: NamedGroup) -> Result<DheKeyExchange, TlsError> {
        let group = FfdheGroup::for_group(group)
            .ok_or_else(|| TlsError::Internal(format!("{group:?} has no embedded FFDHE prime")))?;
        let p = group.prime();
        let two = BigUint::from(2u32);
        let upper = &p - &two;
        // `num-bigint-dig`'s `RandBigInt` is implemented against the `rand`
        // crate's `Rng`, not `rand_core`'s -- a distinct OsRng from the
        // one the ECDHE adapters above use.
        let private = rand::rngs::OsRng.gen_biguint_range(&two, &upper);
        let generator = BigUint::from(group.generator);
        let public_int = generator.modpow(&private, &p);
        let public = to_fixed_width(&public_int, group.byte_len());
        Ok(DheKeyExchange { group, private, public })
    }

    /// Compute `peer_public^private mod p`, after validating `peer_public`
    /// lies in `(1, p-1)` per §4.8.
    pub fn shared_secret(self, peer_public: &[u8]) -> Result<Vec<u8>, TlsError> {
        let p = self.group.prime();
        let y = BigUint::from_bytes_be(peer_public);
        let one = BigUint::from(1u32);
        if y <= one || y >= &p - &one {
            return Err(TlsError::IllegalParameter("FFDHE peer public value out of range (1, p-1)".into()));
        }
        let shared = y.modpow(&self.private, &p);
        Ok(to_fixed_width(&shared, self.group.byte_len()))
    }

    pub fn params(&self) -> DheServerParams {
        DheServerParams {
            prime: to_fixed_width(&self.group.prime(), self.group.byte_len()),
            generator: self.group.generator.to_be_bytes().to_vec(),
            public: self.public.clone(),
        }
    }
}

fn to_fixed_width(value: &BigUint, width: usize) -> Vec<u8> {
    let mut bytes = value.to_bytes_be();
    if bytes.len() < width {
        let mut padded = vec![0u8; width - bytes.len()];
        padded.append(&mut bytes);
        padded
    } else {
        bytes
    }
}

/// Trim generator bytes (written minimal, e.g. a bare `02`) down to their
/// value for matching against the embedded group table during negotiation.
fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let first_nonzero = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len().saturating_sub(1));
    &bytes[first_nonzero..]
}

/// RFC 5246 §7.4.3 `ServerDHParams`: dh_p, dh_g, dh_Ys, each a `<1..2^16-1>`
/// opaque vector.
pub struct DheServerParams {
    pub prime: Vec<u8>,
    pub generator: Vec<u8>,
    pub public: Vec<u8>,
}

impl DheServerParams {
    pub fn params_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.vec16(&self.prime);
        w.vec16(&self.generator);
        w.vec16(&self.public);
        w.into_bytes()
    }

    /// Identify which `NamedGroup` (if any) this `(p, g)` pair matches one
    /// of our embedded RFC 7919 groups, so the client can validate the
    /// server's chosen group was one we actually offered rather than
    /// trusting an arbitrary peer-supplied prime outright.
    pub fn matches_known_group(&self) -> Option<NamedGroup> {
        ffdhe_groups().into_iter().find(|g| {
            g.byte_len() == self.prime.len()
                && to_fixed_width(&g.prime(), g.byte_len()) == self.prime
                && trim_leading_zeros(&self.generator) == trim_leading_zeros(&g.generator.to_be_bytes())
        }).map(|g| g.group)
    }
}

pub fn decode_server_key_exchange_dhe(body: &[u8]) -> Result<(DheServerParams, Vec<u8>, Option<SignatureScheme>, Vec<u8>), TlsError> {
    let mut r = Reader::new(body);
    let prime = r.vec16()?.to_vec();
    let generator = r.vec16()?.to_vec();
    let public = r.vec16()?.to_vec();
    let params_len = 2 + prime.len() + 2 + generator.len() + 2 + public.len();
    if params_len > body.len() {
        return Err(TlsError::Decode("ServerKeyExchange DHE params overrun the message body".into()));
    }
    let params_bytes = body[..params_len].to_vec();
    // signature_algorithm presence depends on version, left to the caller
    // (mirrors `decode_server_key_exchange`'s ECDHE path, which threads the
    // version through explicitly -- this one is only ever called for
    // TLS 1.2, the only version this engine negotiates DHE suites at).
    let scheme_raw = r.u16()?;
    let scheme = Some(
        SignatureScheme::from_u16(scheme_raw).ok_or_else(|| TlsError::IllegalParameter(format!("unknown signature scheme {scheme_raw:#06x}")))?,
    );
    let signature = r.vec16()?.to_vec();
    Ok((DheServerParams { prime, generator, public }, params_bytes, scheme, signature))
}

pub fn encode_client_key_exchange_dhe(public: &[u8]) -> Vec<u8> {
    let mut w = Writer::new();
    w.vec16(public);
    w.into_bytes()
}

pub fn decode_client_key_exchange_dhe(body: &[u8]) -> Result<Vec<u8>, TlsError> {
    let mut r = Reader::new(body);
    Ok(r.vec16()?.to_vec())
}

/// RSA static key exchange (RFC 5246 §7.4.7.1). The pre-master secret is a
/// client-chosen 48-byte value (`client_version(2) || random(46)`)
/// encrypted under the server's RSA public key with PKCS#1v1.5. This
/// engine doesn't parse X.509 -- the caller hands back the leaf's RSA
/// public key, extracted from whatever chain-validation it already does,
/// as a PKCS#1-DER `RSAPublicKey` (the same convention `crypto::sig`'s
/// verifiers use for SPKI-decoded keys).
pub struct RsaPreMasterSecret(pub [u8; 48]);

impl RsaPreMasterSecret {
    pub fn generate(client_version: ProtocolVersion) -> RsaPreMasterSecret {
        let mut pms = [0u8; 48];
        pms[0..2].copy_from_slice(&client_version.to_bytes());
        crate::crypto::rand::fill_random(&mut pms[2..]);
        RsaPreMasterSecret(pms)
    }

    pub fn encrypt(&self, server_pubkey_pkcs1_der: &[u8]) -> Result<Vec<u8>, TlsError> {
        use rsa::pkcs1::DecodeRsaPublicKey;
        let pk = rsa::RsaPublicKey::from_pkcs1_der(server_pubkey_pkcs1_der)
            .map_err(|e| TlsError::Decode(format!("rsa public key: {e}")))?;
        pk.encrypt(&mut OsRng, rsa::Pkcs1v15Encrypt, &self.0)
            .map_err(|e| TlsError::Internal(format!("rsa encryption failed: {e}")))
    }

    /// Server-side decryption with the Bleichenbacher countermeasure (RFC
    /// 5246 §7.4.7.1): on any decryption or version-check failure, proceed
    /// with a fresh random pre-master secret instead of returning an error,
    /// so a padding-oracle can't be built from our response.
    pub fn decrypt(encrypted: &[u8], server_key: &rsa::RsaPrivateKey, expected_client_version: ProtocolVersion) -> RsaPreMasterSecret {
        let fallback = RsaPreMasterSecret::generate(expected_client_version);
        match server_key.decrypt(rsa::Pkcs1v15Encrypt, encrypted) {
            Ok(bytes) if bytes.len() == 48 && bytes[0..2] == expected_client_version.to_bytes() => {
                let mut pms = [0u8; 48];
                pms.copy_from_slice(&bytes);
                RsaPreMasterSecret(pms)
            }
            _ => fallback,
        }
    }
}

pub fn encode_client_key_exchange_rsa(encrypted_pms: &[u8]) -> Vec<u8> {
    let mut w = Writer::new();
    w.vec16(encrypted_pms);
    w.into_bytes()
}

pub fn decode_client_key_exchange_rsa(body: &[u8]) -> Result<Vec<u8>, TlsError> {
    let mut r = Reader::new(body);
    Ok(r.vec16()?.to_vec())
}

/// Pick the first group in `client_groups` (client preference order) that
/// also appears in `server_groups`. §4.8: "no overlap -> InternalError".
pub fn negotiate_group(client_groups: &[NamedGroup], server_groups: &[NamedGroup]) -> Result<NamedGroup, TlsError> {
    client_groups
        .iter()
        .find(|g| server_groups.contains(g))
        .copied()
        .ok_or_else(|| TlsError::Internal("no mutually supported key exchange group".into()))
}

/// Validate policy on a DH prime's bit length before using a
/// ServerKeyExchange's group. §4.8: reject primes outside [min_key_size,
/// max_key_size] with `InsufficientSecurity`.
pub fn validate_ffdhe_bit_length(bit_length: usize, min_key_size: usize, max_key_size: usize) -> Result<(), TlsError> {
    if bit_length < min_key_size || bit_length > max_key_size {
        return Err(TlsError::InsufficientSecurity(format!(
            "FFDHE prime bit length {bit_length} outside [{min_key_size}, {max_key_size}]"
        )));
    }
    Ok(())
}

/// X25519 ephemeral keypair plus the RFC 7748 shared-secret computation.
pub struct X25519KeyExchange {
    secret: X25519EphemeralSecret,
    pub public: [u8; 32],
}

impl X25519KeyExchange {
    pub fn generate() -> X25519KeyExchange {
        let secret = X25519EphemeralSecret::random_from_rng(OsRng);
        let public = X25519PublicKey::from(&secret);
        X25519KeyExchange {
            secret,
            public: *public.as_bytes(),
        }
    }

    /// Compute the shared secret with a peer's public key. A result of all
    /// zeros indicates a small-subgroup/contributory-behavior attack and
    /// must be rejected (RFC 7748 §6.1, restated by §4.8).
    pub fn shared_secret(self, peer_public: &[u8]) -> Result<Vec<u8>, TlsError> {
        if peer_public.len() != 32 {
            return Err(TlsError::Decode("x25519 public key must be 32 bytes".into()));
        }
        let mut peer_bytes = [0u8; 32];
        peer_bytes.copy_from_slice(peer_public);
        let peer = X25519PublicKey::from(peer_bytes);
        let shared = self.secret.diffie_hellman(&peer);
        if shared.as_bytes().iter().all(|&b| b == 0) {
            return Err(TlsError::InsufficientSecurity("x25519 shared secret is all-zero".into()));
        }
        Ok(shared.as_bytes().to_vec())
    }
}

/// NIST P-256 ephemeral ECDH keypair (uncompressed point format only, per
/// §4.8's mutual-set requirement).
pub struct P256KeyExchange {
    secret: P256EphemeralSecret,
    pub public: Vec<u8>,
}

impl P256KeyExchange {
    pub fn generate() -> P256KeyExchange {
        let secret = P256EphemeralSecret::random(&mut OsRng);
        let public = P256EncodedPoint::from(secret.public_key());
        P256KeyExchange {
            secret,
            public: public.as_bytes().to_vec(),
        }
    }

    pub fn shared_secret(self, peer_public: &[u8]) -> Result<Vec<u8>, TlsError> {
        let point = P256EncodedPoint::from_bytes(peer_public)
            .map_err(|e| TlsError::Decode(format!("p256 public key: {e}")))?;
        let peer_key = p256::PublicKey::from_encoded_point(&point);
        let peer_key: p256::PublicKey = Option::from(peer_key)
            .ok_or_else(|| TlsError::IllegalParameter("p256 public key not on curve".into()))?;
        let shared = self.secret.diffie_hellman(&peer_key);
        Ok(shared.raw_secret_bytes().to_vec())
    }
}

pub struct P384KeyExchange {
    secret: P384EphemeralSecret,
    pub public: Vec<u8>,
}

impl P384KeyExchange {
    pub fn generate() -> P384KeyExchange {
        let secret = P384EphemeralSecret::random(&mut OsRng);
        let public = P384EncodedPoint::from(secret.public_key());
        P384KeyExchange {
            secret,
            public: public.as_bytes().to_vec(),
        }
    }

    pub fn shared_secret(self, peer_public: &[u8]) -> Result<Vec<u8>, TlsError> {
        let point = P384EncodedPoint::from_bytes(peer_public)
            .map_err(|e| TlsError::Decode(format!("p384 public key: {e}")))?;
        let peer_key = p384::PublicKey::from_encoded_point(&point);
        let peer_key: p384::PublicKey = Option::from(peer_key)
            .ok_or_else(|| TlsError::IllegalParameter("p384 public key not on curve".into()))?;
        let shared = self.secret.diffie_hellman(&peer_key);
        Ok(shared.raw_secret_bytes().to_vec())
    }
}

/// Hybrid ML-KEM-768 + X25519 (draft-ietf-tls-hybrid-design, group
/// 0x11EC): share is `ml_kem_public || x25519_public`, shared secret is
/// `ml_kem_shared || x25519_shared`. Both halves must succeed -- a
/// classical-only break or a PQ-only break each still leave the other half
/// protecting the session.
pub struct HybridX25519MlKem768 {
    x25519: X25519KeyExchange,
    kem: crate::crypto::kem::MlKem768Algorithm,
    kem_decap_key: Vec<u8>,
}

impl HybridX25519MlKem768 {
    pub fn generate() -> (HybridX25519MlKem768, Vec<u8>) {
        use crate::crypto::kem::KemAlgorithm;
        let kem = crate::crypto::kem::MlKem768Algorithm;
        let (ek, dk) = kem.generate();
        let x25519 = X25519KeyExchange::generate();
        let mut share = ek;
        share.extend_from_slice(&x25519.public);
        (
            HybridX25519MlKem768 {
                x25519,
                kem,
                kem_decap_key: dk,
            },
            share,
        )
    }

    /// Server-side: encapsulate against a client's hybrid share, returning
    /// (our own hybrid share to send back, combined shared secret).
    pub fn server_respond(client_share: &[u8]) -> Result<(Vec<u8>, Vec<u8>), TlsError> {
        use crate::crypto::kem::KemAlgorithm;
        const ML_KEM_768_EK_LEN: usize = 1184;
        if client_share.len() != ML_KEM_768_EK_LEN + 32 {
            return Err(TlsError::Decode("hybrid key share has unexpected length".into()));
        }
        let (ek, x25519_peer_public) = client_share.split_at(ML_KEM_768_EK_LEN);
        let kem = crate::crypto::kem::MlKem768Algorithm;
        let (ct, kem_ss) = kem.encapsulate(ek)?;
        let x25519 = X25519KeyExchange::generate();
        let x25519_public = x25519.public;
        let x25519_ss = x25519.shared_secret(x25519_peer_public)?;

        let mut response_share = ct;
        response_share.extend_from_slice(&x25519_public);
        let mut combined = kem_ss;
        combined.extend_from_slice(&x25519_ss);
        Ok((response_share, combined))
    }

    /// Client-side: decapsulate the server's response share against our
    /// own retained decapsulation key and X25519 secret.
    pub fn client_finish(self, server_share: &[u8]) -> Result<Vec<u8>, TlsError> {
        const ML_KEM_768_CT_LEN: usize = 1088;
        if server_share.len() != ML_KEM_768_CT_LEN + 32 {
            return Err(TlsError::Decode("hybrid key share has unexpected length".into()));
        }
        let (ct, x25519_peer_public) = server_share.split_at(ML_KEM_768_CT_LEN);
        let kem_ss = self.kem.decapsulate(&self.kem_decap_key, ct)?;
        let x25519_ss = self.x25519.shared_secret(x25519_peer_public)?;
        let mut combined = kem_ss;
        combined.extend_from_slice(&x25519_ss);
        Ok(combined)
    }
}

/// One ephemeral keypair for the TLS ≤1.2 ECDHE handshake (RFC 8422),
/// dispatching to whichever curve adapter above was negotiated. ClientHello
/// offers a curve list; the peer picks one and this wraps the resulting
/// keypair so the handshake code doesn't need a match on `NamedGroup` at
/// every call site.
pub enum EcdheKeyExchange {
    X25519(X25519KeyExchange),
    P256(P256KeyExchange),
    P384(P384KeyExchange),
}

impl EcdheKeyExchange {
    pub fn generate(group: NamedGroup) -> Result<EcdheKeyExchange, TlsError> {
        match group {
            NamedGroup::X25519 => Ok(EcdheKeyExchange::X25519(X25519KeyExchange::generate())),
            NamedGroup::Secp256r1 => Ok(EcdheKeyExchange::P256(P256KeyExchange::generate())),
            NamedGroup::Secp384r1 => Ok(EcdheKeyExchange::P384(P384KeyExchange::generate())),
            other => Err(TlsError::Internal(format!("{other:?} has no legacy ECDHE key exchange adapter"))),
        }
    }

    pub fn public(&self) -> Vec<u8> {
        match self {
            EcdheKeyExchange::X25519(x) => x.public.to_vec(),
            EcdheKeyExchange::P256(p) => p.public.clone(),
            EcdheKeyExchange::P384(p) => p.public.clone(),
        }
    }

    pub fn shared_secret(self, peer_public: &[u8]) -> Result<Vec<u8>, TlsError> {
        match self {
            EcdheKeyExchange::X25519(x) => x.shared_secret(peer_public),
            EcdheKeyExchange::P256(p) => p.shared_secret(peer_public),
            EcdheKeyExchange::P384(p) => p.shared_secret(peer_public),
        }
    }
}

/// One TLS 1.3 `key_share` keypair, dispatching across every group this
/// engine negotiates in a ClientHello/ServerHello/HelloRetryRequest
/// exchange: the classical curves plus the ML-KEM-768/X25519 hybrid
/// (§4.8). Lets `handshake/client.rs` and `handshake/server.rs` offer and
/// consume more than one group without a `NamedGroup` match at every call
/// site.
pub enum Tls13KeyShare {
    X25519(X25519KeyExchange),
    P256(P256KeyExchange),
    P384(P384KeyExchange),
    HybridX25519MlKem768(HybridX25519MlKem768),
}

impl Tls13KeyShare {
    /// Generate a fresh keypair for `group`, returning the share bytes to
    /// put on the wire alongside the keypair itself (kept around to
    /// compute the shared secret once the peer's share arrives).
    pub fn generate(group: NamedGroup) -> Result<(Tls13KeyShare, Vec<u8>), TlsError> {
        match group {
            NamedGroup::X25519 => {
                let kex = X25519KeyExchange::generate();
                let public = kex.public.to_vec();
                Ok((Tls13KeyShare::X25519(kex), public))
            }
            NamedGroup::Secp256r1 => {
                let kex = P256KeyExchange::generate();
                let public = kex.public.clone();
                Ok((Tls13KeyShare::P256(kex), public))
            }
            NamedGroup::Secp384r1 => {
                let kex = P384KeyExchange::generate();
                let public = kex.public.clone();
                Ok((Tls13KeyShare::P384(kex), public))
            }
            NamedGroup::X25519MlKem768 => {
                let (kex, share) = HybridX25519MlKem768::generate();
                Ok((Tls13KeyShare::HybridX25519MlKem768(kex), share))
            }
            other => Err(TlsError::Internal(format!("{other:?} has no TLS 1.3 key_share adapter"))),
        }
    }

    /// Consume this keypair against the peer's share, producing the raw
    /// shared secret to hand to `Tls13Secrets::new`.
    pub fn shared_secret(self, peer_share: &[u8]) -> Result<Vec<u8>, TlsError> {
        match self {
            Tls13KeyShare::X25519(k) => k.shared_secret(peer_share),
            Tls13KeyShare::P256(k) => k.shared_secret(peer_share),
            Tls13KeyShare::P384(k) => k.shared_secret(peer_share),
            Tls13KeyShare::HybridX25519MlKem768(k) => k.client_finish(peer_share),
        }
    }

    /// Server-side response to a client's offered share for `group`:
    /// returns (our share bytes to send back, the combined shared
    /// secret) in one step, since the hybrid KEM doesn't keep a
    /// standalone keypair around the way the classical curves do.
    pub fn server_respond(group: NamedGroup, peer_share: &[u8]) -> Result<(Vec<u8>, Vec<u8>), TlsError> {
        match group {
            NamedGroup::X25519MlKem768 => HybridX25519MlKem768::server_respond(peer_share),
            _ => {
                let (kex, our_share) = Tls13KeyShare::generate(group)?;
                let shared = kex.shared_secret(peer_share)?;
                Ok((our_share, shared))
            }
        }
    }
}

/// The `ServerECDHParams` struct from RFC 8422 §5.4: curve_type is always
/// `named_curve` (3) for the groups this engine negotiates.
pub struct EcdheServerParams {
    pub named_group: NamedGroup,
    pub public: Vec<u8>,
}

impl EcdheServerParams {
    /// The bytes that get signed (prefixed by client_random||server_random)
    /// or, on the wire, written ahead of the signature.
    pub fn params_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.u8(3); // named_curve
        w.u16(self.named_group as u16);
        w.vec8(&self.public);
        w.into_bytes()
    }
}

/// Build the full ServerKeyExchange body: params, then (TLS 1.2+ only) the
/// two-byte `SignatureAndHashAlgorithm`, then the signature itself.
pub fn encode_server_key_exchange(
    params: &EcdheServerParams,
    version: ProtocolVersion,
    scheme: Option<SignatureScheme>,
    signature: &[u8],
) -> Vec<u8> {
    let mut w = Writer::new();
    w.bytes(&params.params_bytes());
    if version >= ProtocolVersion::TLS1_2 {
        w.u16(scheme.expect("TLS 1.2+ ServerKeyExchange requires a signature_algorithm") as u16);
    }
    w.vec16(signature);
    w.into_bytes()
}

pub struct DecodedServerKeyExchange {
    pub params: EcdheServerParams,
    /// The exact bytes of `ServerECDHParams` as they appeared on the wire --
    /// what the signature actually covers (re-encoding could disagree on
    /// canonical form for a malformed peer).
    pub params_bytes: Vec<u8>,
    pub scheme: Option<SignatureScheme>,
    pub signature: Vec<u8>,
}

pub fn decode_server_key_exchange(body: &[u8], version: ProtocolVersion) -> Result<DecodedServerKeyExchange, TlsError> {
    let mut r = Reader::new(body);
    let curve_type = r.u8()?;
    if curve_type != 3 {
        return Err(TlsError::IllegalParameter("only named_curve ECDHE groups are supported".into()));
    }
    let group_raw = r.u16()?;
    let named_group =
        NamedGroup::from_u16(group_raw).ok_or_else(|| TlsError::IllegalParameter(format!("unknown named group {group_raw:#06x}")))?;
    let public = r.vec8()?.to_vec();
    let params_len = 1 + 2 + 1 + public.len();
    if params_len > body.len() {
        return Err(TlsError::Decode("ServerKeyExchange params overrun the message body".into()));
    }
    let params_bytes = body[..params_len].to_vec();

    let scheme = if version >= ProtocolVersion::TLS1_2 {
        let raw = r.u16()?;
        Some(SignatureScheme::from_u16(raw).ok_or_else(|| TlsError::IllegalParameter(format!("unknown signature scheme {raw:#06x}")))?)
    } else {
        None
    };
    let signature = r.vec16()?.to_vec();

    Ok(DecodedServerKeyExchange {
        params: EcdheServerParams { named_group, public },
        params_bytes,
        scheme,
        signature,
    })
}

/// ClientKeyExchange for ECDHE (RFC 8422 §5.7) is just the client's public
/// point -- the curve was already fixed by the server's choice.
pub fn encode_client_key_exchange_ecdhe(public: &[u8]) -> Vec<u8> {
    let mut w = Writer::new();
    w.vec8(public);
    w.into_bytes()
}

pub fn decode_client_key_exchange_ecdhe(body: &[u8]) -> Result<Vec<u8>, TlsError> {
    let mut r = Reader::new(body);
    Ok(r.vec8()?.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn x25519_agrees_both_directions() {
        let a = X25519KeyExchange::generate();
        let b = X25519KeyExchange::generate();
        let a_public = a.public;
        let b_public = b.public;
        let ss_a = a.shared_secret(&b_public).unwrap();
        let ss_b = b.shared_secret(&a_public).unwrap();
        assert_eq!(ss_a, ss_b);
    }

    #[test]
    fn p256_agrees_both_directions() {
        let a = P256KeyExchange::generate();
        let b = P256KeyExchange::generate();
        let a_public = a.public.clone();
        let b_public = b.public.clone();
        let ss_a = a.shared_secret(&b_public).unwrap();
        let ss_b = b.shared_secret(&a_public).unwrap();
        assert_eq!(ss_a, ss_b);
    }

    #[test]
    fn group_negotiation_respects_client_preference() {
        let client = vec![NamedGroup::X25519, NamedGroup::Secp256r1];
        let server = vec![NamedGroup::Secp256r1, NamedGroup::X25519];
        assert_eq!(negotiate_group(&client, &server).unwrap(), NamedGroup::X25519);
    }

    #[test]
    fn no_overlap_is_internal_error() {
        let client = vec![NamedGroup::X25519];
        let server = vec![NamedGroup::Secp256r1];
        assert!(negotiate_group(&client, &server).is_err());
    }

    #[test]
    fn ffdhe_bit_length_policy_rejects_weak_groups() {
        assert!(validate_ffdhe_bit_length(1024, 2048, 8192).is_err());
        assert!(validate_ffdhe_bit_length(3072, 2048, 8192).is_ok());
    }

    #[test]
    fn server_key_exchange_roundtrips_with_signature_algorithm() {
        let params = EcdheServerParams {
            named_group: NamedGroup::X25519,
            public: vec![0x42; 32],
        };
        let body = encode_server_key_exchange(&params, ProtocolVersion::TLS1_2, Some(SignatureScheme::EcdsaSecp256r1Sha256), &[1, 2, 3, 4]);
        let decoded = decode_server_key_exchange(&body, ProtocolVersion::TLS1_2).unwrap();
        assert_eq!(decoded.params.named_group, NamedGroup::X25519);
        assert_eq!(decoded.params.public, vec![0x42; 32]);
        assert_eq!(decoded.scheme, Some(SignatureScheme::EcdsaSecp256r1Sha256));
        assert_eq!(decoded.signature, vec![1, 2, 3, 4]);
        assert_eq!(decoded.params_bytes, params.params_bytes());
    }

    #[test]
    fn server_key_exchange_pre_tls12_has_no_signature_algorithm_field() {
        let params = EcdheServerParams {
            named_group: NamedGroup::Secp256r1,
            public: vec![0x07; 65],
        };
        let body = encode_server_key_exchange(&params, ProtocolVersion::TLS1_1, None, &[9, 9]);
        let decoded = decode_server_key_exchange(&body, ProtocolVersion::TLS1_1).unwrap();
        assert_eq!(decoded.scheme, None);
        assert_eq!(decoded.signature, vec![9, 9]);
    }

    #[test]
    fn client_key_exchange_ecdhe_roundtrips() {
        let public = vec![0xAB; 32];
        let body = encode_client_key_exchange_ecdhe(&public);
        let decoded = decode_client_key_exchange_ecdhe(&body).unwrap();
        assert_eq!(decoded, public);
    }

    #[test]
    fn ffdhe_agrees_both_directions() {
        let a = DheKeyExchange::generate(NamedGroup::Ffdhe2048).unwrap();
        let b = DheKeyExchange::generate(NamedGroup::Ffdhe2048).unwrap();
        let a_public = a.public.clone();
        let b_public = b.public.clone();
        let ss_a = a.shared_secret(&b_public).unwrap();
        let ss_b = b.shared_secret(&a_public).unwrap();
        assert_eq!(ss_a, ss_b);
        assert_eq!(ss_a.len(), 2048 / 8);
    }

    #[test]
    fn ffdhe_rejects_out_of_range_peer_public() {
        let a = DheKeyExchange::generate(NamedGroup::Ffdhe2048).unwrap();
        assert!(a.shared_secret(&[0u8; 1]).is_err());
        let a = DheKeyExchange::generate(NamedGroup::Ffdhe2048).unwrap();
        let p = FfdheGroup::for_group(NamedGroup::Ffdhe2048).unwrap().prime();
        let p_minus_one = to_fixed_width(&(&p - BigUint::from(1u32)), 2048 / 8);
        assert!(a.shared_secret(&p_minus_one).is_err());
    }

    #[test]
    fn ffdhe_server_params_match_known_group_and_roundtrip() {
        let dhe = DheKeyExchange::generate(NamedGroup::Ffdhe2048).unwrap();
        let params = dhe.params();
        assert_eq!(params.matches_known_group(), Some(NamedGroup::Ffdhe2048));

        let scheme = SignatureScheme::RsaPkcs1Sha256;
        let body = {
            let mut w = Writer::new();
            w.bytes(&params.params_bytes());
            w.u16(scheme as u16);
            w.vec16(&[5, 5, 5]);
            w.into_bytes()
        };
        let (decoded_params, params_bytes, decoded_scheme, signature) = decode_server_key_exchange_dhe(&body).unwrap();
        assert_eq!(decoded_params.matches_known_group(), Some(NamedGroup::Ffdhe2048));
        assert_eq!(params_bytes, params.params_bytes());
        assert_eq!(decoded_scheme, Some(scheme));
        assert_eq!(signature, vec![5, 5, 5]);
    }

    #[test]
    fn client_key_exchange_dhe_roundtrips() {
        let public = vec![0x11; 256];
        let body = encode_client_key_exchange_dhe(&public);
        let decoded = decode_client_key_exchange_dhe(&body).unwrap();
        assert_eq!(decoded, public);
    }

    #[test]
    fn rsa_pre_master_secret_roundtrips_through_encrypt_decrypt() {
        use rsa::pkcs1::EncodeRsaPublicKey;
        let server_key = rsa::RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let server_pubkey_der = server_key.to_public_key().to_pkcs1_der().unwrap().into_vec();

        let pms = RsaPreMasterSecret::generate(ProtocolVersion::TLS1_2);
        let encrypted = pms.encrypt(&server_pubkey_der).unwrap();
        let decrypted = RsaPreMasterSecret::decrypt(&encrypted, &server_key, ProtocolVersion::TLS1_2);
        assert_eq!(decrypted.0, pms.0);
    }

    #[test]
    fn rsa_pre_master_secret_decrypt_falls_back_on_bad_ciphertext() {
        let server_key = rsa::RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let garbage = vec![0x42u8; 256];
        let fallback = RsaPreMasterSecret::decrypt(&garbage, &server_key, ProtocolVersion::TLS1_2);
        // Never surfaces the decryption failure: still a well-formed 48-byte
        // PMS with the expected client_version prefix.
        assert_eq!(fallback.0.len(), 48);
        assert_eq!(&fallback.0[0..2], &ProtocolVersion::TLS1_2.to_bytes());
    }

    #[test]
    fn client_key_exchange_rsa_roundtrips() {
        let encrypted = vec![0x99; 256];
        let body = encode_client_key_exchange_rsa(&encrypted);
        let decoded = decode_client_key_exchange_rsa(&body).unwrap();
        assert_eq!(decoded, encrypted);
    }
}
