//! Wire-level enums shared across every layer: protocol versions, content
//! types, alert codes, handshake message tags, and the cipher-suite /
//! named-group / signature-scheme registries that negotiation consults.
//!
//! §3 "Data Model" of the design.

use std::cmp::Ordering;
use std::fmt;

/// (major, minor) version pair, ordered lexicographically as the spec
/// requires. `SSL3` is recognized only so that a peer offering it can be
/// rejected with `protocol_version` rather than `decode_error`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolVersion(pub u8, pub u8);

impl ProtocolVersion {
    pub const SSL3: ProtocolVersion = ProtocolVersion(3, 0);
    pub const TLS1_0: ProtocolVersion = ProtocolVersion(3, 1);
    pub const TLS1_1: ProtocolVersion = ProtocolVersion(3, 2);
    pub const TLS1_2: ProtocolVersion = ProtocolVersion(3, 3);
    pub const TLS1_3: ProtocolVersion = ProtocolVersion(3, 4);

    pub fn is_tls13(self) -> bool {
        self == Self::TLS1_3
    }

    pub fn to_bytes(self) -> [u8; 2] {
        [self.0, self.1]
    }

    pub fn from_bytes(b: [u8; 2]) -> ProtocolVersion {
        ProtocolVersion(b[0], b[1])
    }
}

impl PartialOrd for ProtocolVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ProtocolVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.0, self.1).cmp(&(other.0, other.1))
    }
}

impl fmt::Debug for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Self::SSL3 => "SSL3.0",
            Self::TLS1_0 => "TLS1.0",
            Self::TLS1_1 => "TLS1.1",
            Self::TLS1_2 => "TLS1.2",
            Self::TLS1_3 => "TLS1.3",
            _ => "unknown",
        };
        write!(f, "{}({}.{})", name, self.0, self.1)
    }
}

/// TLS record content type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ContentType {
    ChangeCipherSpec = 20,
    Alert = 21,
    Handshake = 22,
    ApplicationData = 23,
    Heartbeat = 24,
}

impl ContentType {
    pub fn from_u8(b: u8) -> Option<ContentType> {
        Some(match b {
            20 => ContentType::ChangeCipherSpec,
            21 => ContentType::Alert,
            22 => ContentType::Handshake,
            23 => ContentType::ApplicationData,
            24 => ContentType::Heartbeat,
            _ => return None,
        })
    }
}

/// Alert level (§7).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum AlertLevel {
    Warning = 1,
    Fatal = 2,
}

impl AlertLevel {
    pub fn from_u8(b: u8) -> Option<AlertLevel> {
        Some(match b {
            1 => AlertLevel::Warning,
            2 => AlertLevel::Fatal,
            _ => return None,
        })
    }
}

/// Alert description codes actually used by this engine. Not exhaustive of
/// the IANA registry -- only the ones §7 names plus the handful RFC 8446
/// requires for TLS 1.3 conformance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum AlertDescription {
    CloseNotify = 0,
    UnexpectedMessage = 10,
    BadRecordMac = 20,
    DecryptionFailed = 21,
    RecordOverflow = 22,
    HandshakeFailure = 40,
    BadCertificate = 42,
    UnsupportedCertificate = 43,
    CertificateExpired = 45,
    CertificateUnknown = 46,
    IllegalParameter = 47,
    UnknownCa = 48,
    AccessDenied = 49,
    DecodeError = 50,
    DecryptError = 51,
    ProtocolVersion = 70,
    InsufficientSecurity = 71,
    InternalError = 80,
    InappropriateFallback = 86,
    UserCanceled = 90,
    NoRenegotiation = 100,
    MissingExtension = 109,
    UnsupportedExtension = 110,
    UnrecognizedName = 112,
    NoApplicationProtocol = 120,
}

impl AlertDescription {
    pub fn from_u8(b: u8) -> Option<AlertDescription> {
        use AlertDescription::*;
        Some(match b {
            0 => CloseNotify,
            10 => UnexpectedMessage,
            20 => BadRecordMac,
            21 => DecryptionFailed,
            22 => RecordOverflow,
            40 => HandshakeFailure,
            42 => BadCertificate,
            43 => UnsupportedCertificate,
            45 => CertificateExpired,
            46 => CertificateUnknown,
            47 => IllegalParameter,
            48 => UnknownCa,
            49 => AccessDenied,
            50 => DecodeError,
            51 => DecryptError,
            70 => ProtocolVersion,
            71 => InsufficientSecurity,
            80 => InternalError,
            86 => InappropriateFallback,
            90 => UserCanceled,
            100 => NoRenegotiation,
            109 => MissingExtension,
            110 => UnsupportedExtension,
            112 => UnrecognizedName,
            120 => NoApplicationProtocol,
            _ => return None,
        })
    }
}

/// Handshake message type tag (4-byte header: type + 24-bit length).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum HandshakeType {
    HelloRequest = 0,
    ClientHello = 1,
    ServerHello = 2,
    NewSessionTicket = 4,
    EndOfEarlyData = 5,
    EncryptedExtensions = 8,
    Certificate = 11,
    ServerKeyExchange = 12,
    CertificateRequest = 13,
    ServerHelloDone = 14,
    CertificateVerify = 15,
    ClientKeyExchange = 16,
    Finished = 20,
    KeyUpdate = 24,
}

impl HandshakeType {
    pub fn from_u8(b: u8) -> Option<HandshakeType> {
        use HandshakeType::*;
        Some(match b {
            0 => HelloRequest,
            1 => ClientHello,
            2 => ServerHello,
            4 => NewSessionTicket,
            5 => EndOfEarlyData,
            8 => EncryptedExtensions,
            11 => Certificate,
            12 => ServerKeyExchange,
            13 => CertificateRequest,
            14 => ServerHelloDone,
            15 => CertificateVerify,
            16 => ClientKeyExchange,
            20 => Finished,
            24 => KeyUpdate,
            _ => return None,
        })
    }
}

/// Hash algorithm used by a cipher suite's PRF / HKDF. `None` is used by the
/// legacy dual MD5+SHA1 PRF, which isn't a single hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashAlgorithm {
    LegacyMd5Sha1,
    Sha256,
    Sha384,
}

impl HashAlgorithm {
    pub fn output_len(self) -> usize {
        match self {
            HashAlgorithm::LegacyMd5Sha1 => 36, // 16 (MD5) + 20 (SHA1), TLS1.0/1.1 verify_data seed
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
        }
    }
}

/// AEAD (or legacy CBC/stream) algorithm negotiated by a cipher suite.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BulkAlgorithm {
    Null,
    Aes128CbcSha,
    Aes128CbcSha256,
    Aes256CbcSha,
    Aes256CbcSha384,
    Aes128Gcm,
    Aes256Gcm,
    Chacha20Poly1305,
}

impl BulkAlgorithm {
    pub fn is_aead(self) -> bool {
        matches!(
            self,
            BulkAlgorithm::Aes128Gcm | BulkAlgorithm::Aes256Gcm | BulkAlgorithm::Chacha20Poly1305
        )
    }
}

/// Key-exchange kind implied by a cipher suite (TLS ≤1.2) or always
/// (EC)DHE for TLS 1.3, which has no static-RSA/PSK-only suites in this
/// registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyExchangeKind {
    Rsa,
    Dhe,
    Ecdhe,
    Srp,
    Tls13, // key exchange negotiated out-of-band via `key_share`/`psk`.
}

/// A negotiable cipher suite: the (id, key exchange, bulk cipher, PRF hash)
/// tuple that `HandshakeFSM` picks between during negotiation (§4.9) and
/// that `KeySchedule`/`RecordLayer` consult afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CipherSuite {
    pub id: u16,
    pub kx: KeyExchangeKind,
    pub bulk: BulkAlgorithm,
    pub hash: HashAlgorithm,
}

macro_rules! suite {
    ($name:ident, $id:expr, $kx:expr, $bulk:expr, $hash:expr) => {
        pub const $name: CipherSuite = CipherSuite {
            id: $id,
            kx: $kx,
            bulk: $bulk,
            hash: $hash,
        };
    };
}

impl CipherSuite {
    suite!(
        TLS_RSA_WITH_AES_128_CBC_SHA,
        0x002F,
        KeyExchangeKind::Rsa,
        BulkAlgorithm::Aes128CbcSha,
        HashAlgorithm::LegacyMd5Sha1
    );
    suite!(
        TLS_RSA_WITH_AES_128_CBC_SHA256,
        0x003C,
        KeyExchangeKind::Rsa,
        BulkAlgorithm::Aes128CbcSha256,
        HashAlgorithm::Sha256
    );
    suite!(
        TLS_DHE_RSA_WITH_AES_128_GCM_SHA256,
        0x009E,
        KeyExchangeKind::Dhe,
        BulkAlgorithm::Aes128Gcm,
        HashAlgorithm::Sha256
    );
    suite!(
        TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
        0xC02F,
        KeyExchangeKind::Ecdhe,
        BulkAlgorithm::Aes128Gcm,
        HashAlgorithm::Sha256
    );
    suite!(
        TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
        0xC02C,
        KeyExchangeKind::Ecdhe,
        BulkAlgorithm::Aes256Gcm,
        HashAlgorithm::Sha384
    );
    suite!(
        TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
        0xCCA8,
        KeyExchangeKind::Ecdhe,
        BulkAlgorithm::Chacha20Poly1305,
        HashAlgorithm::Sha256
    );
    suite!(
        TLS_AES_128_GCM_SHA256,
        0x1301,
        KeyExchangeKind::Tls13,
        BulkAlgorithm::Aes128Gcm,
        HashAlgorithm::Sha256
    );
    suite!(
        TLS_AES_256_GCM_SHA384,
        0x1302,
        KeyExchangeKind::Tls13,
        BulkAlgorithm::Aes256Gcm,
        HashAlgorithm::Sha384
    );
    suite!(
        TLS_CHACHA20_POLY1305_SHA256,
        0x1303,
        KeyExchangeKind::Tls13,
        BulkAlgorithm::Chacha20Poly1305,
        HashAlgorithm::Sha256
    );

    /// Look a suite up by its IANA id among all suites this engine knows.
    pub fn by_id(id: u16) -> Option<CipherSuite> {
        ALL_SUITES.iter().copied().find(|s| s.id == id)
    }

    pub fn is_tls13(self) -> bool {
        matches!(self.kx, KeyExchangeKind::Tls13)
    }
}

/// Every suite this engine is able to negotiate, in no particular
/// preference order -- callers order their own `cipher_suites` list in
/// `Config`.
pub const ALL_SUITES: &[CipherSuite] = &[
    CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA,
    CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA256,
    CipherSuite::TLS_DHE_RSA_WITH_AES_128_GCM_SHA256,
    CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
    CipherSuite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
    CipherSuite::TLS_AES_128_GCM_SHA256,
    CipherSuite::TLS_AES_256_GCM_SHA384,
    CipherSuite::TLS_CHACHA20_POLY1305_SHA256,
];

/// RFC 7919 FFDHE / RFC 8422 ECC / draft-ietf-tls-hybrid-design named
/// groups. Values are the IANA `NamedGroup` codepoints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum NamedGroup {
    Secp256r1 = 0x0017,
    Secp384r1 = 0x0018,
    Secp521r1 = 0x0019,
    X25519 = 0x001D,
    X448 = 0x001E,
    Ffdhe2048 = 0x0100,
    Ffdhe3072 = 0x0101,
    Ffdhe4096 = 0x0102,
    Ffdhe6144 = 0x0103,
    Ffdhe8192 = 0x0104,
    X25519MlKem768 = 0x11EC,
}

impl NamedGroup {
    pub fn from_u16(v: u16) -> Option<NamedGroup> {
        use NamedGroup::*;
        Some(match v {
            0x0017 => Secp256r1,
            0x0018 => Secp384r1,
            0x0019 => Secp521r1,
            0x001D => X25519,
            0x001E => X448,
            0x0100 => Ffdhe2048,
            0x0101 => Ffdhe3072,
            0x0102 => Ffdhe4096,
            0x0103 => Ffdhe6144,
            0x0104 => Ffdhe8192,
            0x11EC => X25519MlKem768,
            _ => return None,
        })
    }

    pub fn is_ffdhe(self) -> bool {
        matches!(
            self,
            NamedGroup::Ffdhe2048
                | NamedGroup::Ffdhe3072
                | NamedGroup::Ffdhe4096
                | NamedGroup::Ffdhe6144
                | NamedGroup::Ffdhe8192
        )
    }

    pub fn is_hybrid(self) -> bool {
        matches!(self, NamedGroup::X25519MlKem768)
    }
}

/// RFC 8446 §4.2.3 `SignatureScheme` codepoints this engine can produce or
/// verify.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum SignatureScheme {
    RsaPkcs1Sha256 = 0x0401,
    EcdsaSecp256r1Sha256 = 0x0403,
    RsaPssRsaeSha256 = 0x0804,
    Ed25519 = 0x0807,
    EcdsaSecp384r1Sha384 = 0x0503,
}

impl SignatureScheme {
    pub fn from_u16(v: u16) -> Option<SignatureScheme> {
        use SignatureScheme::*;
        Some(match v {
            0x0401 => RsaPkcs1Sha256,
            0x0403 => EcdsaSecp256r1Sha256,
            0x0804 => RsaPssRsaeSha256,
            0x0807 => Ed25519,
            0x0503 => EcdsaSecp384r1Sha384,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_ordering_is_lexicographic() {
        assert!(ProtocolVersion::TLS1_0 < ProtocolVersion::TLS1_2);
        assert!(ProtocolVersion::TLS1_2 < ProtocolVersion::TLS1_3);
        assert!(ProtocolVersion::SSL3 < ProtocolVersion::TLS1_0);
    }

    #[test]
    fn suite_lookup_roundtrips_id() {
        let suite = CipherSuite::by_id(0x1301).unwrap();
        assert_eq!(suite, CipherSuite::TLS_AES_128_GCM_SHA256);
        assert!(suite.is_tls13());
    }

    #[test]
    fn rejects_unknown_suite_id() {
        assert!(CipherSuite::by_id(0xFFFF).is_none());
    }

    #[test]
    fn named_group_ffdhe_classification() {
        assert!(NamedGroup::Ffdhe3072.is_ffdhe());
        assert!(!NamedGroup::Secp256r1.is_ffdhe());
        assert!(NamedGroup::X25519MlKem768.is_hybrid());
    }
}
