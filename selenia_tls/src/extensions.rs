//! ExtensionBlock (§3, §4.9): a length-prefixed list of `(type, opaque
//! data)` pairs attached to ClientHello/ServerHello/EncryptedExtensions/
//! CertificateRequest/NewSessionTicket/Certificate-entry. Known extension
//! types get structured accessors; anything else passes through as opaque
//! bytes so a future extension doesn't require touching this module.

use crate::codec::{Reader, Writer};
use crate::error::TlsError;
use crate::protocol::{NamedGroup, SignatureScheme};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExtensionType {
    ServerName = 0,
    StatusRequest = 5,
    SupportedGroups = 10,
    EcPointFormats = 11,
    SignatureAlgorithms = 13,
    Alpn = 16,
    CompressCertificate = 27,
    ExtendedMasterSecret = 23,
    SessionTicket = 35,
    SupportedVersions = 43,
    KeyShare = 51,
    EncryptThenMac = 22,
    SignatureAlgorithmsCert = 50,
    Heartbeat = 15,
    Cookie = 44,
}

impl ExtensionType {
    pub fn from_u16(v: u16) -> Option<ExtensionType> {
        use ExtensionType::*;
        Some(match v {
            0 => ServerName,
            5 => StatusRequest,
            10 => SupportedGroups,
            11 => EcPointFormats,
            13 => SignatureAlgorithms,
            15 => Heartbeat,
            16 => Alpn,
            22 => EncryptThenMac,
            23 => ExtendedMasterSecret,
            27 => CompressCertificate,
            35 => SessionTicket,
            43 => SupportedVersions,
            44 => Cookie,
            50 => SignatureAlgorithmsCert,
            51 => KeyShare,
            _ => return None,
        })
    }
}

/// One extension entry: a wire type id (known or not) plus its opaque
/// body. Structured decoding happens lazily, only for the types a given
/// caller actually asks about.
#[derive(Clone, Debug)]
pub struct RawExtension {
    pub type_id: u16,
    pub data: Vec<u8>,
}

/// A parsed `<0..2^16-1>` list of extensions.
#[derive(Clone, Debug, Default)]
pub struct ExtensionBlock {
    pub entries: Vec<RawExtension>,
}

impl ExtensionBlock {
    pub fn new() -> ExtensionBlock {
        ExtensionBlock { entries: Vec::new() }
    }

    pub fn push(&mut self, type_id: u16, data: Vec<u8>) {
        self.entries.push(RawExtension { type_id, data });
    }

    pub fn get(&self, ty: ExtensionType) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|e| e.type_id == ty as u16)
            .map(|e| e.data.as_slice())
    }

    pub fn has(&self, ty: ExtensionType) -> bool {
        self.get(ty).is_some()
    }

    pub fn parse(r: &mut Reader) -> Result<ExtensionBlock, TlsError> {
        let mut body = Reader::new(r.vec16()?);
        let mut block = ExtensionBlock::new();
        while !body.is_empty() {
            let type_id = body.u16()?;
            let data = body.vec16()?.to_vec();
            block.push(type_id, data);
        }
        Ok(block)
    }

    pub fn encode(&self, w: &mut Writer) {
        w.length_prefixed16(|w| {
            for e in &self.entries {
                w.u16(e.type_id);
                w.vec16(&e.data);
            }
        });
    }

    /// `server_name` (RFC 6066): a single host_name entry, name type 0.
    pub fn server_name(&self) -> Result<Option<String>, TlsError> {
        let Some(data) = self.get(ExtensionType::ServerName) else {
            return Ok(None);
        };
        let mut r = Reader::new(data);
        let mut list = Reader::new(r.vec16()?);
        while !list.is_empty() {
            let name_type = list.u8()?;
            let name = list.vec16()?;
            if name_type == 0 {
                return Ok(Some(
                    String::from_utf8(name.to_vec())
                        .map_err(|_| TlsError::Decode("server_name is not valid UTF-8".into()))?,
                ));
            }
        }
        Ok(None)
    }

    pub fn encode_server_name(w: &mut Writer, host: &str) {
        w.u16(ExtensionType::ServerName as u16);
        w.length_prefixed16(|w| {
            w.length_prefixed16(|w| {
                w.u8(0);
                w.vec16(host.as_bytes());
            });
        });
    }

    /// `supported_groups` (RFC 8422 / RFC 7919): ordered list of named
    /// groups the sender supports.
    pub fn supported_groups(&self) -> Result<Vec<NamedGroup>, TlsError> {
        let Some(data) = self.get(ExtensionType::SupportedGroups) else {
            return Ok(Vec::new());
        };
        let mut r = Reader::new(data);
        let mut list = Reader::new(r.vec16()?);
        let mut out = Vec::new();
        while !list.is_empty() {
            let raw = list.u16()?;
            if let Some(group) = NamedGroup::from_u16(raw) {
                out.push(group);
            }
        }
        Ok(out)
    }

    pub fn encode_supported_groups(w: &mut Writer, groups: &[NamedGroup]) {
        w.u16(ExtensionType::SupportedGroups as u16);
        w.length_prefixed16(|w| {
            w.length_prefixed16(|w| {
                for g in groups {
                    w.u16(*g as u16);
                }
            });
        });
    }

    /// `alpn` (RFC 7301): ordered list of protocol name octet strings.
    pub fn alpn_protocols(&self) -> Result<Vec<Vec<u8>>, TlsError> {
        let Some(data) = self.get(ExtensionType::Alpn) else {
            return Ok(Vec::new());
        };
        let mut r = Reader::new(data);
        let mut list = Reader::new(r.vec16()?);
        let mut out = Vec::new();
        while !list.is_empty() {
            out.push(list.vec8()?.to_vec());
        }
        Ok(out)
    }

    pub fn encode_alpn(w: &mut Writer, protocols: &[&[u8]]) {
        w.u16(ExtensionType::Alpn as u16);
        w.length_prefixed16(|w| {
            w.length_prefixed16(|w| {
                for p in protocols {
                    w.vec8(p);
                }
            });
        });
    }

    /// `supported_versions` (RFC 8446 §4.2.1): ClientHello form is a list
    /// of (major, minor) pairs; ServerHello form is a single pair. This
    /// helper decodes the ClientHello (list) form.
    pub fn supported_versions_list(&self) -> Result<Vec<(u8, u8)>, TlsError> {
        let Some(data) = self.get(ExtensionType::SupportedVersions) else {
            return Ok(Vec::new());
        };
        let mut r = Reader::new(data);
        let mut list = Reader::new(r.vec8()?);
        let mut out = Vec::new();
        while !list.is_empty() {
            out.push((list.u8()?, list.u8()?));
        }
        Ok(out)
    }

    /// `ec_point_formats` (RFC 8422 §5.1): the legacy ≤TLS1.2 point-format
    /// list. This engine only ever offers/accepts `uncompressed` (0), but
    /// still parses the full list for completeness.
    pub fn ec_point_formats(&self) -> Result<Vec<u8>, TlsError> {
        let Some(data) = self.get(ExtensionType::EcPointFormats) else {
            return Ok(Vec::new());
        };
        let mut r = Reader::new(data);
        Ok(r.vec8()?.to_vec())
    }

    pub fn encode_ec_point_formats(w: &mut Writer, formats: &[u8]) {
        w.u16(ExtensionType::EcPointFormats as u16);
        w.length_prefixed16(|w| {
            w.vec8(formats);
        });
    }

    /// `signature_algorithms` (RFC 8446 §4.2.3, reused by TLS 1.2's
    /// ClientHello/CertificateRequest): ordered list of schemes the sender
    /// is willing to verify.
    pub fn signature_algorithms(&self) -> Result<Vec<SignatureScheme>, TlsError> {
        let Some(data) = self.get(ExtensionType::SignatureAlgorithms) else {
            return Ok(Vec::new());
        };
        let mut r = Reader::new(data);
        let mut list = Reader::new(r.vec16()?);
        let mut out = Vec::new();
        while !list.is_empty() {
            let raw = list.u16()?;
            if let Some(scheme) = SignatureScheme::from_u16(raw) {
                out.push(scheme);
            }
        }
        Ok(out)
    }

    pub fn encode_signature_algorithms(w: &mut Writer, schemes: &[SignatureScheme]) {
        w.u16(ExtensionType::SignatureAlgorithms as u16);
        w.length_prefixed16(|w| {
            w.length_prefixed16(|w| {
                for s in schemes {
                    w.u16(*s as u16);
                }
            });
        });
    }

    /// `extended_master_secret` (RFC 7627 §5.1) and `encrypt_then_mac` (RFC
    /// 7366 §3) are both presence-only extensions -- an empty body is the
    /// entire signal. `ExtensionBlock::has` already covers reading them;
    /// these two just write the empty entry.
    pub fn encode_extended_master_secret(w: &mut Writer) {
        w.u16(ExtensionType::ExtendedMasterSecret as u16);
        w.length_prefixed16(|_w| {});
    }

    pub fn encode_encrypt_then_mac(w: &mut Writer) {
        w.u16(ExtensionType::EncryptThenMac as u16);
        w.length_prefixed16(|_w| {});
    }

    /// `key_share` as it appears in a **ClientHello**: `KeyShareEntry
    /// client_shares<0..2^16-1>`, an outer length-prefixed list of
    /// (group, key_exchange) pairs (RFC 8446 §4.2.8).
    pub fn key_share_entries(&self) -> Result<Vec<(NamedGroup, Vec<u8>)>, TlsError> {
        let Some(data) = self.get(ExtensionType::KeyShare) else {
            return Ok(Vec::new());
        };
        let mut r = Reader::new(data);
        let mut list = Reader::new(r.vec16()?);
        let mut out = Vec::new();
        while !list.is_empty() {
            let raw_group = list.u16()?;
            let key_exchange = list.vec16()?.to_vec();
            if let Some(group) = NamedGroup::from_u16(raw_group) {
                out.push((group, key_exchange));
            }
        }
        Ok(out)
    }

    /// `key_share` as it appears in a **ServerHello**: a single
    /// `KeyShareEntry` with no outer list wrapper (RFC 8446 §4.2.8).
    pub fn key_share_selected(&self) -> Result<Option<(NamedGroup, Vec<u8>)>, TlsError> {
        let Some(data) = self.get(ExtensionType::KeyShare) else {
            return Ok(None);
        };
        let mut r = Reader::new(data);
        let raw_group = r.u16()?;
        let key_exchange = r.vec16()?.to_vec();
        Ok(NamedGroup::from_u16(raw_group).map(|group| (group, key_exchange)))
    }

    /// `key_share` as it appears in a **HelloRetryRequest**: just the
    /// `NamedGroup` the server wants the client to supply a share for
    /// next time, with no key material at all (RFC 8446 §4.1.4).
    pub fn key_share_hrr_group(&self) -> Result<Option<NamedGroup>, TlsError> {
        let Some(data) = self.get(ExtensionType::KeyShare) else {
            return Ok(None);
        };
        let mut r = Reader::new(data);
        let raw_group = r.u16()?;
        Ok(NamedGroup::from_u16(raw_group))
    }

    /// `cookie` (RFC 8446 §4.2.2): opaque bytes a HelloRetryRequest may
    /// attach for the client to echo back verbatim on the second
    /// ClientHello. This engine never inspects the contents, only relays
    /// them.
    pub fn cookie(&self) -> Option<&[u8]> {
        self.get(ExtensionType::Cookie)
    }

    pub fn encode_cookie(w: &mut Writer, cookie: &[u8]) {
        w.u16(ExtensionType::Cookie as u16);
        w.length_prefixed16(|w| {
            w.vec16(cookie);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_name_roundtrip() {
        let mut w = Writer::new();
        ExtensionBlock::encode_server_name(&mut w, "example.com");
        let mut block = ExtensionBlock::new();
        // wrap the single extension in the outer <0..2^16-1> ExtensionBlock
        // framing the way ClientHello parsing would hand it to us.
        let mut outer = Writer::new();
        outer.length_prefixed16(|outer| outer.bytes(w.as_slice()));
        let bytes = outer.into_bytes();
        let mut r = Reader::new(&bytes);
        block = ExtensionBlock::parse(&mut r).unwrap_or(block);
        assert_eq!(block.server_name().unwrap().as_deref(), Some("example.com"));
    }

    #[test]
    fn unknown_extension_is_preserved_opaquely() {
        let mut block = ExtensionBlock::new();
        block.push(0xFFFF, vec![1, 2, 3]);
        let mut w = Writer::new();
        block.encode(&mut w);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        let parsed = ExtensionBlock::parse(&mut r).unwrap();
        assert_eq!(parsed.entries[0].type_id, 0xFFFF);
        assert_eq!(parsed.entries[0].data, vec![1, 2, 3]);
    }

    #[test]
    fn supported_groups_roundtrip() {
        let mut w = Writer::new();
        ExtensionBlock::encode_supported_groups(&mut w, &[NamedGroup::X25519, NamedGroup::Secp256r1]);
        let mut outer = Writer::new();
        outer.length_prefixed16(|outer| outer.bytes(w.as_slice()));
        let bytes = outer.into_bytes();
        let mut r = Reader::new(&bytes);
        let block = ExtensionBlock::parse(&mut r).unwrap();
        let groups = block.supported_groups().unwrap();
        assert_eq!(groups, vec![NamedGroup::X25519, NamedGroup::Secp256r1]);
    }

    #[test]
    fn ec_point_formats_roundtrip() {
        let mut w = Writer::new();
        ExtensionBlock::encode_ec_point_formats(&mut w, &[0]);
        let mut outer = Writer::new();
        outer.length_prefixed16(|outer| outer.bytes(w.as_slice()));
        let bytes = outer.into_bytes();
        let mut r = Reader::new(&bytes);
        let block = ExtensionBlock::parse(&mut r).unwrap();
        assert_eq!(block.ec_point_formats().unwrap(), vec![0]);
    }

    #[test]
    fn signature_algorithms_roundtrip() {
        let mut w = Writer::new();
        ExtensionBlock::encode_signature_algorithms(&mut w, &[SignatureScheme::RsaPkcs1Sha256, SignatureScheme::EcdsaSecp256r1Sha256]);
        let mut outer = Writer::new();
        outer.length_prefixed16(|outer| outer.bytes(w.as_slice()));
        let bytes = outer.into_bytes();
        let mut r = Reader::new(&bytes);
        let block = ExtensionBlock::parse(&mut r).unwrap();
        assert_eq!(
            block.signature_algorithms().unwrap(),
            vec![SignatureScheme::RsaPkcs1Sha256, SignatureScheme::EcdsaSecp256r1Sha256]
        );
    }

    #[test]
    fn extended_master_secret_is_presence_only() {
        let mut w = Writer::new();
        ExtensionBlock::encode_extended_master_secret(&mut w);
        let mut outer = Writer::new();
        outer.length_prefixed16(|outer| outer.bytes(w.as_slice()));
        let bytes = outer.into_bytes();
        let mut r = Reader::new(&bytes);
        let block = ExtensionBlock::parse(&mut r).unwrap();
        assert!(block.has(ExtensionType::ExtendedMasterSecret));
        assert_eq!(block.get(ExtensionType::ExtendedMasterSecret), Some(&[][..]));
    }
}
