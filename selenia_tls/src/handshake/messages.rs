//! HandshakeMessage types and their wire codec (§4.9, plus the
//! [SUPPLEMENT] `Alert` message from §1.6/§3). Each variant holds the
//! parsed fields a later stage actually reads; anything this engine only
//! forwards (certificate DER, extension bodies) stays as opaque bytes.

use crate::codec::{Reader, Writer};
use crate::error::TlsError;
use crate::extensions::ExtensionBlock;
use crate::protocol::{AlertDescription, AlertLevel, HandshakeType, ProtocolVersion};

#[derive(Clone, Debug)]
pub struct ClientHello {
    pub legacy_version: ProtocolVersion,
    pub random: [u8; 32],
    pub session_id: Vec<u8>,
    pub cipher_suites: Vec<u16>,
    pub compression_methods: Vec<u8>,
    pub extensions: ExtensionBlock,
}

#[derive(Clone, Debug)]
pub struct ServerHello {
    pub legacy_version: ProtocolVersion,
    pub random: [u8; 32],
    pub session_id: Vec<u8>,
    pub cipher_suite: u16,
    pub compression_method: u8,
    pub extensions: ExtensionBlock,
}

impl ServerHello {
    /// RFC 8446 §4.1.3: a HelloRetryRequest is wire-identical to a
    /// ServerHello except `random` is the fixed SHA-256 constant.
    pub const HRR_RANDOM: [u8; 32] = [
        0xCF, 0x21, 0xAD, 0x74, 0xE5, 0x9A, 0x61, 0x11, 0xBE, 0x1D, 0x8C, 0x02, 0x1E, 0x65, 0xB8,
        0x91, 0xC2, 0xA2, 0x11, 0x16, 0x7A, 0xBB, 0x8C, 0x5E, 0x07, 0x9E, 0x09, 0xE2, 0xC8, 0xA8,
        0x33, 0x9C,
    ];

    pub fn is_hello_retry_request(&self) -> bool {
        self.random == Self::HRR_RANDOM
    }
}

#[derive(Clone, Debug)]
pub struct CertificateEntry {
    pub cert_data: Vec<u8>,
    pub extensions: ExtensionBlock,
}

#[derive(Clone, Debug)]
pub struct Certificate {
    /// Empty except in post-handshake/mTLS certificate messages (RFC 8446
    /// §4.4.2); always empty for the server's initial Certificate.
    pub certificate_request_context: Vec<u8>,
    pub entries: Vec<CertificateEntry>,
}

#[derive(Clone, Debug)]
pub struct CertificateVerify {
    pub scheme: u16,
    pub signature: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct Finished {
    pub verify_data: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct NewSessionTicket {
    pub ticket_lifetime: u32,
    pub ticket_age_add: u32,
    pub ticket_nonce: Vec<u8>,
    pub ticket: Vec<u8>,
    pub extensions: ExtensionBlock,
}

#[derive(Clone, Copy, Debug)]
pub struct KeyUpdate {
    pub update_requested: bool,
}

/// Legacy (TLS ≤1.2) messages this engine still speaks.
#[derive(Clone, Debug)]
pub struct ServerKeyExchange {
    pub body: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct ClientKeyExchange {
    pub body: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct CertificateRequest {
    pub body: Vec<u8>,
}

#[derive(Clone, Debug)]
pub enum HandshakeMessage {
    HelloRequest,
    ClientHello(ClientHello),
    ServerHello(ServerHello),
    Certificate(Certificate),
    ServerKeyExchange(ServerKeyExchange),
    CertificateRequest(CertificateRequest),
    ServerHelloDone,
    CertificateVerify(CertificateVerify),
    ClientKeyExchange(ClientKeyExchange),
    Finished(Finished),
    NewSessionTicket(NewSessionTicket),
    EndOfEarlyData,
    EncryptedExtensions(ExtensionBlock),
    KeyUpdate(KeyUpdate),
}

impl HandshakeMessage {
    pub fn message_type(&self) -> HandshakeType {
        use HandshakeMessage::*;
        match self {
            HelloRequest => HandshakeType::HelloRequest,
            ClientHello(_) => HandshakeType::ClientHello,
            ServerHello(_) => HandshakeType::ServerHello,
            Certificate(_) => HandshakeType::Certificate,
            ServerKeyExchange(_) => HandshakeType::ServerKeyExchange,
            CertificateRequest(_) => HandshakeType::CertificateRequest,
            ServerHelloDone => HandshakeType::ServerHelloDone,
            CertificateVerify(_) => HandshakeType::CertificateVerify,
            ClientKeyExchange(_) => HandshakeType::ClientKeyExchange,
            Finished(_) => HandshakeType::Finished,
            NewSessionTicket(_) => HandshakeType::NewSessionTicket,
            EndOfEarlyData => HandshakeType::EndOfEarlyData,
            EncryptedExtensions(_) => HandshakeType::EncryptedExtensions,
            KeyUpdate(_) => HandshakeType::KeyUpdate,
        }
    }

    /// Serialize with the 4-byte handshake header (type + u24 length).
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.u8(self.message_type() as u8);
        w.length_prefixed24(|w| self.encode_body(w));
        w.into_bytes()
    }

    fn encode_body(&self, w: &mut Writer) {
        use HandshakeMessage::*;
        match self {
            HelloRequest | ServerHelloDone | EndOfEarlyData => {}
            ClientHello(ch) => {
                w.u16(u16::from_be_bytes(ch.legacy_version.to_bytes()));
                w.bytes(&ch.random);
                w.vec8(&ch.session_id);
                w.length_prefixed16(|w| {
                    for suite in &ch.cipher_suites {
                        w.u16(*suite);
                    }
                });
                w.vec8(&ch.compression_methods);
                ch.extensions.encode(w);
            }
            ServerHello(sh) => {
                w.u16(u16::from_be_bytes(sh.legacy_version.to_bytes()));
                w.bytes(&sh.random);
                w.vec8(&sh.session_id);
                w.u16(sh.cipher_suite);
                w.u8(sh.compression_method);
                sh.extensions.encode(w);
            }
            Certificate(cert) => {
                w.vec8(&cert.certificate_request_context);
                w.length_prefixed24(|w| {
                    for entry in &cert.entries {
                        w.vec24(&entry.cert_data);
                        entry.extensions.encode(w);
                    }
                });
            }
            ServerKeyExchange(ske) => w.bytes(&ske.body),
            CertificateRequest(cr) => w.bytes(&cr.body),
            CertificateVerify(cv) => {
                w.u16(cv.scheme);
                w.vec16(&cv.signature);
            }
            ClientKeyExchange(cke) => w.bytes(&cke.body),
            Finished(f) => w.bytes(&f.verify_data),
            NewSessionTicket(nst) => {
                w.u32(nst.ticket_lifetime);
                w.u32(nst.ticket_age_add);
                w.vec8(&nst.ticket_nonce);
                w.vec16(&nst.ticket);
                nst.extensions.encode(w);
            }
            EncryptedExtensions(ext) => ext.encode(w),
            KeyUpdate(ku) => w.u8(if ku.update_requested { 1 } else { 0 }),
        }
    }

    /// Parse a complete handshake message (header included, as handed back
    /// by `Defragmenter::next`).
    pub fn decode(bytes: &[u8]) -> Result<HandshakeMessage, TlsError> {
        let mut r = Reader::new(bytes);
        let type_byte = r.u8()?;
        let msg_type = HandshakeType::from_u8(type_byte)
            .ok_or_else(|| TlsError::Decode(format!("unknown handshake type {type_byte}")))?;
        let mut body = r.sub_reader(r.u24()? as usize)?;

        Ok(match msg_type {
            HandshakeType::HelloRequest => HandshakeMessage::HelloRequest,
            HandshakeType::ClientHello => HandshakeMessage::ClientHello(decode_client_hello(&mut body)?),
            HandshakeType::ServerHello => HandshakeMessage::ServerHello(decode_server_hello(&mut body)?),
            HandshakeType::Certificate => HandshakeMessage::Certificate(decode_certificate(&mut body)?),
            HandshakeType::ServerKeyExchange => HandshakeMessage::ServerKeyExchange(ServerKeyExchange {
                body: body.rest().to_vec(),
            }),
            HandshakeType::CertificateRequest => HandshakeMessage::CertificateRequest(CertificateRequest {
                body: body.rest().to_vec(),
            }),
            HandshakeType::ServerHelloDone => HandshakeMessage::ServerHelloDone,
            HandshakeType::CertificateVerify => HandshakeMessage::CertificateVerify(CertificateVerify {
                scheme: body.u16()?,
                signature: body.vec16()?.to_vec(),
            }),
            HandshakeType::ClientKeyExchange => HandshakeMessage::ClientKeyExchange(ClientKeyExchange {
                body: body.rest().to_vec(),
            }),
            HandshakeType::Finished => HandshakeMessage::Finished(Finished {
                verify_data: body.rest().to_vec(),
            }),
            HandshakeType::NewSessionTicket => HandshakeMessage::NewSessionTicket(NewSessionTicket {
                ticket_lifetime: body.u32()?,
                ticket_age_add: body.u32()?,
                ticket_nonce: body.vec8()?.to_vec(),
                ticket: body.vec16()?.to_vec(),
                extensions: ExtensionBlock::parse(&mut body)?,
            }),
            HandshakeType::EndOfEarlyData => HandshakeMessage::EndOfEarlyData,
            HandshakeType::EncryptedExtensions => {
                HandshakeMessage::EncryptedExtensions(ExtensionBlock::parse(&mut body)?)
            }
            HandshakeType::KeyUpdate => HandshakeMessage::KeyUpdate(KeyUpdate {
                update_requested: body.u8()? == 1,
            }),
        })
    }
}

fn decode_client_hello(body: &mut Reader) -> Result<ClientHello, TlsError> {
    let legacy_version = ProtocolVersion::from_bytes(body.u16()?.to_be_bytes());
    let random: [u8; 32] = body
        .bytes(32)?
        .try_into()
        .map_err(|_| TlsError::Decode("client random must be 32 bytes".into()))?;
    let session_id = body.vec8()?.to_vec();
    let mut suites_reader = Reader::new(body.vec16()?);
    let mut cipher_suites = Vec::new();
    while !suites_reader.is_empty() {
        cipher_suites.push(suites_reader.u16()?);
    }
    let compression_methods = body.vec8()?.to_vec();
    let extensions = ExtensionBlock::parse(body)?;
    Ok(ClientHello {
        legacy_version,
        random,
        session_id,
        cipher_suites,
        compression_methods,
        extensions,
    })
}

fn decode_server_hello(body: &mut Reader) -> Result<ServerHello, TlsError> {
    let legacy_version = ProtocolVersion::from_bytes(body.u16()?.to_be_bytes());
    let random: [u8; 32] = body
        .bytes(32)?
        .try_into()
        .map_err(|_| TlsError::Decode("server random must be 32 bytes".into()))?;
    let session_id = body.vec8()?.to_vec();
    let cipher_suite = body.u16()?;
    let compression_method = body.u8()?;
    let extensions = ExtensionBlock::parse(body)?;
    Ok(ServerHello {
        legacy_version,
        random,
        session_id,
        cipher_suite,
        compression_method,
        extensions,
    })
}

fn decode_certificate(body: &mut Reader) -> Result<Certificate, TlsError> {
    let certificate_request_context = body.vec8()?.to_vec();
    let mut list = Reader::new(body.vec24()?);
    let mut entries = Vec::new();
    while !list.is_empty() {
        let cert_data = list.vec24()?.to_vec();
        let extensions = ExtensionBlock::parse(&mut list)?;
        entries.push(CertificateEntry { cert_data, extensions });
    }
    Ok(Certificate {
        certificate_request_context,
        entries,
    })
}

/// The [SUPPLEMENT] `Alert` wire message (§1.6): two bytes, level then
/// description.
#[derive(Clone, Copy, Debug)]
pub struct Alert {
    pub level: AlertLevel,
    pub description: AlertDescription,
}

impl Alert {
    pub fn encode(&self) -> [u8; 2] {
        [self.level as u8, self.description as u8]
    }

    pub fn decode(bytes: &[u8]) -> Result<Alert, TlsError> {
        if bytes.len() != 2 {
            return Err(TlsError::Decode("alert must be exactly 2 bytes".into()));
        }
        let level = AlertLevel::from_u8(bytes[0])
            .ok_or_else(|| TlsError::Decode(format!("unknown alert level {}", bytes[0])))?;
        let description = AlertDescription::from_u8(bytes[1])
            .ok_or_else(|| TlsError::Decode(format!("unknown alert description {}", bytes[1])))?;
        Ok(Alert { level, description })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::HandshakeType;

    #[test]
    fn client_hello_roundtrip() {
        let ch = ClientHello {
            legacy_version: ProtocolVersion::TLS1_2,
            random: [7u8; 32],
            session_id: vec![1, 2, 3],
            cipher_suites: vec![0x1301, 0x1302],
            compression_methods: vec![0],
            extensions: ExtensionBlock::new(),
        };
        let encoded = HandshakeMessage::ClientHello(ch.clone()).encode();
        assert_eq!(encoded[0], HandshakeType::ClientHello as u8);
        let decoded = HandshakeMessage::decode(&encoded).unwrap();
        match decoded {
            HandshakeMessage::ClientHello(back) => {
                assert_eq!(back.random, ch.random);
                assert_eq!(back.cipher_suites, ch.cipher_suites);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn hello_retry_request_detection() {
        let sh = ServerHello {
            legacy_version: ProtocolVersion::TLS1_2,
            random: ServerHello::HRR_RANDOM,
            session_id: Vec::new(),
            cipher_suite: 0x1301,
            compression_method: 0,
            extensions: ExtensionBlock::new(),
        };
        assert!(sh.is_hello_retry_request());
    }

    #[test]
    fn alert_roundtrip() {
        let alert = Alert {
            level: AlertLevel::Fatal,
            description: AlertDescription::HandshakeFailure,
        };
        let bytes = alert.encode();
        let back = Alert::decode(&bytes).unwrap();
        assert_eq!(back.description as u8, AlertDescription::HandshakeFailure as u8);
    }

    #[test]
    fn alert_wrong_length_is_decode_error() {
        assert!(Alert::decode(&[1]).is_err());
    }
}
