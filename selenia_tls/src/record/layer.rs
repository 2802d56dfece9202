//! RecordLayer: the core engine (§4.4). Owns the read/write `CipherState`
//! pair, fragments outbound application data, and is the single place key
//! changes happen.

use crate::error::TlsError;
use crate::protocol::{BulkAlgorithm, ContentType, ProtocolVersion};
use crate::record::cipher_state::{AeadRecipe, CipherState};
use crate::record::io::{RecordIO, MAX_RECORD_LEN};
use std::io::{Read, Write};

/// Key-block slice ordering per RFC 5246 §6.3: client MAC, server MAC,
/// client key, server key, client IV, server IV. AEAD suites have empty
/// MAC slices and the two IV slices hold the 4-byte fixed-IV portion.
pub struct KeyBlockLayout {
    pub client_mac: Vec<u8>,
    pub server_mac: Vec<u8>,
    pub client_key: Vec<u8>,
    pub server_key: Vec<u8>,
    pub client_iv: Vec<u8>,
    pub server_iv: Vec<u8>,
}

impl KeyBlockLayout {
    /// Slice a raw PRF/HKDF key block according to the suite's MAC key
    /// length, cipher key length, and IV length.
    pub fn partition(key_block: &[u8], mac_len: usize, key_len: usize, iv_len: usize) -> KeyBlockLayout {
        let mut pos = 0;
        let mut take = |n: usize| {
            let s = key_block[pos..pos + n].to_vec();
            pos += n;
            s
        };
        KeyBlockLayout {
            client_mac: take(mac_len),
            server_mac: take(mac_len),
            client_key: take(key_len),
            server_key: take(key_len),
            client_iv: take(iv_len),
            server_iv: take(iv_len),
        }
    }
}

pub struct RecordLayer<T: Read + Write> {
    io: RecordIO<T>,
    pub write_state: CipherState,
    pub read_state: CipherState,
    pending_write: Option<CipherState>,
    pending_read: Option<CipherState>,
    record_size_limit: usize,
    negotiated_version: ProtocolVersion,
}

impl<T: Read + Write> RecordLayer<T> {
    pub fn new(transport: T, version: ProtocolVersion, record_size_limit: usize) -> RecordLayer<T> {
        RecordLayer {
            io: RecordIO::new(transport),
            write_state: CipherState::null(version),
            read_state: CipherState::null(version),
            pending_write: None,
            pending_read: None,
            record_size_limit: record_size_limit.min(MAX_RECORD_LEN),
            negotiated_version: version,
        }
    }

    pub fn into_transport(self) -> T {
        self.io.into_inner()
    }

    /// Stage a pending cipher state for a direction, built from freshly
    /// derived key material. Does not take effect until
    /// `change_write_state`/`change_read_state` is called.
    pub fn stage_write(&mut self, state: CipherState) {
        self.pending_write = Some(state);
    }

    pub fn stage_read(&mut self, state: CipherState) {
        self.pending_read = Some(state);
    }

    /// Atomically swap the pending write state into place and reset the
    /// sequence number (the new `CipherState` already starts at zero).
    pub fn change_write_state(&mut self) -> Result<(), TlsError> {
        self.write_state = self
            .pending_write
            .take()
            .ok_or_else(|| TlsError::Internal("no pending write state to activate".into()))?;
        Ok(())
    }

    pub fn change_read_state(&mut self) -> Result<(), TlsError> {
        self.read_state = self
            .pending_read
            .take()
            .ok_or_else(|| TlsError::Internal("no pending read state to activate".into()))?;
        Ok(())
    }

    /// Split `bytes` into ≤ record_size_limit fragments and emit each as an
    /// encrypted record.
    pub fn write(&mut self, content_type: ContentType, bytes: &[u8]) -> Result<(), TlsError> {
        if bytes.is_empty() {
            self.write_fragment(content_type, &[])?;
            return Ok(());
        }
        for chunk in bytes.chunks(self.record_size_limit) {
            self.write_fragment(content_type, chunk)?;
        }
        Ok(())
    }

    fn write_fragment(&mut self, content_type: ContentType, fragment: &[u8]) -> Result<(), TlsError> {
        let record_version = if self.negotiated_version.is_tls13() {
            ProtocolVersion::TLS1_2
        } else {
            self.negotiated_version
        };
        let body = self.write_state.encrypt(content_type, record_version, fragment)?;
        let wire_type = if self.negotiated_version.is_tls13() && self.write_state.is_aead && !self.write_state.key.is_empty() {
            ContentType::ApplicationData
        } else {
            content_type
        };
        self.io.write_record(wire_type, record_version, &body)?;
        self.io.flush()
    }

    /// Read one record and decrypt it under the current read state. In
    /// TLS 1.3, a content type other than ApplicationData post-handshake
    /// on the wire is expected (it's how encrypted records are disguised);
    /// the *decrypted* effective type is what callers should switch on.
    pub fn read_record(&mut self) -> Result<(ContentType, Vec<u8>), TlsError> {
        let (header, body) = self.io.read_record()?;
        let (plaintext, effective_type) = self
            .read_state
            .decrypt(header.content_type, header.version, &body)?;
        Ok((effective_type, plaintext))
    }

    /// RFC 8446 §4.6.3 KeyUpdate derivation: traffic secret' =
    /// HKDF-Expand-Label(traffic secret, "traffic upd", "", hash_len).
    /// Actual secret derivation lives in `key_schedule`; this just swaps
    /// the freshly built state into place for the requested direction.
    pub fn rekey_write(&mut self, new_state: CipherState) {
        self.write_state = new_state;
    }

    pub fn rekey_read(&mut self, new_state: CipherState) {
        self.read_state = new_state;
    }
}

/// TLS 1.2 AEAD nonce recipe for a given bulk algorithm: ChaCha20-Poly1305
/// uses the XOR construction (RFC 7905); GCM/CCM use the explicit-nonce
/// construction (RFC 5246 §6.2.3.3).
pub fn recipe_for(bulk: BulkAlgorithm, version: ProtocolVersion) -> AeadRecipe {
    if version.is_tls13() {
        return AeadRecipe::XorNonce;
    }
    match bulk {
        BulkAlgorithm::Chacha20Poly1305 => AeadRecipe::XorNonce,
        _ => AeadRecipe::ExplicitNonceTls12,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    #[test]
    fn key_block_layout_partitions_in_rfc5246_order() {
        let key_block: Vec<u8> = (0u8..100).collect();
        let layout = KeyBlockLayout::partition(&key_block, 20, 16, 4);
        assert_eq!(layout.client_mac, key_block[0..20]);
        assert_eq!(layout.server_mac, key_block[20..40]);
        assert_eq!(layout.client_key, key_block[40..56]);
        assert_eq!(layout.server_key, key_block[56..72]);
        assert_eq!(layout.client_iv, key_block[72..76]);
        assert_eq!(layout.server_iv, key_block[76..80]);
    }

    #[test]
    fn change_write_state_without_pending_is_internal_error() {
        let mut rl = RecordLayer::new(Pipe::default(), ProtocolVersion::TLS1_2, MAX_RECORD_LEN);
        assert!(rl.change_write_state().is_err());
    }

    #[test]
    fn fragments_oversized_application_data() {
        let mut rl = RecordLayer::new(Pipe::default(), ProtocolVersion::TLS1_2, 16);
        let payload = vec![0xAB; 40];
        rl.write(ContentType::ApplicationData, &payload).unwrap();
        // 40 bytes at a 16-byte record_size_limit: three fragments (16, 16, 8).
        // With the null cipher each fragment appears verbatim in the wire
        // trace after its 5-byte header.
        let trace = rl.into_transport().written;
        assert_eq!(trace[0], ContentType::ApplicationData as u8);
        assert_eq!(u16::from_be_bytes([trace[3], trace[4]]), 16);
        assert_eq!(trace.len(), 3 * 5 + 40);
    }
}
