//! Per-direction cipher state (§3, §4.4). A `Connection` owns one
//! `CipherState` for reading and one for writing; each starts out
//! `NullAead` and gets replaced wholesale on a key change rather than
//! mutated in place, so a half-finished rekey can never be observed.

use crate::crypto::aead::{self, AeadAlgorithm};
use crate::crypto::cbc::{self, CbcAlgorithm};
use crate::crypto::hash::DigestAlgorithm;
use crate::crypto::rand::fill_random;
use crate::error::TlsError;
use crate::protocol::{BulkAlgorithm, ContentType, ProtocolVersion};
use subtle::ConstantTimeEq;

/// How the MAC and cipher are composed for a non-AEAD suite. TLS 1.3 and
/// the modern AEAD suites in TLS 1.2 don't use this at all; it only
/// matters for the legacy CBC suites.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MacMode {
    /// MAC-then-encrypt (the RFC 5246 default).
    MacThenEncrypt,
    /// RFC 7366 Encrypt-then-MAC.
    EncryptThenMac,
}

/// Distinguishes the three AAD/nonce recipes §4.4 specifies, since they
/// differ in ways a single code path can't paper over.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AeadRecipe {
    /// TLS 1.2 AES-GCM/CCM: nonce = fixed_iv(4) || explicit_nonce(8), AAD
    /// includes the plaintext length.
    ExplicitNonceTls12,
    /// TLS 1.2 ChaCha20-Poly1305 (RFC 7905) and all of TLS 1.3: nonce =
    /// fixed_iv XOR left-padded-seqnum, both 12 bytes.
    XorNonce,
}

/// One direction's live cryptographic state. `version` determines which
/// MAC-construction rules apply for legacy CBC suites.
pub struct CipherState {
    pub version: ProtocolVersion,
    pub algorithm: Box<dyn AeadAlgorithm>,
    pub recipe: AeadRecipe,
    pub mac_mode: MacMode,
    pub is_aead: bool,
    pub key: Vec<u8>,
    /// Fixed part of the nonce/IV. For AEAD this is the 4/12-byte fixed
    /// IV. For CBC in TLS 1.0 this is the running chained IV (the last
    /// ciphertext block); TLS 1.1+ CBC generates a fresh explicit IV per
    /// record instead and ignores this field.
    pub fixed_iv: Vec<u8>,
    /// Separate MAC key, only populated for legacy CBC suites (AEAD
    /// suites fold integrity into the cipher itself).
    pub mac_key: Vec<u8>,
    /// CBC block cipher, only populated when `is_aead` is false.
    pub cbc_algo: Option<Box<dyn CbcAlgorithm>>,
    /// MAC digest for CBC suites (SHA-1/SHA-256/SHA-384 depending on the
    /// suite's bulk tag -- independent of the suite's PRF hash).
    pub mac_algo: Option<Box<dyn DigestAlgorithm>>,
    pub seq: u64,
}

impl CipherState {
    /// The pre-handshake null state: no encryption, no MAC, sequence
    /// number starts at zero.
    pub fn null(version: ProtocolVersion) -> CipherState {
        CipherState {
            version,
            algorithm: Box::new(aead::NullAead),
            recipe: AeadRecipe::XorNonce,
            mac_mode: MacMode::MacThenEncrypt,
            is_aead: true,
            key: Vec::new(),
            fixed_iv: Vec::new(),
            mac_key: Vec::new(),
            cbc_algo: None,
            mac_algo: None,
            seq: 0,
        }
    }

    /// Build an AEAD cipher state (TLS 1.2 GCM/ChaCha20-Poly1305 suites, or
    /// any TLS 1.3 traffic key).
    pub fn aead(
        version: ProtocolVersion,
        bulk: BulkAlgorithm,
        key: Vec<u8>,
        fixed_iv: Vec<u8>,
        recipe: AeadRecipe,
    ) -> CipherState {
        CipherState {
            version,
            algorithm: aead::for_bulk(bulk),
            recipe,
            mac_mode: MacMode::MacThenEncrypt,
            is_aead: true,
            key,
            fixed_iv,
            mac_key: Vec::new(),
            cbc_algo: None,
            mac_algo: None,
            seq: 0,
        }
    }

    /// Build a CBC cipher state (RFC 5246 §6.2.3.2 legacy suites). `iv` is
    /// the key-block IV slice: for TLS 1.0 it seeds the running chained IV;
    /// for TLS 1.1+ it's unused (each record gets a fresh random IV) but
    /// still accepted so callers don't need version-specific plumbing.
    pub fn cbc(
        version: ProtocolVersion,
        bulk: BulkAlgorithm,
        mac_mode: MacMode,
        key: Vec<u8>,
        mac_key: Vec<u8>,
        iv: Vec<u8>,
    ) -> CipherState {
        CipherState {
            version,
            algorithm: Box::new(aead::NullAead),
            recipe: AeadRecipe::ExplicitNonceTls12,
            mac_mode,
            is_aead: false,
            key,
            fixed_iv: iv,
            mac_key,
            cbc_algo: Some(cbc::for_bulk(bulk)),
            mac_algo: Some(cbc::mac_digest_for_bulk(bulk)),
            seq: 0,
        }
    }

    /// Compute the 8-byte sequence number (network order) and bump it.
    /// Overflow is connection-fatal per §4.4.
    fn next_seq(&mut self) -> Result<[u8; 8], TlsError> {
        if self.seq == u64::MAX {
            return Err(TlsError::Internal("sequence number overflow".into()));
        }
        let bytes = self.seq.to_be_bytes();
        self.seq += 1;
        Ok(bytes)
    }

    /// TLS 1.1+ CBC suites carry a fresh random IV per record; TLS 1.0
    /// chains the previous record's last ciphertext block instead (RFC
    /// 2246 §6.2.3.2), which is why `fixed_iv` doubles as running state
    /// for that version only.
    fn explicit_iv(&self) -> bool {
        self.version > ProtocolVersion::TLS1_0
    }

    fn nonce_for(&self, seq: &[u8; 8]) -> Vec<u8> {
        match self.recipe {
            AeadRecipe::ExplicitNonceTls12 => {
                let mut n = self.fixed_iv.clone();
                n.extend_from_slice(seq);
                n
            }
            AeadRecipe::XorNonce => {
                let mut n = self.fixed_iv.clone();
                let pad = n.len() - 8;
                for (i, b) in seq.iter().enumerate() {
                    n[pad + i] ^= b;
                }
                n
            }
        }
    }

    /// Encrypt one fragment for `content_type`. Returns the bytes to place
    /// in the record body after the header, which for
    /// `AeadRecipe::ExplicitNonceTls12` is `explicit_nonce || ciphertext`
    /// and for `XorNonce`/TLS 1.3 is just `ciphertext` (the content type is
    /// folded into the plaintext before sealing, per TLS 1.3 §5.2).
    pub fn encrypt(
        &mut self,
        content_type: ContentType,
        record_version: ProtocolVersion,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, TlsError> {
        let seq = self.next_seq()?;

        if !self.is_aead {
            return self.encrypt_cbc(&seq, content_type, record_version, plaintext);
        }

        let nonce = self.nonce_for(&seq);

        if self.version.is_tls13() {
            let mut inner = plaintext.to_vec();
            inner.push(content_type as u8);
            let ct_len = (inner.len() + self.algorithm.tag_len()) as u16;
            let aad = tls13_aad(ct_len);
            let sealed = self.algorithm.seal(&self.key, &nonce, &aad, &inner)?;
            return Ok(sealed);
        }

        let aad = legacy_aad(&seq, content_type, record_version, plaintext.len() as u16);
        let sealed = self.algorithm.seal(&self.key, &nonce, &aad, plaintext)?;
        match self.recipe {
            AeadRecipe::ExplicitNonceTls12 => {
                let mut out = seq.to_vec();
                out.extend_from_slice(&sealed);
                Ok(out)
            }
            AeadRecipe::XorNonce => Ok(sealed),
        }
    }

    /// Decrypt one record body for `content_type`. Returns (plaintext,
    /// effective content type) -- for TLS 1.3 the effective type is read
    /// back out of the decrypted inner plaintext.
    pub fn decrypt(
        &mut self,
        content_type: ContentType,
        record_version: ProtocolVersion,
        body: &[u8],
    ) -> Result<(Vec<u8>, ContentType), TlsError> {
        let seq = self.next_seq()?;

        if !self.is_aead {
            let plain = self.decrypt_cbc(&seq, content_type, record_version, body)?;
            return Ok((plain, content_type));
        }

        let (explicit, ciphertext) = match self.recipe {
            AeadRecipe::ExplicitNonceTls12 => {
                if body.len() < 8 {
                    return Err(TlsError::Decode("record too short for explicit nonce".into()));
                }
                let (head, rest) = body.split_at(8);
                (Some(head), rest)
            }
            AeadRecipe::XorNonce => (None, body),
        };

        let nonce = match explicit {
            Some(head) => {
                let mut n = self.fixed_iv.clone();
                n.extend_from_slice(head);
                n
            }
            None => self.nonce_for(&seq),
        };

        if self.version.is_tls13() {
            let ct_len = body.len() as u16;
            let aad = tls13_aad(ct_len);
            let mut plain = self.algorithm.open(&self.key, &nonce, &aad, ciphertext)?;
            // Strip trailing zero padding, then the last nonzero byte is the
            // real content type (RFC 8446 §5.2).
            while let Some(&0) = plain.last() {
                plain.pop();
            }
            let inner_type = plain
                .pop()
                .ok_or_else(|| TlsError::Decode("empty TLS 1.3 inner plaintext".into()))?;
            let effective = ContentType::from_u8(inner_type)
                .ok_or_else(|| TlsError::Decode("unknown TLS 1.3 inner content type".into()))?;
            return Ok((plain, effective));
        }

        let aad = legacy_aad(
            &seq,
            content_type,
            record_version,
            (ciphertext.len().saturating_sub(self.algorithm.tag_len())) as u16,
        );
        let plain = self.algorithm.open(&self.key, &nonce, &aad, ciphertext)?;
        Ok((plain, content_type))
    }

    fn encrypt_cbc(
        &mut self,
        seq: &[u8; 8],
        content_type: ContentType,
        record_version: ProtocolVersion,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, TlsError> {
        let block_len = self.cbc_algo.as_ref().expect("cbc state without cbc_algo").block_len();
        let explicit = self.explicit_iv();
        let mac_then_encrypt = matches!(self.mac_mode, MacMode::MacThenEncrypt);

        let iv = if explicit {
            let mut iv = vec![0u8; block_len];
            fill_random(&mut iv);
            iv
        } else {
            self.fixed_iv.clone()
        };

        let mut padded = if mac_then_encrypt {
            let mac_input = legacy_mac_input(seq, content_type, record_version, plaintext.len() as u16, plaintext);
            let mac = self.mac_algo.as_ref().unwrap().hmac(&self.mac_key, &mac_input);
            let mut buf = plaintext.to_vec();
            buf.extend_from_slice(&mac);
            buf
        } else {
            plaintext.to_vec()
        };
        pad_to_block(&mut padded, block_len);

        let ciphertext = self.cbc_algo.as_ref().unwrap().encrypt(&self.key, &iv, &padded)?;
        if !explicit {
            self.fixed_iv = ciphertext[ciphertext.len() - block_len..].to_vec();
        }

        let mut wire = Vec::with_capacity(block_len + ciphertext.len());
        if explicit {
            wire.extend_from_slice(&iv);
        }
        wire.extend_from_slice(&ciphertext);

        if !mac_then_encrypt {
            let mac_input = legacy_mac_input(seq, content_type, record_version, wire.len() as u16, &wire);
            let mac = self.mac_algo.as_ref().unwrap().hmac(&self.mac_key, &mac_input);
            wire.extend_from_slice(&mac);
        }

        Ok(wire)
    }

    fn decrypt_cbc(
        &mut self,
        seq: &[u8; 8],
        content_type: ContentType,
        record_version: ProtocolVersion,
        body: &[u8],
    ) -> Result<Vec<u8>, TlsError> {
        let block_len = self.cbc_algo.as_ref().expect("cbc state without cbc_algo").block_len();
        let mac_len = self.mac_algo.as_ref().unwrap().output_len();
        let explicit = self.explicit_iv();
        let mac_then_encrypt = matches!(self.mac_mode, MacMode::MacThenEncrypt);

        let (iv, rest) = if explicit {
            if body.len() < block_len {
                return Err(TlsError::Decode("cbc record too short for explicit iv".into()));
            }
            let (head, tail) = body.split_at(block_len);
            (head.to_vec(), tail)
        } else {
            (self.fixed_iv.clone(), body)
        };

        if mac_then_encrypt {
            if rest.is_empty() || rest.len() % block_len != 0 {
                return Err(TlsError::BadRecordMac);
            }
            let padded = self.cbc_algo.as_ref().unwrap().decrypt(&self.key, &iv, rest)?;
            if !explicit {
                self.fixed_iv = rest[rest.len() - block_len..].to_vec();
            }

            let content_len = verify_padding_constant_time(&padded, block_len, mac_len)
                .ok_or(TlsError::BadRecordMac)?;
            let (content, tag) = padded.split_at(content_len);
            let tag = &tag[..mac_len];

            let expected_mac = self.mac_algo.as_ref().unwrap().hmac(
                &self.mac_key,
                &legacy_mac_input(seq, content_type, record_version, content.len() as u16, content),
            );
            if expected_mac.ct_eq(tag).unwrap_u8() != 1 {
                return Err(TlsError::BadRecordMac);
            }
            Ok(content.to_vec())
        } else {
            if rest.len() < mac_len {
                return Err(TlsError::BadRecordMac);
            }
            let (ciphertext, tag) = rest.split_at(rest.len() - mac_len);
            if ciphertext.is_empty() || ciphertext.len() % block_len != 0 {
                return Err(TlsError::BadRecordMac);
            }

            let mut wire = Vec::with_capacity(block_len + ciphertext.len());
            if explicit {
                wire.extend_from_slice(&iv);
            }
            wire.extend_from_slice(ciphertext);
            let expected_mac = self.mac_algo.as_ref().unwrap().hmac(
                &self.mac_key,
                &legacy_mac_input(seq, content_type, record_version, wire.len() as u16, &wire),
            );
            if expected_mac.ct_eq(tag).unwrap_u8() != 1 {
                return Err(TlsError::BadRecordMac);
            }

            let padded = self.cbc_algo.as_ref().unwrap().decrypt(&self.key, &iv, ciphertext)?;
            if !explicit {
                self.fixed_iv = ciphertext[ciphertext.len() - block_len..].to_vec();
            }
            let content_len = verify_padding_constant_time(&padded, block_len, 0).ok_or(TlsError::BadRecordMac)?;
            Ok(padded[..content_len].to_vec())
        }
    }
}

fn legacy_aad(seq: &[u8; 8], content_type: ContentType, version: ProtocolVersion, plaintext_len: u16) -> Vec<u8> {
    let mut aad = Vec::with_capacity(13);
    aad.extend_from_slice(seq);
    aad.push(content_type as u8);
    aad.extend_from_slice(&version.to_bytes());
    aad.extend_from_slice(&plaintext_len.to_be_bytes());
    aad
}

/// HMAC input for a legacy (non-AEAD) record: seq || type || version ||
/// length || fragment, per RFC 5246 §6.2.3.1. `len` is the fragment's own
/// length, not the eventual on-wire record length.
fn legacy_mac_input(
    seq: &[u8; 8],
    content_type: ContentType,
    version: ProtocolVersion,
    len: u16,
    data: &[u8],
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(13 + data.len());
    buf.extend_from_slice(seq);
    buf.push(content_type as u8);
    buf.extend_from_slice(&version.to_bytes());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(data);
    buf
}

/// Append TLS CBC padding: `padding_length` bytes each holding that value,
/// plus the length byte itself, so the result is a multiple of
/// `block_len`. When `buf` is already block-aligned this still adds a
/// full extra block, per RFC 5246 §6.2.3.2.
fn pad_to_block(buf: &mut Vec<u8>, block_len: usize) {
    let rem = buf.len() % block_len;
    let pad_len = (block_len - 1 - rem) as u8;
    for _ in 0..=pad_len {
        buf.push(pad_len);
    }
}

/// Validate TLS CBC padding and return the content length (everything
/// before the padding and, when `trailing_mac_len` is nonzero, before the
/// MAC tag too). Scans the same number of bytes regardless of the claimed
/// padding length so a malformed padding length doesn't visibly shorten
/// the work done -- a partial mitigation for Lucky13-style padding
/// oracles (full equalization would also need to pad the MAC computation
/// itself to a fixed number of compression rounds, which this engine
/// does not attempt).
fn verify_padding_constant_time(padded: &[u8], block_len: usize, trailing_mac_len: usize) -> Option<usize> {
    let total = padded.len();
    if total < block_len || total % block_len != 0 {
        return None;
    }
    let pad_len = padded[total - 1] as usize;

    let scan_len = total.min(256);
    let mut mismatch: u8 = 0;
    for i in 0..scan_len {
        let idx = total - 1 - i;
        let in_claimed_padding = i <= pad_len;
        let wrong = padded[idx] != pad_len as u8;
        mismatch |= (in_claimed_padding && wrong) as u8;
    }
    let length_ok = pad_len + 1 + trailing_mac_len <= total;
    if mismatch != 0 || !length_ok {
        return None;
    }
    Some(total - pad_len - 1 - trailing_mac_len)
}

fn tls13_aad(ciphertext_len: u16) -> Vec<u8> {
    let mut aad = Vec::with_capacity(5);
    aad.push(ContentType::ApplicationData as u8);
    aad.extend_from_slice(&ProtocolVersion::TLS1_2.to_bytes());
    aad.extend_from_slice(&ciphertext_len.to_be_bytes());
    aad
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls13_roundtrip_preserves_content_type() {
        let mut write_state = CipherState::aead(
            ProtocolVersion::TLS1_3,
            BulkAlgorithm::Aes128Gcm,
            vec![7u8; 16],
            vec![9u8; 12],
            AeadRecipe::XorNonce,
        );
        let mut read_state = CipherState::aead(
            ProtocolVersion::TLS1_3,
            BulkAlgorithm::Aes128Gcm,
            vec![7u8; 16],
            vec![9u8; 12],
            AeadRecipe::XorNonce,
        );
        let body = write_state
            .encrypt(ContentType::Handshake, ProtocolVersion::TLS1_2, b"client hello")
            .unwrap();
        let (plain, effective) = read_state
            .decrypt(ContentType::ApplicationData, ProtocolVersion::TLS1_2, &body)
            .unwrap();
        assert_eq!(plain, b"client hello");
        assert_eq!(effective, ContentType::Handshake);
    }

    #[test]
    fn sequence_number_overflow_is_internal_error() {
        let mut state = CipherState::aead(
            ProtocolVersion::TLS1_2,
            BulkAlgorithm::Aes128Gcm,
            vec![1u8; 16],
            vec![2u8; 4],
            AeadRecipe::ExplicitNonceTls12,
        );
        state.seq = u64::MAX;
        let err = state
            .encrypt(ContentType::ApplicationData, ProtocolVersion::TLS1_2, b"x")
            .unwrap_err();
        assert!(matches!(err, TlsError::Internal(_)));
    }

    fn cbc_pair(version: ProtocolVersion, mac_mode: MacMode) -> (CipherState, CipherState) {
        let key = vec![0x5Au8; 16];
        let mac_key = vec![0xA5u8; 20];
        let iv = vec![0x01u8; 16];
        let write = CipherState::cbc(
            version,
            BulkAlgorithm::Aes128CbcSha,
            mac_mode,
            key.clone(),
            mac_key.clone(),
            iv.clone(),
        );
        let read = CipherState::cbc(version, BulkAlgorithm::Aes128CbcSha, mac_mode, key, mac_key, iv);
        (write, read)
    }

    #[test]
    fn cbc_mac_then_encrypt_roundtrip_tls12() {
        let (mut write_state, mut read_state) = cbc_pair(ProtocolVersion::TLS1_2, MacMode::MacThenEncrypt);
        let body = write_state
            .encrypt(ContentType::ApplicationData, ProtocolVersion::TLS1_2, b"hello over cbc")
            .unwrap();
        let (plain, effective) = read_state
            .decrypt(ContentType::ApplicationData, ProtocolVersion::TLS1_2, &body)
            .unwrap();
        assert_eq!(plain, b"hello over cbc");
        assert_eq!(effective, ContentType::ApplicationData);
    }

    #[test]
    fn cbc_encrypt_then_mac_roundtrip_tls12() {
        let (mut write_state, mut read_state) = cbc_pair(ProtocolVersion::TLS1_2, MacMode::EncryptThenMac);
        let body = write_state
            .encrypt(ContentType::ApplicationData, ProtocolVersion::TLS1_2, b"etm record")
            .unwrap();
        let (plain, _) = read_state
            .decrypt(ContentType::ApplicationData, ProtocolVersion::TLS1_2, &body)
            .unwrap();
        assert_eq!(plain, b"etm record");
    }

    #[test]
    fn cbc_chains_implicit_iv_on_tls10() {
        let (mut write_state, mut read_state) = cbc_pair(ProtocolVersion::TLS1_0, MacMode::MacThenEncrypt);
        let first = write_state
            .encrypt(ContentType::ApplicationData, ProtocolVersion::TLS1_0, b"first")
            .unwrap();
        let second = write_state
            .encrypt(ContentType::ApplicationData, ProtocolVersion::TLS1_0, b"second")
            .unwrap();
        // TLS 1.0 carries no explicit IV; both records start directly with
        // ciphertext blocks chained from the prior record's last block.
        let (p1, _) = read_state
            .decrypt(ContentType::ApplicationData, ProtocolVersion::TLS1_0, &first)
            .unwrap();
        let (p2, _) = read_state
            .decrypt(ContentType::ApplicationData, ProtocolVersion::TLS1_0, &second)
            .unwrap();
        assert_eq!(p1, b"first");
        assert_eq!(p2, b"second");
    }

    #[test]
    fn cbc_tampered_padding_is_bad_record_mac() {
        let (mut write_state, mut read_state) = cbc_pair(ProtocolVersion::TLS1_2, MacMode::MacThenEncrypt);
        let mut body = write_state
            .encrypt(ContentType::ApplicationData, ProtocolVersion::TLS1_2, b"tamper me")
            .unwrap();
        *body.last_mut().unwrap() ^= 0xFF;
        let err = read_state
            .decrypt(ContentType::ApplicationData, ProtocolVersion::TLS1_2, &body)
            .unwrap_err();
        assert!(matches!(err, TlsError::BadRecordMac));
    }

    #[test]
    fn pad_to_block_always_extends_by_at_least_one_byte() {
        let mut buf = vec![0u8; 16];
        pad_to_block(&mut buf, 16);
        assert_eq!(buf.len(), 32);
        assert!(buf[16..].iter().all(|&b| b == 15));
    }
}
