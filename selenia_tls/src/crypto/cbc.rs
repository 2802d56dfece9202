//! CBC block-cipher adapters for the legacy (non-AEAD) suites in §4.4.
//! `record::cipher_state::CipherState` is the only caller; it owns the TLS
//! padding format and the MAC-then-encrypt / encrypt-then-MAC composition,
//! this module only does the raw block-cipher transform.

use crate::error::TlsError;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::cipher::block_padding::NoPadding;
use aes::{Aes128, Aes256};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// A block cipher in CBC mode. `block_len` doubles as the IV length for
/// every cipher this engine registers (AES is the only block cipher TLS
/// still negotiates CBC suites for).
pub trait CbcAlgorithm: Send + Sync {
    fn name(&self) -> &'static str;
    fn key_len(&self) -> usize;
    fn block_len(&self) -> usize;

    /// `plaintext` must already be a multiple of `block_len` (the caller
    /// has applied TLS padding). Returns the ciphertext, same length.
    fn encrypt(&self, key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, TlsError>;

    /// `ciphertext` must be a multiple of `block_len`. Returns the padded
    /// plaintext, same length -- the caller strips and verifies TLS
    /// padding itself, in constant time.
    fn decrypt(&self, key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, TlsError>;
}

pub struct Aes128CbcAlgorithm;

impl CbcAlgorithm for Aes128CbcAlgorithm {
    fn name(&self) -> &'static str {
        "AES-128-CBC"
    }
    fn key_len(&self) -> usize {
        16
    }
    fn block_len(&self) -> usize {
        16
    }

    fn encrypt(&self, key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, TlsError> {
        let mut enc = Aes128CbcEnc::new_from_slices(key, iv)
            .map_err(|e| TlsError::Internal(format!("aes-128-cbc key/iv: {e:?}")))?;
        let mut buf = plaintext.to_vec();
        let len = buf.len();
        enc.encrypt_padded_mut::<NoPadding>(&mut buf, len)
            .map_err(|e| TlsError::Internal(format!("aes-128-cbc encrypt: {e:?}")))?;
        Ok(buf)
    }

    fn decrypt(&self, key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, TlsError> {
        let mut dec = Aes128CbcDec::new_from_slices(key, iv)
            .map_err(|e| TlsError::Internal(format!("aes-128-cbc key/iv: {e:?}")))?;
        let mut buf = ciphertext.to_vec();
        dec.decrypt_padded_mut::<NoPadding>(&mut buf)
            .map_err(|_| TlsError::BadRecordMac)?;
        Ok(buf)
    }
}

pub struct Aes256CbcAlgorithm;

impl CbcAlgorithm for Aes256CbcAlgorithm {
    fn name(&self) -> &'static str {
        "AES-256-CBC"
    }
    fn key_len(&self) -> usize {
        32
    }
    fn block_len(&self) -> usize {
        16
    }

    fn encrypt(&self, key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, TlsError> {
        let mut enc = Aes256CbcEnc::new_from_slices(key, iv)
            .map_err(|e| TlsError::Internal(format!("aes-256-cbc key/iv: {e:?}")))?;
        let mut buf = plaintext.to_vec();
        let len = buf.len();
        enc.encrypt_padded_mut::<NoPadding>(&mut buf, len)
            .map_err(|e| TlsError::Internal(format!("aes-256-cbc encrypt: {e:?}")))?;
        Ok(buf)
    }

    fn decrypt(&self, key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, TlsError> {
        let mut dec = Aes256CbcDec::new_from_slices(key, iv)
            .map_err(|e| TlsError::Internal(format!("aes-256-cbc key/iv: {e:?}")))?;
        let mut buf = ciphertext.to_vec();
        dec.decrypt_padded_mut::<NoPadding>(&mut buf)
            .map_err(|_| TlsError::BadRecordMac)?;
        Ok(buf)
    }
}

/// Look up the block cipher for a negotiated `protocol::BulkAlgorithm`.
/// Panics on an AEAD `bulk` -- callers must check `bulk.is_aead()` first,
/// same contract as `crypto::aead::for_bulk`.
pub fn for_bulk(bulk: crate::protocol::BulkAlgorithm) -> Box<dyn CbcAlgorithm> {
    use crate::protocol::BulkAlgorithm::*;
    match bulk {
        Aes128CbcSha | Aes128CbcSha256 => Box::new(Aes128CbcAlgorithm),
        Aes256CbcSha | Aes256CbcSha384 => Box::new(Aes256CbcAlgorithm),
        other => panic!("{other:?} is not a CBC bulk algorithm"),
    }
}

/// Look up the MAC digest a CBC suite's bulk tag implies. This is
/// independent of `CipherSuite::hash` (the PRF hash): e.g.
/// `TLS_RSA_WITH_AES_128_CBC_SHA` PRFs with the legacy dual MD5+SHA1 hash
/// but MACs each record with plain SHA-1.
pub fn mac_digest_for_bulk(bulk: crate::protocol::BulkAlgorithm) -> Box<dyn crate::crypto::hash::DigestAlgorithm> {
    use crate::protocol::BulkAlgorithm::*;
    match bulk {
        Aes128CbcSha | Aes256CbcSha => Box::new(crate::crypto::hash::Sha1),
        Aes128CbcSha256 => Box::new(crate::crypto::hash::Sha256),
        Aes256CbcSha384 => Box::new(crate::crypto::hash::Sha384),
        other => panic!("{other:?} is not a CBC bulk algorithm"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aes128_cbc_roundtrip_on_block_aligned_input() {
        let algo = Aes128CbcAlgorithm;
        let key = [0x11u8; 16];
        let iv = [0x22u8; 16];
        let pt = [0xAAu8; 32]; // two full blocks, no padding needed for the raw transform
        let ct = algo.encrypt(&key, &iv, &pt).unwrap();
        assert_eq!(ct.len(), pt.len());
        let back = algo.decrypt(&key, &iv, &ct).unwrap();
        assert_eq!(back, pt);
    }

    #[test]
    fn aes256_cbc_roundtrip_on_block_aligned_input() {
        let algo = Aes256CbcAlgorithm;
        let key = [0x33u8; 32];
        let iv = [0x44u8; 16];
        let pt = [0xBBu8; 16];
        let ct = algo.encrypt(&key, &iv, &pt).unwrap();
        let back = algo.decrypt(&key, &iv, &ct).unwrap();
        assert_eq!(back, pt);
    }

    #[test]
    fn non_block_aligned_input_is_rejected() {
        let algo = Aes128CbcAlgorithm;
        let key = [0x11u8; 16];
        let iv = [0x22u8; 16];
        let err = algo.encrypt(&key, &iv, &[0u8; 17]).unwrap_err();
        assert!(matches!(err, TlsError::Internal(_)));
    }
}
