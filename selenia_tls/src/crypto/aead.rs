//! AEAD adapters (§4.12). Every cipher suite this engine negotiates maps to
//! exactly one of these; `CipherState` (in `crate::record::cipher_state`)
//! holds a `Box<dyn AeadAlgorithm>` and never touches `aes_gcm`/
//! `chacha20poly1305` itself.

use crate::error::TlsError;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce as AesNonce};
use chacha20poly1305::ChaCha20Poly1305;

/// Common interface over an AEAD cipher. `key_len`/`nonce_len`/`tag_len`
/// let `KeySchedule` size its key-block slices without a suite-specific
/// match statement at the call site.
pub trait AeadAlgorithm: Send + Sync {
    fn name(&self) -> &'static str;
    fn key_len(&self) -> usize;
    fn nonce_len(&self) -> usize;
    fn tag_len(&self) -> usize;

    /// Encrypt `pt` under `key`/`nonce`, authenticating `aad`. Returns
    /// ciphertext with the tag appended.
    fn seal(&self, key: &[u8], nonce: &[u8], aad: &[u8], pt: &[u8]) -> Result<Vec<u8>, TlsError>;

    /// Decrypt `ct` (tag included) under `key`/`nonce`, authenticating
    /// `aad`. Any failure -- wrong tag, truncated input -- collapses to
    /// `TlsError::BadRecordMac` so the caller can't distinguish causes.
    fn open(&self, key: &[u8], nonce: &[u8], aad: &[u8], ct: &[u8]) -> Result<Vec<u8>, TlsError>;
}

/// Identity "cipher" used before the first key change: no confidentiality,
/// no integrity. Exists so `CipherState` always holds *some* algorithm
/// rather than an `Option`.
pub struct NullAead;

impl AeadAlgorithm for NullAead {
    fn name(&self) -> &'static str {
        "null"
    }
    fn key_len(&self) -> usize {
        0
    }
    fn nonce_len(&self) -> usize {
        0
    }
    fn tag_len(&self) -> usize {
        0
    }
    fn seal(&self, _key: &[u8], _nonce: &[u8], _aad: &[u8], pt: &[u8]) -> Result<Vec<u8>, TlsError> {
        Ok(pt.to_vec())
    }
    fn open(&self, _key: &[u8], _nonce: &[u8], _aad: &[u8], ct: &[u8]) -> Result<Vec<u8>, TlsError> {
        Ok(ct.to_vec())
    }
}

pub struct Aes128GcmAlgorithm;

impl AeadAlgorithm for Aes128GcmAlgorithm {
    fn name(&self) -> &'static str {
        "AES-128-GCM"
    }
    fn key_len(&self) -> usize {
        16
    }
    fn nonce_len(&self) -> usize {
        12
    }
    fn tag_len(&self) -> usize {
        16
    }

    fn seal(&self, key: &[u8], nonce: &[u8], aad: &[u8], pt: &[u8]) -> Result<Vec<u8>, TlsError> {
        let cipher = Aes128Gcm::new_from_slice(key)
            .map_err(|e| TlsError::Internal(format!("aes-128-gcm key: {e}")))?;
        cipher
            .encrypt(AesNonce::from_slice(nonce), Payload { msg: pt, aad })
            .map_err(|_| TlsError::Internal("aes-128-gcm seal failed".into()))
    }

    fn open(&self, key: &[u8], nonce: &[u8], aad: &[u8], ct: &[u8]) -> Result<Vec<u8>, TlsError> {
        let cipher = Aes128Gcm::new_from_slice(key)
            .map_err(|e| TlsError::Internal(format!("aes-128-gcm key: {e}")))?;
        cipher
            .decrypt(AesNonce::from_slice(nonce), Payload { msg: ct, aad })
            .map_err(|_| TlsError::BadRecordMac)
    }
}

pub struct Aes256GcmAlgorithm;

impl AeadAlgorithm for Aes256GcmAlgorithm {
    fn name(&self) -> &'static str {
        "AES-256-GCM"
    }
    fn key_len(&self) -> usize {
        32
    }
    fn nonce_len(&self) -> usize {
        12
    }
    fn tag_len(&self) -> usize {
        16
    }

    fn seal(&self, key: &[u8], nonce: &[u8], aad: &[u8], pt: &[u8]) -> Result<Vec<u8>, TlsError> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| TlsError::Internal(format!("aes-256-gcm key: {e}")))?;
        cipher
            .encrypt(AesNonce::from_slice(nonce), Payload { msg: pt, aad })
            .map_err(|_| TlsError::Internal("aes-256-gcm seal failed".into()))
    }

    fn open(&self, key: &[u8], nonce: &[u8], aad: &[u8], ct: &[u8]) -> Result<Vec<u8>, TlsError> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| TlsError::Internal(format!("aes-256-gcm key: {e}")))?;
        cipher
            .decrypt(AesNonce::from_slice(nonce), Payload { msg: ct, aad })
            .map_err(|_| TlsError::BadRecordMac)
    }
}

pub struct ChaCha20Poly1305Algorithm;

impl AeadAlgorithm for ChaCha20Poly1305Algorithm {
    fn name(&self) -> &'static str {
        "CHACHA20-POLY1305"
    }
    fn key_len(&self) -> usize {
        32
    }
    fn nonce_len(&self) -> usize {
        12
    }
    fn tag_len(&self) -> usize {
        16
    }

    fn seal(&self, key: &[u8], nonce: &[u8], aad: &[u8], pt: &[u8]) -> Result<Vec<u8>, TlsError> {
        let cipher = ChaCha20Poly1305::new_from_slice(key)
            .map_err(|e| TlsError::Internal(format!("chacha20poly1305 key: {e}")))?;
        cipher
            .encrypt(AesNonce::from_slice(nonce), Payload { msg: pt, aad })
            .map_err(|_| TlsError::Internal("chacha20poly1305 seal failed".into()))
    }

    fn open(&self, key: &[u8], nonce: &[u8], aad: &[u8], ct: &[u8]) -> Result<Vec<u8>, TlsError> {
        let cipher = ChaCha20Poly1305::new_from_slice(key)
            .map_err(|e| TlsError::Internal(format!("chacha20poly1305 key: {e}")))?;
        cipher
            .decrypt(AesNonce::from_slice(nonce), Payload { msg: ct, aad })
            .map_err(|_| TlsError::BadRecordMac)
    }
}

/// Look up the adapter for a negotiated `protocol::BulkAlgorithm`.
pub fn for_bulk(bulk: crate::protocol::BulkAlgorithm) -> Box<dyn AeadAlgorithm> {
    use crate::protocol::BulkAlgorithm::*;
    match bulk {
        Aes128Gcm => Box::new(Aes128GcmAlgorithm),
        Aes256Gcm => Box::new(Aes256GcmAlgorithm),
        Chacha20Poly1305 => Box::new(ChaCha20Poly1305Algorithm),
        _ => Box::new(NullAead),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aes128gcm_roundtrip() {
        let a = Aes128GcmAlgorithm;
        let key = [0x11u8; 16];
        let nonce = [0x22u8; 12];
        let aad = b"header";
        let pt = b"hello, tls";
        let ct = a.seal(&key, &nonce, aad, pt).unwrap();
        let back = a.open(&key, &nonce, aad, &ct).unwrap();
        assert_eq!(back, pt);
    }

    #[test]
    fn tampered_tag_is_bad_record_mac() {
        let a = ChaCha20Poly1305Algorithm;
        let key = [0x33u8; 32];
        let nonce = [0x44u8; 12];
        let mut ct = a.seal(&key, &nonce, b"aad", b"payload").unwrap();
        *ct.last_mut().unwrap() ^= 0xFF;
        let err = a.open(&key, &nonce, b"aad", &ct).unwrap_err();
        assert!(matches!(err, TlsError::BadRecordMac));
    }

    #[test]
    fn null_aead_is_identity() {
        let n = NullAead;
        let pt = b"plaintext";
        assert_eq!(n.seal(&[], &[], &[], pt).unwrap(), pt);
        assert_eq!(n.open(&[], &[], &[], pt).unwrap(), pt);
    }
}
