//! Digest/HMAC adapters (§4.12). The legacy dual MD5+SHA1 PRF (TLS ≤1.1)
//! needs both `Md5` and `Sha1` at once; TLS 1.2 and the TLS 1.3 HKDF tree
//! each use a single modern hash. `crate::key_schedule` is the only caller
//! that should import this module -- everyone else goes through
//! `protocol::HashAlgorithm` as a tag and lets `key_schedule` resolve it.

use hmac::{Hmac, Mac};
use md5::Md5 as Md5Impl;
use sha1::Sha1 as Sha1Impl;
use sha2::{Sha256 as Sha256Impl, Sha384 as Sha384Impl};

/// A single hash function plus its HMAC, as a trait object so
/// `key_schedule` can hold "the negotiated hash" without a generic
/// parameter threading through every function in the module.
pub trait DigestAlgorithm: Send + Sync {
    fn name(&self) -> &'static str;
    fn output_len(&self) -> usize;
    fn digest(&self, data: &[u8]) -> Vec<u8>;
    fn hmac(&self, key: &[u8], data: &[u8]) -> Vec<u8>;
}

macro_rules! digest_impl {
    ($name:ident, $inner:ty, $hmac_inner:ty, $label:expr, $len:expr) => {
        pub struct $name;

        impl DigestAlgorithm for $name {
            fn name(&self) -> &'static str {
                $label
            }
            fn output_len(&self) -> usize {
                $len
            }
            fn digest(&self, data: &[u8]) -> Vec<u8> {
                use digest::Digest;
                <$inner>::digest(data).to_vec()
            }
            fn hmac(&self, key: &[u8], data: &[u8]) -> Vec<u8> {
                let mut mac = <$hmac_inner>::new_from_slice(key)
                    .expect("HMAC accepts any key length");
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
        }
    };
}

digest_impl!(Md5, Md5Impl, Hmac<Md5Impl>, "md5", 16);
digest_impl!(Sha1, Sha1Impl, Hmac<Sha1Impl>, "sha1", 20);
digest_impl!(Sha256, Sha256Impl, Hmac<Sha256Impl>, "sha256", 32);
digest_impl!(Sha384, Sha384Impl, Hmac<Sha384Impl>, "sha384", 48);

/// Look up the adapter for a negotiated `protocol::HashAlgorithm`. The
/// `LegacyMd5Sha1` tag has no single adapter -- `key_schedule`'s legacy PRF
/// combines `Md5` and `Sha1` directly.
pub fn for_modern_hash(h: crate::protocol::HashAlgorithm) -> Box<dyn DigestAlgorithm> {
    use crate::protocol::HashAlgorithm::*;
    match h {
        Sha256 => Box::new(self::Sha256),
        Sha384 => Box::new(self::Sha384),
        LegacyMd5Sha1 => panic!("LegacyMd5Sha1 has no single DigestAlgorithm adapter"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_empty_digest_matches_known_answer() {
        let got = Sha256.digest(b"");
        let want = hex::decode(
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b85",
        )
        .unwrap();
        assert_eq!(got, want);
    }

    #[test]
    fn hmac_sha256_output_length() {
        let mac = Sha256.hmac(b"key", b"The quick brown fox jumps over the lazy dog");
        assert_eq!(mac.len(), 32);
    }

    #[test]
    fn different_keys_give_different_macs() {
        let a = Sha256.hmac(b"key-a", b"message");
        let b = Sha256.hmac(b"key-b", b"message");
        assert_ne!(a, b);
    }
}
