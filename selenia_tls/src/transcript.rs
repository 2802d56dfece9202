//! HandshakeHashes (§4.6): running digests of every handshake message sent
//! or received, in order, covering every PRF variant this engine might
//! need before the cipher suite (and therefore the *one* hash that
//! actually matters) is known.

use crate::crypto::hash::{DigestAlgorithm, Sha256, Sha384};
use digest::Digest;
use md5::Md5 as Md5Impl;
use sha1::Sha1 as Sha1Impl;
use sha2::{Sha256 as Sha256Impl, Sha384 as Sha384Impl};

/// Live digest contexts, one per algorithm this engine supports. Kept as
/// incremental hasher state (not just accumulated bytes) since handshake
/// transcripts can run to tens of kilobytes with large certificate
/// chains.
pub struct HandshakeHashes {
    md5: Md5Impl,
    sha1: Sha1Impl,
    sha256: Sha256Impl,
    sha384: Sha384Impl,
}

/// Which snapshot a caller wants out of `HandshakeHashes::digest`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TranscriptHash {
    Md5,
    Sha1,
    Sha256,
    Sha384,
    /// RFC 8446's "Hash" -- the negotiated suite's modern hash (sha256 or
    /// sha384), used for TLS 1.3 transcript binding.
    Intrinsic(crate::protocol::HashAlgorithm),
}

impl HandshakeHashes {
    pub fn new() -> HandshakeHashes {
        HandshakeHashes {
            md5: Md5Impl::new(),
            sha1: Sha1Impl::new(),
            sha256: Sha256Impl::new(),
            sha384: Sha384Impl::new(),
        }
    }

    /// Feed the exact bytes of one handshake message (header included) into
    /// every running digest.
    pub fn update(&mut self, bytes: &[u8]) {
        self.md5.update(bytes);
        self.sha1.update(bytes);
        self.sha256.update(bytes);
        self.sha384.update(bytes);
    }

    /// Snapshot a digest without disturbing the running state -- later
    /// messages still get folded into the same context.
    pub fn digest(&self, which: TranscriptHash) -> Vec<u8> {
        match which {
            TranscriptHash::Md5 => self.md5.clone().finalize().to_vec(),
            TranscriptHash::Sha1 => self.sha1.clone().finalize().to_vec(),
            TranscriptHash::Sha256 => self.sha256.clone().finalize().to_vec(),
            TranscriptHash::Sha384 => self.sha384.clone().finalize().to_vec(),
            TranscriptHash::Intrinsic(crate::protocol::HashAlgorithm::Sha256) => {
                self.sha256.clone().finalize().to_vec()
            }
            TranscriptHash::Intrinsic(crate::protocol::HashAlgorithm::Sha384) => {
                self.sha384.clone().finalize().to_vec()
            }
            TranscriptHash::Intrinsic(crate::protocol::HashAlgorithm::LegacyMd5Sha1) => {
                let mut both = self.md5.clone().finalize().to_vec();
                both.extend_from_slice(&self.sha1.clone().finalize());
                both
            }
        }
    }

    /// RFC 8446 §4.4.1: once a HelloRetryRequest is in play, the first
    /// ClientHello is replaced in the running transcript by a synthetic
    /// `message_hash` handshake message wrapping its digest under the
    /// negotiated suite's hash, so the eventual transcript hash only ever
    /// needs to carry one copy of CH1's content instead of its full bytes.
    /// Must be called after CH1 (and nothing past it) has been fed via
    /// `update`; the caller then resumes feeding the real HRR bytes,
    /// followed by the second ClientHello, into the reset instance.
    pub fn replace_first_client_hello_with_message_hash(&mut self, hash: crate::protocol::HashAlgorithm) {
        let ch1_hash = self.digest(TranscriptHash::Intrinsic(hash));
        *self = HandshakeHashes::new();
        let mut synthetic = vec![254u8, 0, 0, ch1_hash.len() as u8]; // message_hash(254), 24-bit length
        synthetic.extend_from_slice(&ch1_hash);
        self.update(&synthetic);
    }

    /// The legacy TLS ≤1.1 PRF seed: MD5 digest concatenated with SHA-1
    /// digest of the same transcript, used for both Finished verify_data
    /// computations.
    pub fn legacy_seed(&self) -> Vec<u8> {
        self.digest(TranscriptHash::Intrinsic(crate::protocol::HashAlgorithm::LegacyMd5Sha1))
    }

    /// Convenience accessors matching `DigestAlgorithm` adapters, for
    /// callers that want an object rather than a raw `Vec<u8>`.
    pub fn modern_adapter(hash: crate::protocol::HashAlgorithm) -> Box<dyn DigestAlgorithm> {
        use crate::protocol::HashAlgorithm::*;
        match hash {
            Sha256 => Box::new(self::Sha256),
            Sha384 => Box::new(self::Sha384),
            LegacyMd5Sha1 => panic!("legacy PRF has no single DigestAlgorithm adapter"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_is_order_sensitive() {
        let mut a = HandshakeHashes::new();
        a.update(b"client-hello");
        a.update(b"server-hello");
        let mut b = HandshakeHashes::new();
        b.update(b"server-hello");
        b.update(b"client-hello");
        assert_ne!(
            a.digest(TranscriptHash::Sha256),
            b.digest(TranscriptHash::Sha256)
        );
    }

    #[test]
    fn digest_does_not_consume_running_state() {
        let mut h = HandshakeHashes::new();
        h.update(b"first");
        let snapshot_a = h.digest(TranscriptHash::Sha256);
        let snapshot_b = h.digest(TranscriptHash::Sha256);
        assert_eq!(snapshot_a, snapshot_b);
        h.update(b"second");
        let snapshot_c = h.digest(TranscriptHash::Sha256);
        assert_ne!(snapshot_a, snapshot_c);
    }

    #[test]
    fn message_hash_replacement_is_deterministic_and_order_preserving() {
        let mut a = HandshakeHashes::new();
        a.update(b"client-hello-1");
        a.replace_first_client_hello_with_message_hash(crate::protocol::HashAlgorithm::Sha256);
        a.update(b"hello-retry-request");
        a.update(b"client-hello-2");

        let mut b = HandshakeHashes::new();
        b.update(b"client-hello-1");
        b.replace_first_client_hello_with_message_hash(crate::protocol::HashAlgorithm::Sha256);
        b.update(b"hello-retry-request");
        b.update(b"client-hello-2");

        assert_eq!(
            a.digest(TranscriptHash::Intrinsic(crate::protocol::HashAlgorithm::Sha256)),
            b.digest(TranscriptHash::Intrinsic(crate::protocol::HashAlgorithm::Sha256))
        );

        let mut plain = HandshakeHashes::new();
        plain.update(b"client-hello-1");
        plain.update(b"hello-retry-request");
        plain.update(b"client-hello-2");
        assert_ne!(
            a.digest(TranscriptHash::Intrinsic(crate::protocol::HashAlgorithm::Sha256)),
            plain.digest(TranscriptHash::Intrinsic(crate::protocol::HashAlgorithm::Sha256))
        );
    }

    #[test]
    fn legacy_seed_is_36_bytes() {
        let mut h = HandshakeHashes::new();
        h.update(b"anything");
        assert_eq!(h.legacy_seed().len(), 36);
    }
}
