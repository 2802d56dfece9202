//! ML-KEM adapter for the hybrid `X25519MlKem768` group (§4.12, §4.8). Only
//! the post-quantum half lives here; `crate::kex` concatenates this with
//! the classical X25519 Diffie-Hellman share.

use crate::error::TlsError;
use ml_kem::kem::{Decapsulate, Encapsulate};
use ml_kem::{EncodedSizeUser, KemCore, MlKem768};
use rand_core::OsRng;

/// One half of a hybrid key exchange: the post-quantum KEM. Named after
/// the scheme rather than a generic "Kem768" so the registry in
/// `crate::kex` reads the same way `protocol::NamedGroup` does.
pub trait KemAlgorithm: Send + Sync {
    fn name(&self) -> &'static str;

    /// Generate an ephemeral keypair, returning (encapsulation key bytes,
    /// decapsulation key bytes).
    fn generate(&self) -> (Vec<u8>, Vec<u8>);

    /// Encapsulate against a peer's encapsulation key, returning
    /// (ciphertext, shared secret).
    fn encapsulate(&self, ek_bytes: &[u8]) -> Result<(Vec<u8>, Vec<u8>), TlsError>;

    /// Decapsulate a ciphertext with our own decapsulation key, returning
    /// the shared secret.
    fn decapsulate(&self, dk_bytes: &[u8], ct_bytes: &[u8]) -> Result<Vec<u8>, TlsError>;
}

pub struct MlKem768Algorithm;

impl KemAlgorithm for MlKem768Algorithm {
    fn name(&self) -> &'static str {
        "ML-KEM-768"
    }

    fn generate(&self) -> (Vec<u8>, Vec<u8>) {
        let (dk, ek) = MlKem768::generate(&mut OsRng);
        (ek.as_bytes().to_vec(), dk.as_bytes().to_vec())
    }

    fn encapsulate(&self, ek_bytes: &[u8]) -> Result<(Vec<u8>, Vec<u8>), TlsError> {
        let ek = <MlKem768 as KemCore>::EncapsulationKey::from_bytes(
            ek_bytes
                .try_into()
                .map_err(|_| TlsError::Decode("ml-kem-768 encapsulation key: bad length".into()))?,
        );
        let (ct, ss) = ek
            .encapsulate(&mut OsRng)
            .map_err(|_| TlsError::Internal("ml-kem-768 encapsulate failed".into()))?;
        Ok((ct.to_vec(), ss.to_vec()))
    }

    fn decapsulate(&self, dk_bytes: &[u8], ct_bytes: &[u8]) -> Result<Vec<u8>, TlsError> {
        let dk = <MlKem768 as KemCore>::DecapsulationKey::from_bytes(
            dk_bytes
                .try_into()
                .map_err(|_| TlsError::Decode("ml-kem-768 decapsulation key: bad length".into()))?,
        );
        let ct = ct_bytes
            .try_into()
            .map_err(|_| TlsError::Decode("ml-kem-768 ciphertext: bad length".into()))?;
        let ss = dk
            .decapsulate(ct)
            .map_err(|_| TlsError::Internal("ml-kem-768 decapsulate failed".into()))?;
        Ok(ss.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encapsulate_decapsulate_agree() {
        let kem = MlKem768Algorithm;
        let (ek, dk) = kem.generate();
        let (ct, ss_sender) = kem.encapsulate(&ek).unwrap();
        let ss_receiver = kem.decapsulate(&dk, &ct).unwrap();
        assert_eq!(ss_sender, ss_receiver);
    }
}
