//! Signature scheme adapters (§4.12). `CertificateVerify` validation and
//! (on the server side that signs its own key exchange) generation both go
//! through `SignatureVerifier`, keyed by the wire `protocol::SignatureScheme`
//! id.

use crate::error::TlsError;
use crate::protocol::SignatureScheme as SchemeId;
use ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature as P256Signature, SigningKey as P256SigningKey, VerifyingKey as P256VerifyingKey};
use p384::ecdsa::{Signature as P384Signature, SigningKey as P384SigningKey, VerifyingKey as P384VerifyingKey};
use rsa::pkcs1v15::{SigningKey as RsaPkcs1SigningKey, VerifyingKey as RsaPkcs1VerifyingKey};
use rsa::pss::VerifyingKey as RsaPssVerifyingKey;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

/// Verifies (and, where the private key is available, produces) signatures
/// for exactly one `SignatureScheme` codepoint.
pub trait SignatureVerifier: Send + Sync {
    fn scheme_id(&self) -> SchemeId;

    /// Verify `signature` over `message` under the peer's raw public-key
    /// bytes (SPKI-decoded by the caller; this layer only knows the curve
    /// or modulus shape, not certificate parsing).
    fn verify(&self, pubkey: &[u8], message: &[u8], signature: &[u8]) -> Result<(), TlsError>;
}

pub struct RsaPkcs1Sha256;

impl SignatureVerifier for RsaPkcs1Sha256 {
    fn scheme_id(&self) -> SchemeId {
        SchemeId::RsaPkcs1Sha256
    }

    fn verify(&self, pubkey: &[u8], message: &[u8], signature: &[u8]) -> Result<(), TlsError> {
        let pk = RsaPublicKey::try_from(
            rsa::pkcs1::DecodeRsaPublicKey::from_pkcs1_der(pubkey)
                .map_err(|e| TlsError::Decode(format!("rsa public key: {e}")))?,
        )
        .map_err(|e| TlsError::Decode(format!("rsa public key: {e}")))?;
        let verifying = RsaPkcs1VerifyingKey::<Sha256>::new(pk);
        let sig = rsa::pkcs1v15::Signature::try_from(signature)
            .map_err(|e| TlsError::Decode(format!("rsa signature: {e}")))?;
        verifying
            .verify(message, &sig)
            .map_err(|_| TlsError::Decode("rsa-pkcs1-sha256 verification failed".into()))
    }
}

pub struct RsaPssSha256;

impl SignatureVerifier for RsaPssSha256 {
    fn scheme_id(&self) -> SchemeId {
        SchemeId::RsaPssRsaeSha256
    }

    fn verify(&self, pubkey: &[u8], message: &[u8], signature: &[u8]) -> Result<(), TlsError> {
        let pk = RsaPublicKey::try_from(
            rsa::pkcs1::DecodeRsaPublicKey::from_pkcs1_der(pubkey)
                .map_err(|e| TlsError::Decode(format!("rsa public key: {e}")))?,
        )
        .map_err(|e| TlsError::Decode(format!("rsa public key: {e}")))?;
        let verifying = RsaPssVerifyingKey::<Sha256>::new(pk);
        let sig = rsa::pss::Signature::try_from(signature)
            .map_err(|e| TlsError::Decode(format!("rsa signature: {e}")))?;
        verifying
            .verify(message, &sig)
            .map_err(|_| TlsError::Decode("rsa-pss-sha256 verification failed".into()))
    }
}

pub struct EcdsaSecp256r1Sha256;

impl SignatureVerifier for EcdsaSecp256r1Sha256 {
    fn scheme_id(&self) -> SchemeId {
        SchemeId::EcdsaSecp256r1Sha256
    }

    fn verify(&self, pubkey: &[u8], message: &[u8], signature: &[u8]) -> Result<(), TlsError> {
        let verifying = P256VerifyingKey::from_sec1_bytes(pubkey)
            .map_err(|e| TlsError::Decode(format!("p256 public key: {e}")))?;
        let sig = P256Signature::from_der(signature)
            .map_err(|e| TlsError::Decode(format!("p256 signature: {e}")))?;
        verifying
            .verify(message, &sig)
            .map_err(|_| TlsError::Decode("ecdsa-p256-sha256 verification failed".into()))
    }
}

pub struct EcdsaSecp384r1Sha384;

impl SignatureVerifier for EcdsaSecp384r1Sha384 {
    fn scheme_id(&self) -> SchemeId {
        SchemeId::EcdsaSecp384r1Sha384
    }

    fn verify(&self, pubkey: &[u8], message: &[u8], signature: &[u8]) -> Result<(), TlsError> {
        let verifying = P384VerifyingKey::from_sec1_bytes(pubkey)
            .map_err(|e| TlsError::Decode(format!("p384 public key: {e}")))?;
        let sig = P384Signature::from_der(signature)
            .map_err(|e| TlsError::Decode(format!("p384 signature: {e}")))?;
        verifying
            .verify(message, &sig)
            .map_err(|_| TlsError::Decode("ecdsa-p384-sha384 verification failed".into()))
    }
}

pub struct Ed25519;

impl SignatureVerifier for Ed25519 {
    fn scheme_id(&self) -> SchemeId {
        SchemeId::Ed25519
    }

    fn verify(&self, pubkey: &[u8], message: &[u8], signature: &[u8]) -> Result<(), TlsError> {
        let key_bytes: [u8; 32] = pubkey
            .try_into()
            .map_err(|_| TlsError::Decode("ed25519 public key must be 32 bytes".into()))?;
        let verifying = ed25519_dalek::VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| TlsError::Decode(format!("ed25519 public key: {e}")))?;
        let sig_bytes: [u8; 64] = signature
            .try_into()
            .map_err(|_| TlsError::Decode("ed25519 signature must be 64 bytes".into()))?;
        let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);
        verifying
            .verify_strict(message, &sig)
            .map_err(|_| TlsError::Decode("ed25519 verification failed".into()))
    }
}

/// Look up the verifier for a negotiated scheme id. Returns `None` for
/// schemes this registry knows about (in `protocol::SignatureScheme`) but
/// has no crate-backed adapter for -- see the Ed448/RSA-PSS-SHA512 open
/// question in DESIGN.md.
pub fn for_scheme(scheme: SchemeId) -> Option<Box<dyn SignatureVerifier>> {
    use SchemeId::*;
    Some(match scheme {
        RsaPkcs1Sha256 => Box::new(RsaPkcs1Sha256),
        RsaPssRsaeSha256 => Box::new(RsaPssSha256),
        EcdsaSecp256r1Sha256 => Box::new(EcdsaSecp256r1Sha256),
        EcdsaSecp384r1Sha384 => Box::new(EcdsaSecp384r1Sha384),
        Ed25519 => Box::new(self::Ed25519),
    })
}

/// Sign with an in-process RSA private key using PKCS#1v1.5/SHA-256. Used
/// by the server side of `CertificateVerify` in test harnesses and by
/// embedders that hold the private key in-process rather than behind an
/// HSM boundary.
pub fn sign_rsa_pkcs1_sha256(key: &RsaPrivateKey, message: &[u8]) -> Vec<u8> {
    let signing = RsaPkcs1SigningKey::<Sha256>::new(key.clone());
    signing.sign(message).to_vec()
}

/// Sign with an in-process P-256 private key.
pub fn sign_ecdsa_p256_sha256(key: &P256SigningKey, message: &[u8]) -> Vec<u8> {
    let sig: P256Signature = key.sign(message);
    sig.to_der().as_bytes().to_vec()
}
