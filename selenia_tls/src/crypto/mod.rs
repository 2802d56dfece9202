//! Cryptographic primitives, all sourced from `RustCrypto`-family crates
//! rather than hand-rolled (§4.12). This module's job is to adapt those
//! crates to the small trait surface the rest of the engine negotiates
//! against -- `AeadAlgorithm`, `DigestAlgorithm`, `SignatureVerifier`,
//! `KemAlgorithm` -- so that `record::layer`, `key_schedule`, and
//! `handshake` never import `aes_gcm`/`rsa`/`p256`/etc. directly.

pub mod aead;
pub mod cbc;
pub mod hash;
pub mod kem;
pub mod memfd_secret;
pub mod rand;
pub mod sig;

pub use aead::AeadAlgorithm;
pub use hash::DigestAlgorithm;
pub use kem::KemAlgorithm;
pub use sig::SignatureVerifier;
