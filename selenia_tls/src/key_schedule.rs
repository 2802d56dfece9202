//! KeySchedule (§4.7): derives master secrets and key material for every
//! supported version. TLS ≤1.1 uses the dual MD5/SHA1 PRF; TLS 1.2 uses a
//! single-hash PRF; TLS 1.3 uses the HKDF-Extract/Expand label tree from
//! RFC 8446 §7.1. `calc_key` is the facade the handshake FSM calls through
//! so it never has to branch on version itself.

use crate::crypto::hash::DigestAlgorithm;
use crate::protocol::{HashAlgorithm, ProtocolVersion};
use hkdf::Hkdf;
use sha2::{Sha256, Sha384};

/// Legacy (TLS 1.0/1.1) PRF: RFC 2246 §5. Splits the secret in half
/// (overlapping by one byte if odd), runs P_MD5 over one half and P_SHA-1
/// over the other, XORs the results.
pub fn prf_legacy(secret: &[u8], label: &[u8], seed: &[u8], out_len: usize) -> Vec<u8> {
    let half = (secret.len() + 1) / 2;
    let s1 = &secret[0..half];
    let s2 = &secret[secret.len() - half..];

    let mut label_seed = label.to_vec();
    label_seed.extend_from_slice(seed);

    let md5 = crate::crypto::hash::Md5;
    let sha1 = crate::crypto::hash::Sha1;
    let p_md5 = p_hash(&md5, s1, &label_seed, out_len);
    let p_sha1 = p_hash(&sha1, s2, &label_seed, out_len);

    p_md5.iter().zip(p_sha1.iter()).map(|(a, b)| a ^ b).collect()
}

/// TLS 1.2 single-hash PRF: RFC 5246 §5, `P_hash(secret, label + seed)`.
pub fn prf_tls12(hash: HashAlgorithm, secret: &[u8], label: &[u8], seed: &[u8], out_len: usize) -> Vec<u8> {
    let mut label_seed = label.to_vec();
    label_seed.extend_from_slice(seed);
    let adapter = crate::crypto::hash::for_modern_hash(hash);
    p_hash(adapter.as_ref(), secret, &label_seed, out_len)
}

fn p_hash(hash: &dyn DigestAlgorithm, secret: &[u8], label_seed: &[u8], out_len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(out_len);
    let mut a = hash.hmac(secret, label_seed);
    while out.len() < out_len {
        let mut input = a.clone();
        input.extend_from_slice(label_seed);
        out.extend_from_slice(&hash.hmac(secret, &input));
        a = hash.hmac(secret, &a);
    }
    out.truncate(out_len);
    out
}

/// Derive the master secret (RFC 5246 §8.1) or, with RFC 7627 Extended
/// Master Secret, seed the PRF with the session hash instead of the two
/// randoms.
pub fn master_secret(
    version: ProtocolVersion,
    hash: HashAlgorithm,
    pre_master_secret: &[u8],
    client_random: &[u8; 32],
    server_random: &[u8; 32],
    extended: Option<&[u8]>,
) -> Vec<u8> {
    let seed = match extended {
        Some(session_hash) => session_hash.to_vec(),
        None => {
            let mut s = client_random.to_vec();
            s.extend_from_slice(server_random);
            s
        }
    };
    let label: &[u8] = if extended.is_some() {
        b"extended master secret"
    } else {
        b"master secret"
    };
    if version <= ProtocolVersion::TLS1_1 {
        prf_legacy(pre_master_secret, label, &seed, 48)
    } else {
        prf_tls12(hash, pre_master_secret, label, &seed, 48)
    }
}

/// Expand a master secret into the version-appropriate key block, sized by
/// the caller (`RecordLayer::KeyBlockLayout::partition` slices it
/// afterwards).
pub fn key_block(
    version: ProtocolVersion,
    hash: HashAlgorithm,
    master_secret: &[u8],
    server_random: &[u8; 32],
    client_random: &[u8; 32],
    len: usize,
) -> Vec<u8> {
    let mut seed = server_random.to_vec();
    seed.extend_from_slice(client_random);
    if version <= ProtocolVersion::TLS1_1 {
        prf_legacy(master_secret, b"key expansion", &seed, len)
    } else {
        prf_tls12(hash, master_secret, b"key expansion", &seed, len)
    }
}

/// Derive the client/server `CipherState` pair for a TLS ≤1.2 suite once
/// the master secret is known (RFC 5246 §6.3's key_block, sliced by
/// `KeyBlockLayout::partition`). Returns `(client_state, server_state)`;
/// the caller picks which direction is write vs read based on its role.
pub fn legacy_cipher_states(
    suite: crate::protocol::CipherSuite,
    version: ProtocolVersion,
    master_secret: &[u8],
    client_random: &[u8; 32],
    server_random: &[u8; 32],
    encrypt_then_mac: bool,
) -> (crate::record::cipher_state::CipherState, crate::record::cipher_state::CipherState) {
    use crate::record::cipher_state::{AeadRecipe, CipherState, MacMode};
    use crate::record::layer::{recipe_for, KeyBlockLayout};

    let (key_len, mac_len, iv_len, is_aead, recipe) = if suite.bulk.is_aead() {
        let algo = crate::crypto::aead::for_bulk(suite.bulk);
        let recipe = recipe_for(suite.bulk, version);
        let iv_len = match recipe {
            AeadRecipe::ExplicitNonceTls12 => 4,
            AeadRecipe::XorNonce => algo.nonce_len(),
        };
        (algo.key_len(), 0usize, iv_len, true, recipe)
    } else {
        let cbc_algo = crate::crypto::cbc::for_bulk(suite.bulk);
        let mac_algo = crate::crypto::cbc::mac_digest_for_bulk(suite.bulk);
        // TLS 1.1+ CBC suites carry a fresh random IV per record instead of
        // one drawn from the key block; only TLS 1.0's chained IV needs to
        // come from here.
        let iv_len = if version <= ProtocolVersion::TLS1_0 { cbc_algo.block_len() } else { 0 };
        (cbc_algo.key_len(), mac_algo.output_len(), iv_len, false, AeadRecipe::ExplicitNonceTls12)
    };

    let block_len = 2 * mac_len + 2 * key_len + 2 * iv_len;
    let raw = key_block(version, suite.hash, master_secret, server_random, client_random, block_len);
    let layout = KeyBlockLayout::partition(&raw, mac_len, key_len, iv_len);

    if is_aead {
        let client_state = CipherState::aead(version, suite.bulk, layout.client_key, layout.client_iv, recipe);
        let server_state = CipherState::aead(version, suite.bulk, layout.server_key, layout.server_iv, recipe);
        (client_state, server_state)
    } else {
        let mac_mode = if encrypt_then_mac { MacMode::EncryptThenMac } else { MacMode::MacThenEncrypt };
        let client_state = CipherState::cbc(version, suite.bulk, mac_mode, layout.client_key, layout.client_mac, layout.client_iv);
        let server_state = CipherState::cbc(version, suite.bulk, mac_mode, layout.server_key, layout.server_mac, layout.server_iv);
        (client_state, server_state)
    }
}

/// RFC 5246 §7.4.9 Finished `verify_data`: 12 bytes out of the legacy dual
/// PRF (TLS ≤1.1) or the single-hash PRF (TLS 1.2), seeded by the
/// transcript hash appropriate to each.
pub fn legacy_finished_verify_data(
    version: ProtocolVersion,
    suite_hash: HashAlgorithm,
    master_secret: &[u8],
    label: &[u8],
    hashes: &crate::transcript::HandshakeHashes,
) -> Vec<u8> {
    if version <= ProtocolVersion::TLS1_1 {
        prf_legacy(master_secret, label, &hashes.legacy_seed(), 12)
    } else {
        let transcript = hashes.digest(crate::transcript::TranscriptHash::Intrinsic(suite_hash));
        prf_tls12(suite_hash, master_secret, label, &transcript, 12)
    }
}

/// TLS 1.3 HKDF-Expand-Label, RFC 8446 §7.1: builds the `HkdfLabel` struct
/// (length, "tls13 " + label, context) and runs HKDF-Expand against it.
fn hkdf_expand_label(hash: HashAlgorithm, secret: &[u8], label: &str, context: &[u8], len: usize) -> Vec<u8> {
    let mut hkdf_label = Vec::new();
    hkdf_label.extend_from_slice(&(len as u16).to_be_bytes());
    let full_label = format!("tls13 {label}");
    hkdf_label.push(full_label.len() as u8);
    hkdf_label.extend_from_slice(full_label.as_bytes());
    hkdf_label.push(context.len() as u8);
    hkdf_label.extend_from_slice(context);

    let mut out = vec![0u8; len];
    match hash {
        HashAlgorithm::Sha256 => {
            let hk = Hkdf::<Sha256>::from_prk(secret).expect("PRK length matches SHA-256 output");
            hk.expand(&hkdf_label, &mut out).expect("HKDF expand length in range");
        }
        HashAlgorithm::Sha384 => {
            let hk = Hkdf::<Sha384>::from_prk(secret).expect("PRK length matches SHA-384 output");
            hk.expand(&hkdf_label, &mut out).expect("HKDF expand length in range");
        }
        HashAlgorithm::LegacyMd5Sha1 => unreachable!("TLS 1.3 never selects the legacy PRF hash"),
    }
    out
}

fn hkdf_extract(hash: HashAlgorithm, salt: &[u8], ikm: &[u8]) -> Vec<u8> {
    match hash {
        HashAlgorithm::Sha256 => {
            let (prk, _) = Hkdf::<Sha256>::extract(Some(salt), ikm);
            prk.to_vec()
        }
        HashAlgorithm::Sha384 => {
            let (prk, _) = Hkdf::<Sha384>::extract(Some(salt), ikm);
            prk.to_vec()
        }
        HashAlgorithm::LegacyMd5Sha1 => unreachable!("TLS 1.3 never selects the legacy PRF hash"),
    }
}

/// RFC 8446 §7.1 `Derive-Secret(Secret, Label, Messages) =
/// HKDF-Expand-Label(Secret, Label, Transcript-Hash(Messages), Hash.length)`.
pub fn derive_secret(hash: HashAlgorithm, secret: &[u8], label: &str, transcript_hash: &[u8]) -> Vec<u8> {
    hkdf_expand_label(hash, secret, label, transcript_hash, hash.output_len())
}

/// Every named point in the TLS 1.3 secret tree (RFC 8446 §7.1 figure),
/// pre-derived once the PSK (or all-zeros, for a fresh non-PSK handshake)
/// and the DH shared secret are known.
pub struct Tls13Secrets {
    pub hash: HashAlgorithm,
    pub early_secret: Vec<u8>,
    pub handshake_secret: Vec<u8>,
    pub master_secret: Vec<u8>,
}

impl Tls13Secrets {
    /// `psk` is the resumption PSK, or `None` for a fresh handshake (which
    /// uses an all-zeros key of the hash's length, per RFC 8446 §7.1).
    pub fn new(hash: HashAlgorithm, psk: Option<&[u8]>, shared_secret: &[u8]) -> Tls13Secrets {
        let zero_ikm = vec![0u8; hash.output_len()];
        let psk_ikm = psk.unwrap_or(&zero_ikm);
        let early_secret = hkdf_extract(hash, &[0u8; 1], psk_ikm);

        let empty_transcript_hash = crate::crypto::hash::for_modern_hash(hash).digest(&[]);
        let derived_salt = derive_secret(hash, &early_secret, "derived", &empty_transcript_hash);
        let handshake_secret = hkdf_extract(hash, &derived_salt, shared_secret);

        let derived_salt2 = derive_secret(hash, &handshake_secret, "derived", &empty_transcript_hash);
        let zero_ikm2 = vec![0u8; hash.output_len()];
        let master_secret = hkdf_extract(hash, &derived_salt2, &zero_ikm2);

        Tls13Secrets {
            hash,
            early_secret,
            handshake_secret,
            master_secret,
        }
    }

    pub fn client_handshake_traffic_secret(&self, transcript_hash: &[u8]) -> Vec<u8> {
        derive_secret(self.hash, &self.handshake_secret, "c hs traffic", transcript_hash)
    }

    pub fn server_handshake_traffic_secret(&self, transcript_hash: &[u8]) -> Vec<u8> {
        derive_secret(self.hash, &self.handshake_secret, "s hs traffic", transcript_hash)
    }

    pub fn client_application_traffic_secret(&self, transcript_hash: &[u8]) -> Vec<u8> {
        derive_secret(self.hash, &self.master_secret, "c ap traffic", transcript_hash)
    }

    pub fn server_application_traffic_secret(&self, transcript_hash: &[u8]) -> Vec<u8> {
        derive_secret(self.hash, &self.master_secret, "s ap traffic", transcript_hash)
    }

    pub fn exporter_master_secret(&self, transcript_hash: &[u8]) -> Vec<u8> {
        derive_secret(self.hash, &self.master_secret, "exp master", transcript_hash)
    }

    pub fn resumption_master_secret(&self, transcript_hash: &[u8]) -> Vec<u8> {
        derive_secret(self.hash, &self.master_secret, "res master", transcript_hash)
    }

    pub fn client_early_traffic_secret(&self, transcript_hash: &[u8]) -> Vec<u8> {
        derive_secret(self.hash, &self.early_secret, "c e traffic", transcript_hash)
    }

    /// `finished_key = HKDF-Expand-Label(BaseKey, "finished", "", Hash.length)`.
    pub fn finished_key(&self, base_key: &[u8]) -> Vec<u8> {
        hkdf_expand_label(self.hash, base_key, "finished", &[], self.hash.output_len())
    }

    /// Record-layer `key`/`iv` derived from a traffic secret.
    pub fn traffic_key(&self, traffic_secret: &[u8], key_len: usize) -> Vec<u8> {
        hkdf_expand_label(self.hash, traffic_secret, "key", &[], key_len)
    }

    pub fn traffic_iv(&self, traffic_secret: &[u8], iv_len: usize) -> Vec<u8> {
        hkdf_expand_label(self.hash, traffic_secret, "iv", &[], iv_len)
    }

    /// `key_update` rekey: `traffic_secret' = HKDF-Expand-Label(traffic_secret, "traffic upd", "", Hash.length)`.
    pub fn update_traffic_secret(&self, traffic_secret: &[u8]) -> Vec<u8> {
        hkdf_expand_label(self.hash, traffic_secret, "traffic upd", &[], self.hash.output_len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls12_prf_known_length() {
        let out = prf_tls12(HashAlgorithm::Sha256, b"secret", b"test label", b"seed", 32);
        assert_eq!(out.len(), 32);
    }

    #[test]
    fn legacy_prf_xor_produces_deterministic_output() {
        let a = prf_legacy(b"0123456789abcdef", b"master secret", b"seed-bytes", 48);
        let b = prf_legacy(b"0123456789abcdef", b"master secret", b"seed-bytes", 48);
        assert_eq!(a, b);
        assert_eq!(a.len(), 48);
    }

    #[test]
    fn tls13_secret_tree_labels_are_distinct() {
        let secrets = Tls13Secrets::new(HashAlgorithm::Sha256, None, &[0x42; 32]);
        let th = [0x11u8; 32];
        let chs = secrets.client_handshake_traffic_secret(&th);
        let shs = secrets.server_handshake_traffic_secret(&th);
        let cap = secrets.client_application_traffic_secret(&th);
        assert_ne!(chs, shs);
        assert_ne!(chs, cap);
    }

    #[test]
    fn key_update_changes_the_secret() {
        let secrets = Tls13Secrets::new(HashAlgorithm::Sha256, None, &[0x99; 32]);
        let th = [0x22u8; 32];
        let traffic = secrets.client_application_traffic_secret(&th);
        let updated = secrets.update_traffic_secret(&traffic);
        assert_ne!(traffic, updated);
        assert_eq!(updated.len(), 32);
    }
}
