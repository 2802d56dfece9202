//! OS entropy abstraction.
//!
//! `fill_random`/`random_u64` keep the names the rest of this engine already
//! calls, but the backing implementation is `rand_core`'s `OsRng` rather
//! than a hand-rolled `getrandom(2)`/`/dev/urandom` shim -- there's no
//! reason to maintain our own syscall wrapper when the ecosystem already
//! has an audited one.

use rand_core::{OsRng, RngCore};

/// Fill a slice with cryptographically secure random bytes.
pub fn fill_random(buf: &mut [u8]) {
    OsRng.fill_bytes(buf);
}

/// Return a random u64.
pub fn random_u64() -> u64 {
    OsRng.next_u64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_random_changes_buffer() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        fill_random(&mut a);
        fill_random(&mut b);
        assert_ne!(a, b);
    }
}
