//! Readiness nonces
//!
//! The coordinator issues a fresh random nonce whenever a session becomes
//! active. The node must echo it in its ready message; the nonce is consumed
//! on the first attempt, so a captured ready message cannot be replayed.
//!
//! Nonces come from the operating system CSPRNG (`rand_core::OsRng`) and are
//! compared in constant time. Every copy is wiped when it is dropped.

use rand_core::{OsRng, RngCore};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const NONCE_LEN: usize = 32;

/// A single-use readiness nonce
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Nonce([u8; NONCE_LEN]);

impl Nonce {
    /// Draw a fresh nonce from the OS RNG
    pub fn generate() -> Self {
        let mut bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; NONCE_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; NONCE_LEN] {
        &self.0
    }

    /// Constant-time comparison against an echoed nonce
    pub fn matches(&self, echoed: &Nonce) -> bool {
        self.0.ct_eq(&echoed.0).into()
    }
}

impl core::fmt::Debug for Nonce {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Nonce({}…)", hex::encode(&self.0[..4]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_nonces_differ() {
        let a = Nonce::generate();
        let b = Nonce::generate();
        assert!(!a.matches(&b));
        assert_ne!(a.as_bytes(), &[0u8; NONCE_LEN]);
    }

    #[test]
    fn test_matches_echo() {
        let issued = Nonce::generate();
        let echoed = Nonce::from_bytes(*issued.as_bytes());
        assert!(issued.matches(&echoed));

        let mut flipped = *issued.as_bytes();
        flipped[NONCE_LEN - 1] ^= 0x01;
        assert!(!issued.matches(&Nonce::from_bytes(flipped)));
    }

    #[test]
    fn test_nonce_is_wiped() {
        fn wiped_on_drop<T: ZeroizeOnDrop>() {}
        wiped_on_drop::<Nonce>();

        let mut nonce = Nonce::generate();
        let copy = nonce.clone();
        nonce.zeroize();
        assert_eq!(nonce.as_bytes(), &[0u8; NONCE_LEN]);
        assert_ne!(copy.as_bytes(), &[0u8; NONCE_LEN]);
    }
}
