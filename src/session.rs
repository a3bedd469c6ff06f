//! Session establishment
//!
//! The key agreement itself (an authenticated key exchange, a pre-shared
//! secret, ...) happens outside this crate. The establisher receives the
//! resulting key material through the [`KeyAgreement`] capability, which
//! validates possession and turns it into a [`SessionKey`].
//!
//! Session keys are zeroized when dropped and never appear in `Debug` output.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{AuthError, Result};

/// Shortest accepted key material (bytes)
pub const MIN_KEY_LEN: usize = 16;

/// Longest accepted key material (bytes)
pub const MAX_KEY_LEN: usize = 64;

/// Opaque session secret
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey(Vec<u8>);

impl SessionKey {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl core::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "SessionKey(<{} bytes redacted>)", self.0.len())
    }
}

/// Turns externally agreed key material into a session key
pub trait KeyAgreement: Send + Sync {
    fn accept(&self, node_id: &str, key_material: &[u8]) -> Result<SessionKey>;
}

/// Accepts key material that was shared out of band, after a length check
#[derive(Debug, Default, Clone, Copy)]
pub struct PreSharedKey;

impl KeyAgreement for PreSharedKey {
    fn accept(&self, node_id: &str, key_material: &[u8]) -> Result<SessionKey> {
        if !(MIN_KEY_LEN..=MAX_KEY_LEN).contains(&key_material.len()) {
            return Err(AuthError::InvalidKeyMaterial {
                node_id: node_id.to_owned(),
                reason: format!(
                    "expected {MIN_KEY_LEN}..={MAX_KEY_LEN} bytes, got {}",
                    key_material.len()
                ),
            });
        }
        // All-zero material means the exchange never ran
        if key_material.iter().all(|&b| b == 0) {
            return Err(AuthError::InvalidKeyMaterial {
                node_id: node_id.to_owned(),
                reason: "key material is all zeros".into(),
            });
        }
        Ok(SessionKey::new(key_material.to_vec()))
    }
}

/// An active session with a verified node
#[derive(Debug)]
pub struct Session {
    node_id: String,
    session_key: SessionKey,
    established_at: f64,
}

impl Session {
    pub fn new(node_id: impl Into<String>, session_key: SessionKey, established_at: f64) -> Self {
        Self {
            node_id: node_id.into(),
            session_key,
            established_at,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn session_key(&self) -> &SessionKey {
        &self.session_key
    }

    pub fn established_at(&self) -> f64 {
        self.established_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_pre_shared_key_accepts_valid_material() {
        let key = PreSharedKey.accept("GRN-001", &[0x5a; 32]).unwrap();
        assert_eq!(key.as_bytes(), &[0x5a; 32]);
    }

    #[test]
    fn test_pre_shared_key_rejects_bad_lengths() {
        for len in [0, MIN_KEY_LEN - 1, MAX_KEY_LEN + 1] {
            let err = PreSharedKey.accept("GRN-001", &vec![1; len]).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidKeyMaterial);
        }
    }

    #[test]
    fn test_pre_shared_key_rejects_zero_material() {
        let err = PreSharedKey.accept("GRN-001", &[0; 32]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidKeyMaterial);
    }

    #[test]
    fn test_debug_redacts_key() {
        let key = SessionKey::new(vec![0xde, 0xad, 0xbe, 0xef]);
        let rendered = format!("{key:?}");
        assert!(!rendered.contains("dead"));
        assert!(!rendered.contains("222"));
        assert!(rendered.contains("4 bytes"));
    }
}
