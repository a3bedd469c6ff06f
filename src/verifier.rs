//! Beacon signature verification
//!
//! A beacon proves that its sender holds the private key of a registered
//! node identity. The signed payload is `"node_id:timestamp"`, using the
//! timestamp text exactly as the node transmitted it.
//!
//! Signatures are RSA-PSS over SHA-256 with MGF1-SHA-256 and the maximum
//! salt length. The salt is random per signing, so a signature is never a
//! deterministic function of the message.
//!
//! Every beacon goes through the same steps whatever it turns out to be:
//! the freshness check, the claimed key comparison and the PSS check all
//! run before an error is chosen. A beacon for an unregistered node is
//! checked against the key it claims. Rejection time therefore does not
//! depend on the rejection reason.

use rsa::pss::{Signature, VerifyingKey};
use rsa::signature::Verifier;
use rsa::traits::PublicKeyParts;
use rsa::RsaPublicKey;
use sha2::{Digest, Sha256};

use crate::error::{AuthError, Result};
use crate::identity::NodeIdentity;
use crate::message::Beacon;

/// Freshness constraints for one verification
#[derive(Debug, Clone, Copy)]
pub struct Freshness {
    /// Current time (seconds since epoch)
    pub now: f64,
    /// Maximum |now - timestamp|
    pub window: f64,
    /// Timestamp of the last beacon accepted from this node, if any
    pub last_accepted: Option<f64>,
}

/// Maximum PSS salt length for `key`
///
/// Keys generated by this crate have a bit length that is a multiple of 8,
/// so the encoded message is exactly the modulus size.
pub fn pss_salt_len(key: &RsaPublicKey) -> usize {
    key.size()
        .saturating_sub(<Sha256 as Digest>::output_size() + 2)
}

/// Verify a beacon against the registered identity
///
/// `identity` is `None` when the beacon names an unregistered node. Errors
/// are reported as `UnknownNode`, then `StaleBeacon`, then
/// `InvalidSignature`.
pub fn verify(
    beacon: &Beacon,
    identity: Option<&NodeIdentity>,
    freshness: Freshness,
) -> Result<()> {
    let key = identity.map_or(beacon.claimed_key(), NodeIdentity::public_key);
    let key_matches = beacon.claimed_key() == key;
    let signature_ok = signature_valid(key, beacon);
    let fresh = is_fresh(beacon, freshness);

    let node_id = || beacon.node_id().to_owned();
    if identity.is_none() {
        Err(AuthError::UnknownNode { node_id: node_id() })
    } else if !fresh {
        Err(AuthError::StaleBeacon {
            node_id: node_id(),
            timestamp: beacon.timestamp(),
            now: freshness.now,
        })
    } else if key_matches & signature_ok {
        Ok(())
    } else {
        Err(AuthError::InvalidSignature { node_id: node_id() })
    }
}

/// Check the signature alone, without freshness
pub fn verify_signature(beacon: &Beacon, identity: &NodeIdentity) -> Result<()> {
    let registered = identity.public_key();
    let key_matches = beacon.claimed_key() == registered;
    if key_matches & signature_valid(registered, beacon) {
        Ok(())
    } else {
        Err(AuthError::InvalidSignature {
            node_id: beacon.node_id().to_owned(),
        })
    }
}

fn is_fresh(beacon: &Beacon, freshness: Freshness) -> bool {
    let timestamp = beacon.timestamp();
    let inside_window = (freshness.now - timestamp).abs() <= freshness.window;
    let advances = freshness.last_accepted.map_or(true, |last| timestamp > last);
    inside_window & advances
}

fn signature_valid(key: &RsaPublicKey, beacon: &Beacon) -> bool {
    let Ok(signature) = Signature::try_from(beacon.signature()) else {
        return false;
    };
    VerifyingKey::<Sha256>::new_with_salt_len(key.clone(), pss_salt_len(key))
        .verify(&beacon.signed_message(), &signature)
        .is_ok()
}
