//! Ground Reception Node simulator
//!
//! The node side of the protocol, for simulation and tests:
//! - Announce identity with a signed beacon (`"node_id:timestamp"`)
//! - Store the session key once the exchange has produced one
//! - Echo the coordinator's readiness nonce
//! - Send heartbeats
//!
//! Beacons are signed with RSA-PSS over SHA-256 (MGF1-SHA-256, maximum salt
//! length). Each signature draws a fresh random salt and a fresh blinding
//! factor from the OS RNG, so signing the same beacon twice gives two
//! different signatures.
//!
//! Real nodes derive their keypair from hardware; here the private key is
//! supplied by the caller or generated from the OS RNG.

use anyhow::Context;
use rand_core::OsRng;
use rsa::pkcs1::EncodeRsaPublicKey;
use rsa::pss::BlindedSigningKey;
use rsa::signature::{RandomizedSigner, SignatureEncoding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use crate::entropy::Nonce;
use crate::identity::NodeIdentity;
use crate::message::{signed_message, Message};
use crate::session::SessionKey;
use crate::verifier::pss_salt_len;

/// Modulus size of generated node keys
pub const KEY_BITS: usize = 2048;

pub struct GroundNode {
    node_id: String,
    signing_key: BlindedSigningKey<Sha256>,
    public_key: RsaPublicKey,
    public_key_der: Vec<u8>,
    session_key: Option<SessionKey>,
}

impl GroundNode {
    pub fn new(node_id: impl Into<String>, private_key: RsaPrivateKey) -> anyhow::Result<Self> {
        let public_key = private_key.to_public_key();
        let public_key_der = public_key
            .to_pkcs1_der()
            .context("encoding node public key")?
            .as_bytes()
            .to_vec();
        let salt_len = pss_salt_len(&public_key);

        Ok(Self {
            node_id: node_id.into(),
            signing_key: BlindedSigningKey::new_with_salt_len(private_key, salt_len),
            public_key,
            public_key_der,
            session_key: None,
        })
    }

    /// Create a node with a fresh random keypair
    pub fn generate(node_id: impl Into<String>) -> anyhow::Result<Self> {
        let private_key =
            RsaPrivateKey::new(&mut OsRng, KEY_BITS).context("generating node keypair")?;
        Self::new(node_id, private_key)
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// The identity to register with the coordinator at onboarding
    pub fn identity(&self) -> NodeIdentity {
        NodeIdentity::new(self.node_id.clone(), self.public_key.clone())
    }

    pub fn session_key(&self) -> Option<&SessionKey> {
        self.session_key.as_ref()
    }

    /// Build a signed beacon for `timestamp`
    pub fn beacon(&self, timestamp: f64) -> anyhow::Result<Message> {
        // f64 Display is the shortest round-trip form, so the coordinator
        // parses back exactly this value
        let timestamp = timestamp.to_string();
        let signature = self
            .signing_key
            .try_sign_with_rng(&mut OsRng, &signed_message(&self.node_id, &timestamp))
            .context("signing beacon")?;

        Ok(Message::Beacon {
            node_id: self.node_id.clone(),
            public_key: self.public_key_der.clone(),
            signature: hex::encode(signature.to_vec()),
            timestamp,
        })
    }

    /// Keep the agreed session key and build the message that hands it over
    pub fn session_key_message(&mut self, key_material: &[u8]) -> Message {
        self.session_key = Some(SessionKey::new(key_material.to_vec()));
        Message::SessionKey {
            node_id: self.node_id.clone(),
            key_material: key_material.to_vec(),
        }
    }

    /// Echo the coordinator's nonce
    pub fn ready(&self, nonce: &Nonce) -> Message {
        Message::Ready {
            node_id: self.node_id.clone(),
            nonce: nonce.as_bytes().to_vec(),
        }
    }

    pub fn heartbeat(&self, timestamp: f64) -> Message {
        Message::Heartbeat {
            node_id: self.node_id.clone(),
            timestamp,
        }
    }
}

/// Keys shared by unit tests; RSA key generation is too slow to repeat
#[cfg(test)]
pub(crate) mod fixtures {
    use std::sync::OnceLock;

    use super::*;

    static KEYS: [OnceLock<RsaPrivateKey>; 3] = [OnceLock::new(), OnceLock::new(), OnceLock::new()];

    pub(crate) fn key(slot: usize) -> RsaPrivateKey {
        KEYS[slot]
            .get_or_init(|| RsaPrivateKey::new(&mut OsRng, KEY_BITS).unwrap())
            .clone()
    }

    pub(crate) fn node(node_id: &str, slot: usize) -> GroundNode {
        GroundNode::new(node_id, key(slot)).unwrap()
    }
}
