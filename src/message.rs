//! Wire messages exchanged between Ground Reception Nodes and the coordinator
//!
//! Messages arrive as a closed set of tagged variants encoded with postcard.
//! Nothing enters the authorization core until [`Message::validate`] has
//! checked it against its schema and converted it into an [`Inbound`] event
//! with typed fields (parsed public key, decoded signature, parsed timestamp,
//! fixed-size nonce).

use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::RsaPublicKey;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::entropy::{Nonce, NONCE_LEN};
use crate::error::{AuthError, Result};

/// Longest accepted node id, in bytes
pub const MAX_NODE_ID_LEN: usize = 64;

/// Longest accepted signature, in bytes (a 4096-bit modulus)
pub const MAX_SIGNATURE_LEN: usize = 512;

/// Delimiter between node id and timestamp in the signed message
const SIGNED_DELIMITER: char = ':';

/// Raw message as received from the network boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    Beacon {
        node_id: String,
        /// PKCS#1 DER RSA public key
        public_key: Vec<u8>,
        /// Hex-encoded RSA-PSS signature over `"node_id:timestamp"`
        signature: String,
        /// Decimal seconds since epoch, exactly as signed
        timestamp: String,
    },
    SessionKey {
        node_id: String,
        key_material: Vec<u8>,
    },
    Ready {
        node_id: String,
        nonce: Vec<u8>,
    },
    Heartbeat {
        node_id: String,
        timestamp: f64,
    },
}

impl Message {
    pub fn encode(&self) -> Result<Vec<u8>> {
        postcard::to_allocvec(self).map_err(|e| AuthError::MalformedMessage(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        postcard::from_bytes(bytes).map_err(|e| AuthError::MalformedMessage(e.to_string()))
    }

    pub fn node_id(&self) -> &str {
        match self {
            Message::Beacon { node_id, .. }
            | Message::SessionKey { node_id, .. }
            | Message::Ready { node_id, .. }
            | Message::Heartbeat { node_id, .. } => node_id,
        }
    }

    /// Check the message against its schema
    pub fn validate(self) -> Result<Inbound> {
        validate_node_id(self.node_id())?;

        match self {
            Message::Beacon {
                node_id,
                public_key,
                signature,
                timestamp,
            } => {
                let claimed_key = RsaPublicKey::from_pkcs1_der(&public_key).map_err(|e| {
                    AuthError::MalformedMessage(format!("public key is not PKCS#1 DER RSA: {e}"))
                })?;
                let signature = decode_signature(&signature)?;
                let parsed = parse_timestamp(&timestamp)?;
                Ok(Inbound::Beacon(Beacon {
                    node_id,
                    claimed_key,
                    signature,
                    timestamp: parsed,
                    timestamp_text: timestamp,
                }))
            }
            Message::SessionKey {
                node_id,
                key_material,
            } => Ok(Inbound::SessionKey {
                node_id,
                key_material: Zeroizing::new(key_material),
            }),
            Message::Ready { node_id, nonce } => {
                let nonce: [u8; NONCE_LEN] = nonce.as_slice().try_into().map_err(|_| {
                    AuthError::MalformedMessage(format!(
                        "ready nonce must be {NONCE_LEN} bytes, got {}",
                        nonce.len()
                    ))
                })?;
                Ok(Inbound::Ready {
                    node_id,
                    nonce: Nonce::from_bytes(nonce),
                })
            }
            Message::Heartbeat { node_id, timestamp } => {
                if !timestamp.is_finite() {
                    return Err(AuthError::MalformedMessage(format!(
                        "heartbeat timestamp {timestamp} is not finite"
                    )));
                }
                Ok(Inbound::Heartbeat { node_id, timestamp })
            }
        }
    }
}

/// A schema-checked message, ready for the authorization core
pub enum Inbound {
    Beacon(Beacon),
    SessionKey {
        node_id: String,
        key_material: Zeroizing<Vec<u8>>,
    },
    Ready {
        node_id: String,
        nonce: Nonce,
    },
    Heartbeat {
        node_id: String,
        timestamp: f64,
    },
}

impl core::fmt::Debug for Inbound {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Inbound::Beacon(beacon) => f.debug_tuple("Beacon").field(beacon).finish(),
            Inbound::SessionKey {
                node_id,
                key_material,
            } => f
                .debug_struct("SessionKey")
                .field("node_id", node_id)
                .field("key_material", &format_args!("<{} bytes>", key_material.len()))
                .finish(),
            Inbound::Ready { node_id, nonce } => f
                .debug_struct("Ready")
                .field("node_id", node_id)
                .field("nonce", nonce)
                .finish(),
            Inbound::Heartbeat { node_id, timestamp } => f
                .debug_struct("Heartbeat")
                .field("node_id", node_id)
                .field("timestamp", timestamp)
                .finish(),
        }
    }
}

impl Inbound {
    pub fn node_id(&self) -> &str {
        match self {
            Inbound::Beacon(beacon) => &beacon.node_id,
            Inbound::SessionKey { node_id, .. }
            | Inbound::Ready { node_id, .. }
            | Inbound::Heartbeat { node_id, .. } => node_id,
        }
    }
}

/// A validated beacon
#[derive(Debug, Clone, PartialEq)]
pub struct Beacon {
    node_id: String,
    claimed_key: RsaPublicKey,
    signature: Vec<u8>,
    timestamp: f64,
    timestamp_text: String,
}

impl Beacon {
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Public key the node claims to hold
    pub fn claimed_key(&self) -> &RsaPublicKey {
        &self.claimed_key
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// The exact bytes the node signed
    pub fn signed_message(&self) -> Vec<u8> {
        signed_message(&self.node_id, &self.timestamp_text)
    }

    #[cfg(test)]
    pub(crate) fn with_signature(mut self, signature: Vec<u8>) -> Self {
        self.signature = signature;
        self
    }
}

/// Build the signed beacon payload `"node_id:timestamp"`
pub fn signed_message(node_id: &str, timestamp: &str) -> Vec<u8> {
    format!("{node_id}{SIGNED_DELIMITER}{timestamp}").into_bytes()
}

fn validate_node_id(node_id: &str) -> Result<()> {
    if node_id.is_empty() {
        return Err(AuthError::MalformedMessage("empty node_id".into()));
    }
    if node_id.len() > MAX_NODE_ID_LEN {
        return Err(AuthError::MalformedMessage(format!(
            "node_id longer than {MAX_NODE_ID_LEN} bytes"
        )));
    }
    // The delimiter would make the signed message ambiguous
    if node_id.contains(SIGNED_DELIMITER) {
        return Err(AuthError::MalformedMessage(format!(
            "node_id must not contain '{SIGNED_DELIMITER}'"
        )));
    }
    Ok(())
}

fn decode_signature(signature: &str) -> Result<Vec<u8>> {
    let bytes = hex::decode(signature)
        .map_err(|e| AuthError::MalformedMessage(format!("signature is not hex: {e}")))?;
    if bytes.is_empty() || bytes.len() > MAX_SIGNATURE_LEN {
        return Err(AuthError::MalformedMessage(format!(
            "signature must be 1..={MAX_SIGNATURE_LEN} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(bytes)
}

fn parse_timestamp(timestamp: &str) -> Result<f64> {
    match timestamp.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(AuthError::MalformedMessage(format!(
            "timestamp {timestamp:?} is not a finite number"
        ))),
    }
}
