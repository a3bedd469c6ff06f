//! Node identities
//!
//! Identities are created at node onboarding, outside this crate, and are
//! immutable once registered. The registry is read on every beacon and
//! written only on (de)registration.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::RsaPublicKey;

/// A registered Ground Reception Node identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    node_id: String,
    public_key: RsaPublicKey,
}

impl NodeIdentity {
    pub fn new(node_id: impl Into<String>, public_key: RsaPublicKey) -> Self {
        Self {
            node_id: node_id.into(),
            public_key,
        }
    }

    /// Build from a PKCS#1 DER public key (e.g. loaded from an external store)
    pub fn from_der(node_id: impl Into<String>, public_key: &[u8]) -> anyhow::Result<Self> {
        let public_key = RsaPublicKey::from_pkcs1_der(public_key)?;
        Ok(Self::new(node_id, public_key))
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }
}

/// Read-mostly registry of node identities
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    identities: RwLock<HashMap<String, Arc<NodeIdentity>>>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an identity
    ///
    /// Returns `false` and leaves the existing entry in place if the node id
    /// is already registered.
    pub fn register(&self, identity: NodeIdentity) -> bool {
        let mut identities = self.identities.write();
        if identities.contains_key(identity.node_id()) {
            return false;
        }
        identities.insert(identity.node_id().to_owned(), Arc::new(identity));
        true
    }

    pub fn get(&self, node_id: &str) -> Option<Arc<NodeIdentity>> {
        self.identities.read().get(node_id).cloned()
    }

    pub fn remove(&self, node_id: &str) -> Option<Arc<NodeIdentity>> {
        self.identities.write().remove(node_id)
    }

    pub fn len(&self) -> usize {
        self.identities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
