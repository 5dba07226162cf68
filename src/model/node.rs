//! Node in the hypergraph.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{PropertyMap, TagMap, Value};

/// Binary node identifier: SHA-256 of the node's canonical ndef encoding.
///
/// Stored as raw bytes, displayed and parsed as lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Buid(pub [u8; 32]);

impl Buid {
    /// Derive the buid for a `(form, value)` identity.
    pub fn from_ndef(ndef: &Ndef) -> Self {
        // serde_json output for Ndef is stable: struct fields and enum tags
        // serialize in declaration order.
        let bytes = serde_json::to_vec(ndef).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Buid(hasher.finalize().into())
    }

    /// Decode a hex-encoded buid. Returns None on bad hex or wrong length.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s.trim()).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Buid(arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Buid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// A node identity: form name plus primary value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ndef {
    pub form: String,
    pub value: Value,
}

impl Ndef {
    pub fn new(form: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { form: form.into(), value: value.into() }
    }

    pub fn buid(&self) -> Buid {
        Buid::from_ndef(self)
    }
}

/// A node in the hypergraph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub buid: Buid,
    pub form: String,
    pub value: Value,
    pub props: PropertyMap,
    pub tags: TagMap,
}

impl Node {
    pub fn new(form: impl Into<String>, value: impl Into<Value>) -> Self {
        let ndef = Ndef::new(form, value);
        Self {
            buid: ndef.buid(),
            form: ndef.form,
            value: ndef.value,
            props: PropertyMap::new(),
            tags: TagMap::new(),
        }
    }

    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }

    pub fn ndef(&self) -> Ndef {
        Ndef { form: self.form.clone(), value: self.value.clone() }
    }

    pub fn get(&self, prop: &str) -> Option<&Value> {
        self.props.get(prop)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains_key(tag)
    }

    /// True if any applied tag is in `set`.
    pub fn tagged_any<'s>(&self, set: impl IntoIterator<Item = &'s String>) -> bool {
        set.into_iter().any(|t| self.tags.contains_key(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buid_is_stable_per_ndef() {
        let a = Node::new("inet:ipv4", 0x01020304);
        let b = Node::new("inet:ipv4", 0x01020304);
        let c = Node::new("inet:ipv4", 0x01020305);
        assert_eq!(a.buid, b.buid);
        assert_ne!(a.buid, c.buid);
    }

    #[test]
    fn test_buid_hex_roundtrip() {
        let buid = Ndef::new("inet:fqdn", "vertex.link").buid();
        let hex = buid.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(Buid::from_hex(&hex), Some(buid));
    }

    #[test]
    fn test_buid_from_bad_hex() {
        assert_eq!(Buid::from_hex("zz"), None);
        assert_eq!(Buid::from_hex("abcd"), None);
    }
}
