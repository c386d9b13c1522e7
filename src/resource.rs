//! Installable resource descriptors and the identity/digest factory.

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::store::Node;

/// What a resource installs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResourcePayload {
    /// Opaque bytes, such as a bundle or archive.
    Artifact {
        #[serde(rename = "size", serialize_with = "serialize_len")]
        data: Vec<u8>,
    },
    /// A flat configuration dictionary.
    Config { properties: BTreeMap<String, String> },
}

fn serialize_len<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(data.len() as u64)
}

impl ResourcePayload {
    pub fn kind(&self) -> &'static str {
        match self {
            ResourcePayload::Artifact { .. } => "artifact",
            ResourcePayload::Config { .. } => "config",
        }
    }
}

/// A resource produced from one tree node, ready for the installer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallableResource {
    /// Stable identity: URL scheme plus node path.
    pub url: String,
    /// Fingerprint of the installable content.
    pub digest: String,
    pub priority: u32,
    #[serde(flatten)]
    pub payload: ResourcePayload,
}

/// Produces resource identities and content digests.
///
/// Digest equality must mean "installable content unchanged": a change in
/// content must always change the digest.
pub trait ResourceFactory: Send + Sync {
    fn identity(&self, url_scheme: &str, node: &Node) -> String;

    fn digest(&self, payload: &ResourcePayload) -> String;

    fn create(
        &self,
        url_scheme: &str,
        node: &Node,
        priority: u32,
        payload: ResourcePayload,
    ) -> InstallableResource {
        InstallableResource {
            url: self.identity(url_scheme, node),
            digest: self.digest(&payload),
            priority,
            payload,
        }
    }
}

/// SHA-256 based factory.
///
/// The hash input starts with the payload kind, and every byte string is
/// prefixed with its length, so no two distinct payloads share an input.
/// Configs are hashed in key order, so property order never matters.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Factory;

fn update_framed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

impl ResourceFactory for Sha256Factory {
    fn identity(&self, url_scheme: &str, node: &Node) -> String {
        format!("{url_scheme}:{}", node.path)
    }

    fn digest(&self, payload: &ResourcePayload) -> String {
        let mut hasher = Sha256::new();
        update_framed(&mut hasher, payload.kind().as_bytes());
        match payload {
            ResourcePayload::Artifact { data } => update_framed(&mut hasher, data),
            ResourcePayload::Config { properties } => {
                hasher.update((properties.len() as u64).to_le_bytes());
                for (key, value) in properties {
                    update_framed(&mut hasher, key.as_bytes());
                    update_framed(&mut hasher, value.as_bytes());
                }
            }
        }
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pairs: &[(&str, &str)]) -> ResourcePayload {
        ResourcePayload::Config {
            properties: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_identity_uses_scheme_and_path() {
        let node = Node::leaf("/apps/install/a.jar", vec![1]);
        assert_eq!(
            Sha256Factory.identity("jcrinstall", &node),
            "jcrinstall:/apps/install/a.jar"
        );
    }

    #[test]
    fn test_digest_tracks_content() {
        let factory = Sha256Factory;
        let a = factory.digest(&ResourcePayload::Artifact { data: vec![1, 2] });
        let b = factory.digest(&ResourcePayload::Artifact { data: vec![1, 2] });
        let c = factory.digest(&ResourcePayload::Artifact { data: vec![1, 3] });
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_config_digest_ignores_insertion_order() {
        let factory = Sha256Factory;
        let one = factory.digest(&config(&[("a", "1"), ("b", "2")]));
        let two = factory.digest(&config(&[("b", "2"), ("a", "1")]));
        let changed = factory.digest(&config(&[("a", "1"), ("b", "3")]));
        assert_eq!(one, two);
        assert_ne!(one, changed);
    }

    #[test]
    fn test_config_digest_is_not_fooled_by_separators_in_values() {
        let factory = Sha256Factory;
        let embedded = factory.digest(&config(&[("a", "1\nb=2")]));
        let split = factory.digest(&config(&[("a", "1"), ("b", "2")]));
        assert_ne!(embedded, split);

        let key_eq = factory.digest(&config(&[("a=1", "")]));
        let value_eq = factory.digest(&config(&[("a", "1")]));
        assert_ne!(key_eq, value_eq);
    }

    #[test]
    fn test_digest_distinguishes_payload_kinds() {
        let factory = Sha256Factory;
        let artifact = factory.digest(&ResourcePayload::Artifact {
            data: b"a=1\n".to_vec(),
        });
        let dictionary = factory.digest(&config(&[("a", "1")]));
        assert_ne!(artifact, dictionary);
    }

    #[test]
    fn test_serializes_artifact_size_not_bytes() {
        let node = Node::leaf("/install/a.jar", vec![0; 4]);
        let resource = Sha256Factory.create(
            "fs",
            &node,
            100,
            ResourcePayload::Artifact { data: vec![0; 4] },
        );
        let json = serde_json::to_value(&resource).unwrap();
        assert_eq!(json["url"], "fs:/install/a.jar");
        assert_eq!(json["type"], "artifact");
        assert_eq!(json["size"], 4);
        assert_eq!(json["priority"], 100);
    }
}
