//! Extractor for configuration dictionaries.
//!
//! A configuration is either a leaf holding `key=value` lines or a container
//! whose node properties are the dictionary.

use std::collections::BTreeMap;

use regex::Regex;

use super::{ResourceExtractor, compile_pattern};
use crate::resource::{InstallableResource, ResourceFactory, ResourcePayload};
use crate::store::{Node, NodeKind};
use crate::watcher::WatchError;

/// Default configuration name pattern.
pub const DEFAULT_CONFIG_PATTERN: &str = r"\.(cfg|config)$";

#[derive(Debug, Clone)]
pub struct ConfigExtractor {
    pattern: Regex,
}

impl ConfigExtractor {
    pub fn new(pattern: &str) -> Result<Self, WatchError> {
        Ok(Self {
            pattern: compile_pattern(pattern)?,
        })
    }
}

impl Default for ConfigExtractor {
    fn default() -> Self {
        Self {
            pattern: Regex::new(DEFAULT_CONFIG_PATTERN).expect("default pattern is valid"),
        }
    }
}

/// Parse `key=value` lines. Blank lines and `#`/`!` comments are skipped;
/// a line without `=` is a key with an empty value.
pub fn parse_properties(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
        .map(|line| match line.split_once('=') {
            Some((key, value)) => (key.trim().to_string(), value.trim().to_string()),
            None => (line.to_string(), String::new()),
        })
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

impl ResourceExtractor for ConfigExtractor {
    fn name(&self) -> &str {
        "config"
    }

    fn extract(
        &self,
        url_scheme: &str,
        node: &Node,
        priority: u32,
        factory: &dyn ResourceFactory,
    ) -> Result<Option<InstallableResource>, WatchError> {
        if !self.pattern.is_match(&node.name) {
            return Ok(None);
        }

        let properties = match node.kind {
            NodeKind::Container => node.properties.clone(),
            NodeKind::Leaf => {
                let Some(content) = &node.content else {
                    return Ok(None);
                };
                match std::str::from_utf8(content) {
                    Ok(text) => parse_properties(text),
                    Err(_) => {
                        crate::debug_event!("config", "not text", "{}", node.path);
                        return Ok(None);
                    }
                }
            }
        };

        let payload = ResourcePayload::Config { properties };
        Ok(Some(factory.create(url_scheme, node, priority, payload)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Sha256Factory;

    #[test]
    fn test_parse_properties() {
        let props = parse_properties(
            "# comment\n! also comment\n\nport = 8080\nhost=localhost\nflag\n=orphan\n",
        );
        assert_eq!(props.len(), 3);
        assert_eq!(props["port"], "8080");
        assert_eq!(props["host"], "localhost");
        assert_eq!(props["flag"], "");
    }

    #[test]
    fn test_leaf_and_container_configs() {
        let extractor = ConfigExtractor::default();
        let leaf = Node::leaf("/install/server.cfg", "port=8080\n");
        let container =
            Node::container("/install/logger.config").with_property("level", "debug");

        let from_leaf = extractor
            .extract("fs", &leaf, 100, &Sha256Factory)
            .unwrap()
            .unwrap();
        let ResourcePayload::Config { properties } = &from_leaf.payload else {
            panic!("expected a config payload");
        };
        assert_eq!(properties["port"], "8080");

        let from_container = extractor
            .extract("fs", &container, 100, &Sha256Factory)
            .unwrap()
            .unwrap();
        let ResourcePayload::Config { properties } = &from_container.payload else {
            panic!("expected a config payload");
        };
        assert_eq!(properties["level"], "debug");
    }

    #[test]
    fn test_declines_binary_and_unmatched_names() {
        let extractor = ConfigExtractor::default();
        let binary = Node::leaf("/install/bad.cfg", vec![0xff, 0xfe, 0x00]);
        let other = Node::leaf("/install/a.jar", "port=1");
        assert!(extractor.extract("fs", &binary, 1, &Sha256Factory).unwrap().is_none());
        assert!(extractor.extract("fs", &other, 1, &Sha256Factory).unwrap().is_none());
    }
}
