//! Extractors turn tree nodes into installable resources.
//!
//! Extractors are consulted in registration order and the first one that
//! produces a resource for a node wins. Order is therefore significant: a
//! broad extractor registered early shadows narrower ones behind it.

mod artifact;
mod config;

use std::fmt;
use std::sync::Arc;

pub use artifact::{ArtifactExtractor, DEFAULT_ARTIFACT_PATTERN};
pub use config::{ConfigExtractor, DEFAULT_CONFIG_PATTERN};

use crate::config::ExtractorConfig;
use crate::resource::{InstallableResource, ResourceFactory};
use crate::store::Node;
use crate::watcher::WatchError;

/// Attempts to produce a resource from a single node.
///
/// Implementations must be pure in the node's current state: watchers call
/// them repeatedly and interleaved across folders. Decline with `Ok(None)`;
/// an `Err` aborts the whole scan.
pub trait ResourceExtractor: Send + Sync + fmt::Debug {
    /// Extractor name for logging and configuration.
    fn name(&self) -> &str;

    fn extract(
        &self,
        url_scheme: &str,
        node: &Node,
        priority: u32,
        factory: &dyn ResourceFactory,
    ) -> Result<Option<InstallableResource>, WatchError>;
}

/// Ordered set of extractors, shared by every watched folder.
#[derive(Debug, Default, Clone)]
pub struct ExtractorRegistry {
    extractors: Vec<Arc<dyn ResourceExtractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an extractor after all existing ones.
    pub fn with(mut self, extractor: impl ResourceExtractor + 'static) -> Self {
        self.extractors.push(Arc::new(extractor));
        self
    }

    pub fn push(&mut self, extractor: Arc<dyn ResourceExtractor>) {
        self.extractors.push(extractor);
    }

    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.extractors.iter().map(|e| e.name()).collect()
    }

    /// Run the extractors in order and return the first match.
    pub fn extract(
        &self,
        url_scheme: &str,
        node: &Node,
        priority: u32,
        factory: &dyn ResourceFactory,
    ) -> Result<Option<InstallableResource>, WatchError> {
        for extractor in &self.extractors {
            if let Some(resource) = extractor.extract(url_scheme, node, priority, factory)? {
                crate::debug_event!(extractor.name(), "matched", "{}", node.path);
                return Ok(Some(resource));
            }
        }
        Ok(None)
    }

    /// Build the registry described by configuration, in its listed order.
    pub fn from_config(config: &ExtractorConfig) -> Result<Self, WatchError> {
        let mut registry = Self::new();
        for name in &config.order {
            let extractor: Arc<dyn ResourceExtractor> = match name.as_str() {
                "artifact" => Arc::new(ArtifactExtractor::new(&config.artifact_pattern)?),
                "config" => Arc::new(ConfigExtractor::new(&config.config_pattern)?),
                other => return Err(WatchError::UnknownExtractor(other.to_string())),
            };
            registry.push(extractor);
        }
        Ok(registry)
    }
}

/// Compile a name pattern, mapping failures to a configuration error.
pub(crate) fn compile_pattern(pattern: &str) -> Result<regex::Regex, WatchError> {
    regex::Regex::new(pattern).map_err(|e| WatchError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{ResourcePayload, Sha256Factory};

    /// Matches every node and tags the payload with its own name.
    #[derive(Debug)]
    struct Tagging(&'static str);

    impl ResourceExtractor for Tagging {
        fn name(&self) -> &str {
            self.0
        }

        fn extract(
            &self,
            url_scheme: &str,
            node: &Node,
            priority: u32,
            factory: &dyn ResourceFactory,
        ) -> Result<Option<InstallableResource>, WatchError> {
            let payload = ResourcePayload::Config {
                properties: [("by".to_string(), self.0.to_string())].into(),
            };
            Ok(Some(factory.create(url_scheme, node, priority, payload)))
        }
    }

    #[derive(Debug)]
    struct Failing;

    impl ResourceExtractor for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn extract(
            &self,
            _url_scheme: &str,
            node: &Node,
            _priority: u32,
            _factory: &dyn ResourceFactory,
        ) -> Result<Option<InstallableResource>, WatchError> {
            Err(WatchError::ExtractorFailed {
                extractor: "failing".to_string(),
                path: node.path.clone(),
                reason: "boom".to_string(),
            })
        }
    }

    fn produced_by(resource: &InstallableResource) -> &str {
        match &resource.payload {
            ResourcePayload::Config { properties } => properties["by"].as_str(),
            ResourcePayload::Artifact { .. } => "artifact",
        }
    }

    #[test]
    fn test_first_match_wins_and_short_circuits() {
        let node = Node::leaf("/install/a.jar", vec![1]);
        let registry = ExtractorRegistry::new()
            .with(Tagging("first"))
            .with(Failing);

        // Failing is never consulted once the first extractor matched.
        let resource = registry
            .extract("test", &node, 1, &Sha256Factory)
            .unwrap()
            .unwrap();
        assert_eq!(produced_by(&resource), "first");
    }

    #[test]
    fn test_order_decides_the_winner() {
        let node = Node::leaf("/install/a.jar", vec![1]);
        let ab = ExtractorRegistry::new().with(Tagging("a")).with(Tagging("b"));
        let ba = ExtractorRegistry::new().with(Tagging("b")).with(Tagging("a"));

        let from_ab = ab.extract("test", &node, 1, &Sha256Factory).unwrap().unwrap();
        let from_ba = ba.extract("test", &node, 1, &Sha256Factory).unwrap().unwrap();
        assert_eq!(produced_by(&from_ab), "a");
        assert_eq!(produced_by(&from_ba), "b");
    }

    #[test]
    fn test_extractor_errors_propagate() {
        let node = Node::leaf("/install/a.jar", vec![1]);
        let registry = ExtractorRegistry::new().with(Failing).with(Tagging("never"));
        assert!(matches!(
            registry.extract("test", &node, 1, &Sha256Factory),
            Err(WatchError::ExtractorFailed { .. })
        ));
    }

    #[test]
    fn test_from_config_respects_order_and_rejects_unknown() {
        let mut config = ExtractorConfig::default();
        config.order = vec!["artifact".to_string(), "config".to_string()];
        let registry = ExtractorRegistry::from_config(&config).unwrap();
        assert_eq!(registry.names(), vec!["artifact", "config"]);

        config.order.push("bogus".to_string());
        assert!(matches!(
            ExtractorRegistry::from_config(&config),
            Err(WatchError::UnknownExtractor(name)) if name == "bogus"
        ));

        config.order = vec!["artifact".to_string()];
        config.artifact_pattern = "(".to_string();
        assert!(matches!(
            ExtractorRegistry::from_config(&config),
            Err(WatchError::InvalidPattern { .. })
        ));
    }
}
