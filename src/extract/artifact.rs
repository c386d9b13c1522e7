//! Extractor for binary artifacts stored as leaf nodes.

use regex::Regex;

use super::{ResourceExtractor, compile_pattern};
use crate::resource::{InstallableResource, ResourceFactory, ResourcePayload};
use crate::store::{Node, NodeKind};
use crate::watcher::WatchError;

/// Default artifact name pattern.
pub const DEFAULT_ARTIFACT_PATTERN: &str = r"\.(jar|zip)$";

/// Matches leaf nodes with content whose name matches a pattern.
#[derive(Debug, Clone)]
pub struct ArtifactExtractor {
    pattern: Regex,
}

impl ArtifactExtractor {
    pub fn new(pattern: &str) -> Result<Self, WatchError> {
        Ok(Self {
            pattern: compile_pattern(pattern)?,
        })
    }
}

impl Default for ArtifactExtractor {
    fn default() -> Self {
        Self {
            pattern: Regex::new(DEFAULT_ARTIFACT_PATTERN).expect("default pattern is valid"),
        }
    }
}

impl ResourceExtractor for ArtifactExtractor {
    fn name(&self) -> &str {
        "artifact"
    }

    fn extract(
        &self,
        url_scheme: &str,
        node: &Node,
        priority: u32,
        factory: &dyn ResourceFactory,
    ) -> Result<Option<InstallableResource>, WatchError> {
        if node.kind != NodeKind::Leaf || !self.pattern.is_match(&node.name) {
            return Ok(None);
        }
        let Some(data) = &node.content else {
            return Ok(None);
        };
        let payload = ResourcePayload::Artifact { data: data.clone() };
        Ok(Some(factory.create(url_scheme, node, priority, payload)))
    }
}
