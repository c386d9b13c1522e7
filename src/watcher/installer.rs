//! Installer trait: the consumer of scan results.

use std::io::Write;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use super::{ScanResult, WatchError};

/// Applies scan results: installs added or changed resources and
/// uninstalls removed ones.
///
/// Resources absent from both lists are unchanged and still present.
#[async_trait]
pub trait ResourceInstaller: Send + Sync {
    /// Installer name for logging.
    fn name(&self) -> &str;

    /// Apply the changes found in `folder`.
    async fn update_resources(&self, folder: &str, result: ScanResult) -> Result<(), WatchError>;
}

/// Writes one JSON object per install or uninstall, one per line.
///
/// ```text
/// {"action":"install","folder":"/apps/install","url":"fs:/apps/install/a.jar",...}
/// {"action":"uninstall","folder":"/apps/install","url":"fs:/apps/install/old.jar"}
/// ```
pub struct JsonLinesInstaller<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesInstaller<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }

    fn write_line(&self, value: &serde_json::Value) -> Result<(), WatchError> {
        let mut out = self.out.lock();
        writeln!(out, "{value}")
            .and_then(|_| out.flush())
            .map_err(|e| WatchError::InstallFailed {
                installer: "jsonl".to_string(),
                reason: e.to_string(),
            })
    }
}

impl JsonLinesInstaller<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

#[async_trait]
impl<W: Write + Send> ResourceInstaller for JsonLinesInstaller<W> {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn update_resources(&self, folder: &str, result: ScanResult) -> Result<(), WatchError> {
        for url in &result.to_remove {
            self.write_line(&json!({
                "action": "uninstall",
                "folder": folder,
                "url": url,
            }))?;
        }
        for resource in &result.to_add {
            let mut line = json!({ "action": "install", "folder": folder });
            let details =
                serde_json::to_value(resource).map_err(|e| WatchError::InstallFailed {
                    installer: "jsonl".to_string(),
                    reason: e.to_string(),
                })?;
            if let (Some(line), serde_json::Value::Object(details)) = (line.as_object_mut(), details)
            {
                line.extend(details);
            }
            self.write_line(&line)?;
        }
        Ok(())
    }
}
