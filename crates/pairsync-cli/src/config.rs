//! CLI configuration file

use anyhow::{Context, Result};
use pairsync_core::{Document, Patch};
use pairsync_store::{OperationCall, StoreConfig};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Contents of a `pairsync.toml`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub store: StoreConfig,
    /// JSON file holding an array of documents to load before running
    pub seed: Option<PathBuf>,
    /// Document to check out, either id form
    pub document: Option<String>,
    #[serde(rename = "type")]
    pub type_name: Option<String>,
    pub script: Vec<Step>,
}

impl CliConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("Invalid config {}", path.display()))
    }
}

/// One scripted operation
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Step {
    Patch {
        #[serde(default)]
        set: Map<String, Value>,
        #[serde(default)]
        unset: Vec<String>,
    },
    Commit,
    Publish,
    Unpublish,
    Delete,
    DiscardChanges,
    Duplicate {
        id: String,
    },
    Restore {
        revision: String,
    },
}

impl Step {
    /// The operation this step runs; patch paths are relative to `id`
    pub fn to_call(&self, id: &str) -> OperationCall {
        match self {
            Step::Patch { set, unset } => {
                let patch = set
                    .iter()
                    .fold(Patch::new(id), |patch, (path, value)| patch.set(path.clone(), value.clone()));
                let patch = unset
                    .iter()
                    .fold(patch, |patch, path| patch.unset(path.clone()));
                OperationCall::Patch {
                    patches: vec![patch],
                    initial: None,
                }
            }
            Step::Commit => OperationCall::Commit,
            Step::Publish => OperationCall::Publish,
            Step::Unpublish => OperationCall::Unpublish,
            Step::Delete => OperationCall::Delete,
            Step::DiscardChanges => OperationCall::DiscardChanges,
            Step::Duplicate { id } => OperationCall::Duplicate { dupe_id: id.clone() },
            Step::Restore { revision } => OperationCall::Restore {
                revision: revision.clone(),
            },
        }
    }
}

/// Read seed documents from a JSON array
pub fn load_seed(path: &Path) -> Result<Vec<Document>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read seed file {}", path.display()))?;
    let values: Vec<Value> = serde_json::from_str(&raw)
        .with_context(|| format!("Seed file {} is not a JSON array", path.display()))?;
    values
        .into_iter()
        .map(|value| Document::from_value(value).map_err(anyhow::Error::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairsync_store::OperationName;
    use pairsync_transport::CommitVisibility;
    use std::io::Write;

    #[test]
    fn test_load_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
document = "movie"
type = "movie"

[store]
commit_visibility = "sync"
live_edit_types = ["settings"]

[[script]]
op = "patch"
set = {{ title = "Alien", year = 1979 }}

[[script]]
op = "publish"

[[script]]
op = "duplicate"
id = "movie-copy"
"#
        )
        .unwrap();

        let config = CliConfig::load(file.path()).unwrap();
        assert_eq!(config.document.as_deref(), Some("movie"));
        assert_eq!(config.type_name.as_deref(), Some("movie"));
        assert_eq!(config.store.commit_visibility, CommitVisibility::Sync);
        assert_eq!(config.store.live_edit_types, vec!["settings".to_string()]);
        assert_eq!(config.store.event_buffer, StoreConfig::default().event_buffer);
        assert_eq!(config.script.len(), 3);
        assert_eq!(config.script[1], Step::Publish);

        let names: Vec<_> = config.script.iter().map(|s| s.to_call("movie").name()).collect();
        assert_eq!(
            names,
            vec![OperationName::Patch, OperationName::Publish, OperationName::Duplicate]
        );
    }

    #[test]
    fn test_patch_step() {
        let step: Step = toml::from_str(
            r#"
op = "patch"
set = { title = "Alien" }
unset = ["year"]
"#,
        )
        .unwrap();

        let OperationCall::Patch { patches, initial } = step.to_call("movie") else {
            panic!("expected a patch call");
        };
        assert!(initial.is_none());
        assert_eq!(patches, vec![Patch::new("movie").set("title", "Alien").unset("year")]);
    }

    #[test]
    fn test_load_seed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"_id": "movie", "_type": "movie", "title": "Alien"}}]"#).unwrap();

        let docs = load_seed(file.path()).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id(), Some("movie"));

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        write!(bad, r#"[{{"title": "no id"}}]"#).unwrap();
        assert!(load_seed(bad.path()).is_err());
    }
}
