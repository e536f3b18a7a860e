use crate::types::{EvaluationRecord, PromptKey};
use anyhow::{Context, Result};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const SUBMISSION_EXTENSION: &str = "json";

/// One model's generated code, keyed by prompt
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct Submission {
    responses: BTreeMap<String, serde_json::Value>,
}

impl Submission {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read submission {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse submission {}", path.display()))
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let responses = pairs
            .into_iter()
            .map(|(key, code)| (key.to_string(), serde_json::Value::String(code.to_string())))
            .collect();
        Self { responses }
    }

    /// Code text for `key`. Null and non-string entries read as absent.
    pub fn code_for(&self, key: &PromptKey) -> Option<&str> {
        self.responses.get(key.as_str()).and_then(serde_json::Value::as_str)
    }
}

/// A model's records in registry order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelReport {
    entries: Vec<(PromptKey, EvaluationRecord)>,
}

impl ModelReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: PromptKey, record: EvaluationRecord) {
        self.entries.push((key, record));
    }

    pub fn get(&self, key: &str) -> Option<&EvaluationRecord> {
        self.entries
            .iter()
            .find(|(k, _)| k.as_str() == key)
            .map(|(_, record)| record)
    }

    pub fn keys(&self) -> impl Iterator<Item = &PromptKey> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PromptKey, &EvaluationRecord)> {
        self.entries.iter().map(|(k, r)| (k, r))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for ModelReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, record) in &self.entries {
            map.serialize_entry(key, record)?;
        }
        map.end()
    }
}

/// model → prompt → record
pub type Report = BTreeMap<String, ModelReport>;

/// Submission files in `dir` as `(model, path)`, sorted by model name.
/// The model name is the file name without its `.json` extension.
pub fn list_models(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to list responses directory {}", dir.display()))?;

    let mut models = Vec::new();
    for entry in entries {
        let path = entry
            .with_context(|| format!("Failed to read entry in {}", dir.display()))?
            .path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(SUBMISSION_EXTENSION) {
            continue;
        }
        if let Some(model) = path.file_stem().and_then(|s| s.to_str()) {
            models.push((model.to_string(), path.clone()));
        }
    }
    models.sort();
    Ok(models)
}

/// Persist the report as indented UTF-8 JSON, creating parent directories
pub fn write_report(path: &Path, report: &Report) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
    fs::write(path, json).with_context(|| format!("Failed to write report to {}", path.display()))
}
