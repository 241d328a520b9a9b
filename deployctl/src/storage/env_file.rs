//! `.env` file store
//!
//! The environment file is a line-oriented `KEY=value` record read by the
//! running service at its own startup. This module is its only writer:
//! every update rewrites the whole file through [`File::write_atomic`], so
//! the service never observes a half-written file, and a change only takes
//! effect once the deployment is recreated.

use std::path::PathBuf;

use tracing::{debug, info};

use crate::errors::DeployError;
use crate::filesys::file::File;

#[derive(Debug, Clone, PartialEq, Eq)]
enum EnvLine {
    Entry { key: String, value: String, raw: String },
    Other(String),
}

impl EnvLine {
    fn parse(line: &str) -> Self {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return EnvLine::Other(line.to_string());
        }
        match trimmed.split_once('=') {
            Some((key, value)) if is_valid_key(key) => EnvLine::Entry {
                key: key.to_string(),
                value: value.to_string(),
                raw: line.to_string(),
            },
            _ => EnvLine::Other(line.to_string()),
        }
    }

    fn key(&self) -> Option<&str> {
        match self {
            EnvLine::Entry { key, .. } => Some(key),
            EnvLine::Other(_) => None,
        }
    }

    fn raw(&self) -> &str {
        match self {
            EnvLine::Entry { raw, .. } => raw,
            EnvLine::Other(raw) => raw,
        }
    }
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
}

/// One line of the file with the terminator it was read with
#[derive(Debug, Clone, PartialEq, Eq)]
struct RecordLine {
    line: EnvLine,
    eol: &'static str,
}

/// Ordered contents of an environment file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentRecord {
    lines: Vec<RecordLine>,
}

impl EnvironmentRecord {
    pub fn parse(contents: &str) -> Self {
        let lines = contents
            .split_inclusive('\n')
            .map(|chunk| {
                let (line, eol) = if let Some(line) = chunk.strip_suffix("\r\n") {
                    (line, "\r\n")
                } else {
                    (chunk.strip_suffix('\n').unwrap_or(chunk), "\n")
                };
                RecordLine {
                    line: EnvLine::parse(line),
                    eol,
                }
            })
            .collect();
        Self { lines }
    }

    /// Record of the current process environment
    pub fn from_process_env() -> Self {
        let lines = std::env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
            .map(|(key, value)| RecordLine {
                line: EnvLine::Entry {
                    raw: format!("{}={}", key, value),
                    key,
                    value,
                },
                eol: "\n",
            })
            .collect();
        Self { lines }
    }

    /// Value of `key`; when the file repeats a key the last line wins
    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().rev().find_map(|l| match &l.line {
            EnvLine::Entry { key: k, value, .. } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    /// Upsert: drop every line for `key`, then append `key=value`.
    ///
    /// All other lines keep their content and relative order.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), DeployError> {
        if !is_valid_key(key) {
            return Err(DeployError::ConfigError(format!("Invalid env key: {:?}", key)));
        }
        if value.contains('\n') || value.contains('\r') {
            return Err(DeployError::ConfigError(format!(
                "Value for {} must be a single line",
                key
            )));
        }

        // new lines follow the file's existing line endings
        let eol = self.lines.first().map_or("\n", |l| l.eol);
        self.lines.retain(|l| l.line.key() != Some(key));
        self.lines.push(RecordLine {
            line: EnvLine::Entry {
                key: key.to_string(),
                value: value.to_string(),
                raw: format!("{}={}", key, value),
            },
            eol,
        });
        Ok(())
    }

    /// Keys in file order, duplicates included
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().filter_map(|l| l.line.key())
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for l in &self.lines {
            out.push_str(l.line.raw());
            out.push_str(l.eol);
        }
        out
    }
}

/// Store backed by a single environment file
#[derive(Debug, Clone)]
pub struct EnvStore {
    file: File,
}

impl EnvStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: File::new(path),
        }
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    /// Read the current record; a missing file is an empty record
    pub async fn load(&self) -> Result<EnvironmentRecord, DeployError> {
        let contents = self.file.read_string_or_empty().await?;
        Ok(EnvironmentRecord::parse(&contents))
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, DeployError> {
        Ok(self.load().await?.get(key).map(str::to_string))
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<(), DeployError> {
        let mut record = self.load().await?;
        record.set(key, value)?;
        self.file.write_atomic(record.render().as_bytes()).await?;
        info!("Updated {} in {}", key, self.file.path().display());
        Ok(())
    }
}

/// Outcome of resolving operator input against the persisted value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateDecision {
    /// No new value supplied; the prior value stays and nothing restarts
    Keep(String),

    /// A new value must be persisted and the deployment restarted
    Replace(String),
}

/// Decide what an interactive update does.
///
/// Blank input falls back to the prior value; blank input without a prior
/// value is a missing required configuration.
pub fn resolve_update(
    key: &str,
    prior: Option<&str>,
    input: Option<&str>,
) -> Result<UpdateDecision, DeployError> {
    let input = input.map(str::trim).filter(|v| !v.is_empty());
    let prior = prior.filter(|v| !v.trim().is_empty());

    match (input, prior) {
        (Some(new), _) => Ok(UpdateDecision::Replace(new.to_string())),
        (None, Some(old)) => {
            debug!("No new value for {}, keeping the current one", key);
            Ok(UpdateDecision::Keep(old.to_string()))
        }
        (None, None) => Err(DeployError::MissingConfig(key.to_string())),
    }
}

/// Presence report for required and optional keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyCheck {
    pub present: Vec<String>,
    pub missing_required: Vec<String>,
    pub missing_optional: Vec<String>,
}

impl KeyCheck {
    pub fn is_complete(&self) -> bool {
        self.missing_required.is_empty()
    }
}

/// Check which keys have a non-empty value
pub fn check_keys(record: &EnvironmentRecord, required: &[String], optional: &[String]) -> KeyCheck {
    let has = |key: &str| record.get(key).is_some_and(|v| !v.trim().is_empty());
    let mut check = KeyCheck::default();

    for key in required {
        if has(key) {
            check.present.push(key.clone());
        } else {
            check.missing_required.push(key.clone());
        }
    }
    for key in optional {
        if has(key) {
            check.present.push(key.clone());
        } else {
            check.missing_optional.push(key.clone());
        }
    }
    check
}
