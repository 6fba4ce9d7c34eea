//! Company-name normalization: a catch-all matcher over rule keys plus a
//! resolution lookup with ignore-qualifier semantics.

use std::collections::HashMap;

use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use thiserror::Error;

pub const CRATE_NAME: &str = "gitcorp-rules";

/// Default rule table, carried over from the original hand-curated map.
const BUILTIN_RULES: &str = include_str!("companies.yaml");

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("parsing rule file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("compiling pattern for rule `{key}`: {source}")]
    Pattern {
        key: String,
        source: regex::Error,
    },
    #[error("rule file declares no rules")]
    Empty,
    #[error("duplicate rule key `{0}`")]
    DuplicateKey(String),
}

#[derive(Debug, Clone, Deserialize)]
struct RuleFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    rules: Vec<RuleSpec>,
}

#[derive(Debug, Clone, Deserialize)]
struct RuleSpec {
    /// Substring matched case-insensitively anywhere in the raw company.
    key: String,
    /// Canonical company name substituted on match.
    label: String,
    /// Secondary pattern that suppresses the rewrite when it also matches.
    /// Many keys are deliberately broad; this narrows them.
    #[serde(default)]
    ignore: Option<String>,
}

/// How a matched key resolves.
#[derive(Debug, Clone)]
pub enum Resolution {
    Rename(String),
    RenameUnless { label: String, unless: Regex },
}

/// Compiled rule table: one combined case-insensitive alternation over all
/// keys as a pre-filter, then a per-key resolution lookup.
#[derive(Debug, Clone)]
pub struct RuleTable {
    catch_all: Regex,
    map: HashMap<String, Resolution>,
}

impl RuleTable {
    /// The embedded default table.
    pub fn builtin() -> Result<Self, RuleError> {
        Self::from_yaml(BUILTIN_RULES)
    }

    pub fn from_yaml(text: &str) -> Result<Self, RuleError> {
        let file: RuleFile = serde_yaml::from_str(text)?;
        if file.rules.is_empty() {
            return Err(RuleError::Empty);
        }

        let mut map = HashMap::with_capacity(file.rules.len());
        for spec in &file.rules {
            let key = spec.key.to_lowercase();
            let resolution = match &spec.ignore {
                None => Resolution::Rename(spec.label.clone()),
                Some(pattern) => Resolution::RenameUnless {
                    label: spec.label.clone(),
                    unless: case_insensitive(pattern).map_err(|source| RuleError::Pattern {
                        key: key.clone(),
                        source,
                    })?,
                },
            };
            if map.insert(key.clone(), resolution).is_some() {
                return Err(RuleError::DuplicateKey(key));
            }
        }

        // Longest key first so that overlapping alternatives starting at the
        // same position resolve to the more specific rule.
        let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
        keys.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
        let alternation = keys
            .iter()
            .map(|k| regex::escape(k))
            .collect::<Vec<_>>()
            .join("|");
        let catch_all = case_insensitive(&alternation).map_err(|source| RuleError::Pattern {
            key: "<catch-all>".to_string(),
            source,
        })?;

        Ok(Self { catch_all, map })
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Normalize a raw free-text company string.
    ///
    /// Empty input stays empty; unmatched input passes through verbatim so
    /// uncategorized companies are still recorded. A matched key rewrites to
    /// its canonical label unless the rule's ignore pattern also matches.
    pub fn normalize(&self, raw: &str) -> String {
        if raw.is_empty() {
            return String::new();
        }
        let Some(found) = self.catch_all.find(raw) else {
            return raw.to_string();
        };
        match self.map.get(&found.as_str().to_lowercase()) {
            Some(Resolution::Rename(label)) => label.clone(),
            Some(Resolution::RenameUnless { label, unless }) => {
                if unless.is_match(raw) {
                    raw.to_string()
                } else {
                    label.clone()
                }
            }
            // Unreachable as long as the catch-all is built from map keys.
            None => raw.to_string(),
        }
    }
}

fn case_insensitive(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}
