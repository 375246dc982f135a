//! KN-002: Recipe parsing and block decoding.
//!
//! A recipe is YAML with a `variables` map and an ordered `resources` map of
//! block name → attributes. Each block is decoded into a typed resource;
//! every problem in a block is collected into one [`Error::ConfigDecode`],
//! and every failing block is reported before the run is refused.

use super::resolver;
use super::scheduler::ResourceSet;
use crate::error::{Error, Result};
use crate::fetch::checksum::Checksum;
use crate::resources;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_yaml_ng::Value;
use std::collections::HashSet;
use std::path::Path;

/// A recipe document as written on disk.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecipeFile {
    #[serde(default)]
    pub variables: IndexMap<String, Value>,
    #[serde(default)]
    pub resources: IndexMap<String, IndexMap<String, Value>>,
}

/// Parse a recipe file from disk.
pub fn parse_recipe_file(path: &Path) -> Result<RecipeFile> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    parse_recipe(&content).map_err(|e| match e {
        Error::Parse { message, .. } => Error::Parse {
            what: format!("recipe {}", path.display()),
            message,
        },
        other => other,
    })
}

/// Parse a recipe from a string. An empty document is an empty recipe.
pub fn parse_recipe(yaml: &str) -> Result<RecipeFile> {
    if yaml.trim().is_empty() {
        return Ok(RecipeFile::default());
    }
    serde_yaml_ng::from_str(yaml).map_err(|e| Error::Parse {
        what: "recipe".to_string(),
        message: e.to_string(),
    })
}

/// Decode every block of `recipe` into a [`ResourceSet`].
///
/// Returns all decode errors, one per failing block, in declaration order.
pub fn decode_recipe(recipe: &RecipeFile) -> std::result::Result<ResourceSet, Vec<Error>> {
    let mut set = ResourceSet::new();
    let mut errors = Vec::new();

    for (name, raw) in &recipe.resources {
        let mut diagnostics = Vec::new();
        let resolved: IndexMap<String, Value> = raw
            .iter()
            .map(|(k, v)| {
                (
                    k.clone(),
                    resolver::resolve_value(v, &recipe.variables, &mut diagnostics),
                )
            })
            .collect();

        let attrs = Attributes::with_diagnostics(name, resolved, diagnostics);
        match resources::build(attrs) {
            Ok(item) => set.insert(item),
            Err(e) => errors.push(e),
        }
    }

    if errors.is_empty() {
        Ok(set)
    } else {
        Err(errors)
    }
}

/// Load, decode and statically check a recipe file.
pub fn load_recipe(path: &Path) -> std::result::Result<ResourceSet, Vec<Error>> {
    let recipe = parse_recipe_file(path).map_err(|e| vec![e])?;
    let set = decode_recipe(&recipe)?;
    let graph_errors = resolver::check_graph(&set.dependency_map());
    if graph_errors.is_empty() {
        Ok(set)
    } else {
        Err(graph_errors)
    }
}

// ============================================================================
// Attribute extraction
// ============================================================================

/// One block's attributes, consumed field by field by a resource decoder.
///
/// Every accessor records a diagnostic instead of failing, so a decoder
/// always runs to completion and [`Attributes::finish`] reports everything.
#[derive(Debug)]
pub struct Attributes {
    block: String,
    values: IndexMap<String, Value>,
    consumed: HashSet<String>,
    diagnostics: Vec<String>,
}

impl Attributes {
    pub fn new(block: &str, values: IndexMap<String, Value>) -> Self {
        Self::with_diagnostics(block, values, Vec::new())
    }

    pub fn with_diagnostics(
        block: &str,
        values: IndexMap<String, Value>,
        diagnostics: Vec<String>,
    ) -> Self {
        Self {
            block: block.to_string(),
            values,
            consumed: HashSet::new(),
            diagnostics,
        }
    }

    /// Block name.
    pub fn block(&self) -> &str {
        &self.block
    }

    pub fn diagnostic(&mut self, message: impl Into<String>) {
        self.diagnostics.push(message.into());
    }

    fn take(&mut self, key: &str) -> Option<&Value> {
        self.consumed.insert(key.to_string());
        match self.values.get(key) {
            None | Some(Value::Null) => None,
            Some(v) => Some(v),
        }
    }

    /// Required string. Missing yields a diagnostic and an empty string.
    pub fn required_str(&mut self, key: &str) -> String {
        match self.optional_str(key) {
            Some(s) => s,
            None => {
                if !self.diagnostics.iter().any(|d| d.contains(&format!("'{}'", key))) {
                    self.diagnostic(format!("missing required attribute '{}'", key));
                }
                String::new()
            }
        }
    }

    /// Optional string. Numbers and bools are accepted as their text.
    pub fn optional_str(&mut self, key: &str) -> Option<String> {
        let value = self.take(key)?.clone();
        match value {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => {
                self.diagnostic(format!("attribute '{}' must be a string", key));
                None
            }
        }
    }

    /// Optional bool. `"true"`/`"false"` strings are accepted.
    pub fn optional_bool(&mut self, key: &str, default: bool) -> bool {
        let Some(value) = self.take(key).cloned() else {
            return default;
        };
        match value {
            Value::Bool(b) => b,
            Value::String(s) if s == "true" => true,
            Value::String(s) if s == "false" => false,
            _ => {
                self.diagnostic(format!("attribute '{}' must be a bool", key));
                default
            }
        }
    }

    /// A list of strings, or one comma-separated string.
    pub fn string_list(&mut self, key: &str) -> Vec<String> {
        let Some(value) = self.take(key).cloned() else {
            return Vec::new();
        };
        match value {
            Value::String(s) => s
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            Value::Sequence(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(s) => out.push(s),
                        _ => {
                            self.diagnostic(format!("attribute '{}' must be a list of strings", key));
                            return Vec::new();
                        }
                    }
                }
                out
            }
            _ => {
                self.diagnostic(format!("attribute '{}' must be a list of strings", key));
                Vec::new()
            }
        }
    }

    /// Optional checksum string, validated.
    pub fn optional_checksum(&mut self, key: &str) -> Option<Checksum> {
        let raw = self.optional_str(key)?;
        match Checksum::parse(&raw) {
            Ok(c) => Some(c),
            Err(e) => {
                self.diagnostic(format!("attribute '{}': {}", key, e));
                None
            }
        }
    }

    /// Mark every attribute consumed. Used when the kind itself is unknown.
    pub fn consume_all(&mut self) {
        self.consumed.extend(self.values.keys().cloned());
    }

    /// Report unconsumed attributes and return all diagnostics as one error.
    pub fn finish(mut self) -> Result<()> {
        let unknown: Vec<String> = self
            .values
            .keys()
            .filter(|k| !self.consumed.contains(*k))
            .map(|k| format!("unsupported attribute '{}'", k))
            .collect();
        self.diagnostics.extend(unknown);

        if self.diagnostics.is_empty() {
            Ok(())
        } else {
            Err(Error::ConfigDecode {
                resource: self.block,
                diagnostics: self.diagnostics,
            })
        }
    }
}
