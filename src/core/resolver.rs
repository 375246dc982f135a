//! KN-003: Template resolution and static dependency-graph checks.
//!
//! Resolves `{{var.NAME}}` templates against the recipe's `variables` map.
//! Checks `depends_on` edges for unknown targets and cycles before any bake
//! runs, so `kiln validate` can report every problem at once.

use super::types::yaml_value_to_string;
use crate::error::Error;
use indexmap::IndexMap;
use serde_yaml_ng::Value;

/// Resolve all template variables in a string.
///
/// Only `{{var.NAME}}` is a template. Any other `{{...}}` (Go templates,
/// Jinja, `docker --format`) is left as literal text.
pub fn resolve_template(template: &str, variables: &IndexMap<String, Value>) -> Result<String, String> {
    let mut result = template.to_string();
    let mut start = 0;

    while let Some(open) = result[start..].find("{{") {
        let open = start + open;
        let inner = &result[open + 2..];
        if !inner.trim_start().starts_with("var.") {
            start = open + 2;
            continue;
        }
        let close = inner
            .find("}}")
            .ok_or_else(|| format!("unclosed template at position {}", open))?;
        let close = open + 2 + close + 2;
        let key = result[open + 2..close - 2].trim();
        let name = key.strip_prefix("var.").unwrap_or(key);

        let value = variables
            .get(name)
            .map(yaml_value_to_string)
            .ok_or_else(|| format!("unknown variable: {}", name))?;

        result.replace_range(open..close, &value);
        start = open + value.len();
    }

    Ok(result)
}

/// Resolve templates in every string inside `value`, recursing into
/// sequences and mappings. Each failure is pushed onto `diagnostics`.
pub fn resolve_value(
    value: &Value,
    variables: &IndexMap<String, Value>,
    diagnostics: &mut Vec<String>,
) -> Value {
    match value {
        Value::String(s) => match resolve_template(s, variables) {
            Ok(resolved) => Value::String(resolved),
            Err(e) => {
                diagnostics.push(e);
                value.clone()
            }
        },
        Value::Sequence(items) => Value::Sequence(
            items
                .iter()
                .map(|v| resolve_value(v, variables, diagnostics))
                .collect(),
        ),
        Value::Mapping(map) => Value::Mapping(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, variables, diagnostics)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Check a name → dependencies map. Returns every unknown dependency and
/// the first cycle found, walking resources in declaration order.
pub fn check_graph(graph: &IndexMap<String, Vec<String>>) -> Vec<Error> {
    let mut errors = Vec::new();

    for (name, deps) in graph {
        for dep in deps {
            if !graph.contains_key(dep) {
                errors.push(Error::UnknownDependency {
                    resource: name.clone(),
                    missing: dep.clone(),
                });
            }
        }
    }

    let mut state = vec![Mark::Unvisited; graph.len()];
    let mut stack = Vec::new();
    for idx in 0..graph.len() {
        if let Some(path) = find_cycle(graph, idx, &mut state, &mut stack) {
            errors.push(Error::DependencyCycle { path });
            break;
        }
    }

    errors
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

fn find_cycle(
    graph: &IndexMap<String, Vec<String>>,
    idx: usize,
    state: &mut [Mark],
    stack: &mut Vec<usize>,
) -> Option<Vec<String>> {
    match state[idx] {
        Mark::Done => return None,
        Mark::OnStack => {
            let pos = stack.iter().position(|&i| i == idx).unwrap_or(0);
            let mut path: Vec<String> = stack[pos..]
                .iter()
                .filter_map(|&i| graph.get_index(i).map(|(n, _)| n.clone()))
                .collect();
            if let Some((name, _)) = graph.get_index(idx) {
                path.push(name.clone());
            }
            return Some(path);
        }
        Mark::Unvisited => {}
    }

    state[idx] = Mark::OnStack;
    stack.push(idx);
    let (_, deps) = graph.get_index(idx)?;
    for dep in deps {
        // Unknown targets are reported separately.
        let Some(dep_idx) = graph.get_index_of(dep) else {
            continue;
        };
        if let Some(path) = find_cycle(graph, dep_idx, state, stack) {
            return Some(path);
        }
    }
    stack.pop();
    state[idx] = Mark::Done;
    None
}
