/*!
 * Selector evaluation.
 *
 * Pure predicate over (schema_name, tags, context). Evaluation order is
 * schema -> all_tags -> any_tags -> context_match: the schema check is a
 * single equality, tag checks are linear in a handful of tags, and only
 * context_match walks the context value. First false short-circuits.
 */

use crate::models::{ContextMatch, MatchOp, Selector};
use serde_json::Value as JsonValue;

pub fn matches(
    schema_name: Option<&str>,
    tags: &[String],
    context: &JsonValue,
    selector: &Selector,
) -> bool {
    if let Some(want) = &selector.schema_name {
        if schema_name != Some(want.as_str()) {
            return false;
        }
    }

    if let Some(all) = &selector.all_tags {
        if !all.iter().all(|t| tags.iter().any(|have| have == t)) {
            return false;
        }
    }

    if let Some(any) = &selector.any_tags {
        if !any.iter().any(|t| tags.iter().any(|have| have == t)) {
            return false;
        }
    }

    if let Some(rules) = &selector.context_match {
        if !rules.iter().all(|rule| matches_rule(context, rule)) {
            return false;
        }
    }

    true
}

fn matches_rule(context: &JsonValue, rule: &ContextMatch) -> bool {
    // A path that doesn't resolve makes the predicate false, never an error.
    let Some(actual) = resolve_path(context, &rule.path) else {
        return false;
    };
    eval_op(actual, rule.op, &rule.value)
}

/// Resolve a restricted accessor path against a JSON value.
///
/// Grammar: optional `$` root sentinel, dot-separated segments, `[n]` array
/// indexing appended to a segment (`$.tools[0].name`). A bare `$` resolves
/// to the root itself.
pub fn resolve_path<'a>(root: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    let mut trimmed = path.trim();
    if let Some(rest) = trimmed.strip_prefix('$') {
        trimmed = rest.strip_prefix('.').unwrap_or(rest);
    }
    if trimmed.is_empty() {
        return Some(root);
    }

    let mut current = root;
    for segment in trimmed.split('.') {
        if segment.is_empty() {
            return None;
        }
        let (key, indexes) = split_indexes(segment)?;
        if !key.is_empty() {
            current = current.as_object()?.get(key)?;
        }
        for idx in indexes {
            current = current.as_array()?.get(idx)?;
        }
    }
    Some(current)
}

/// Split `tools[0][1]` into ("tools", [0, 1]). Malformed brackets yield None.
fn split_indexes(segment: &str) -> Option<(&str, Vec<usize>)> {
    let Some(bracket) = segment.find('[') else {
        return Some((segment, Vec::new()));
    };
    let key = &segment[..bracket];
    let mut indexes = Vec::new();
    let mut rest = &segment[bracket..];
    while !rest.is_empty() {
        let inner = rest.strip_prefix('[')?;
        let close = inner.find(']')?;
        indexes.push(inner[..close].parse().ok()?);
        rest = &inner[close + 1..];
    }
    Some((key, indexes))
}

fn eval_op(actual: &JsonValue, op: MatchOp, expected: &JsonValue) -> bool {
    match op {
        // Structural deep equality across primitives, arrays and mappings.
        MatchOp::Eq => actual == expected,
        MatchOp::Ne => actual != expected,
        // in / not-in require the literal to be an array.
        MatchOp::In => expected
            .as_array()
            .map(|arr| arr.contains(actual))
            .unwrap_or(false),
        MatchOp::NotIn => expected
            .as_array()
            .map(|arr| !arr.contains(actual))
            .unwrap_or(false),
        // Numeric ordering requires both operands numeric.
        MatchOp::Gt => match (actual.as_f64(), expected.as_f64()) {
            (Some(a), Some(b)) => a > b,
            _ => false,
        },
        MatchOp::Lt => match (actual.as_f64(), expected.as_f64()) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        },
        // Array containment by deep equality, or substring for strings.
        MatchOp::Contains => match actual {
            JsonValue::Array(arr) => arr.contains(expected),
            JsonValue::String(s) => expected.as_str().map(|n| s.contains(n)).unwrap_or(false),
            _ => false,
        },
    }
}
