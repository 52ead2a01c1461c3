use serde_json::{Map, Value};

use crate::types::{Diff, Document};

/// The delete-this-field sentinel: an empty JSON object.
///
/// Known ambiguity: a field whose new value is a genuinely empty object is
/// indistinguishable from a deleted field. Documents that need empty-object
/// leaves (or positional array merging - arrays are replaced atomically here)
/// should plug in their own [`DiffEngine`].
pub fn delete_sentinel() -> Diff {
    Value::Object(Map::new())
}

fn is_delete_sentinel(value: &Value) -> bool {
    matches!(value, Value::Object(map) if map.is_empty())
}

/// Compute the partial delta that turns `previous` into `current`.
///
/// Field-wise recursive compare over JSON objects:
/// - identical values are omitted;
/// - nested objects on both sides recurse;
/// - a field present in `previous` but absent from `current` becomes the
///   delete sentinel;
/// - everything else (scalars, arrays, type changes) is an atomic
///   replacement with `current`'s value.
///
/// If either side is not an object the result is `current` cloned outright.
pub fn differentiate(previous: &Document, current: &Document) -> Diff {
    let (Value::Object(prev), Value::Object(curr)) = (previous, current) else {
        return current.clone();
    };

    let mut out = Map::new();
    for (field, curr_value) in curr {
        match prev.get(field) {
            Some(prev_value) if prev_value == curr_value => {}
            Some(prev_value @ Value::Object(_)) if curr_value.is_object() => {
                out.insert(field.clone(), differentiate(prev_value, curr_value));
            }
            _ => {
                out.insert(field.clone(), curr_value.clone());
            }
        }
    }
    for field in prev.keys() {
        if !curr.contains_key(field) {
            out.insert(field.clone(), delete_sentinel());
        }
    }
    Value::Object(out)
}

/// Apply `diff` to `current`, returning a new document.
///
/// Never mutates `current`, so callers can fold a sequence of diffs over
/// one snapshot without aliasing surprises. A non-object diff replaces the
/// document wholesale; the delete sentinel removes its field; an object
/// diff over an object field recurses; anything else replaces the field.
pub fn integrate(current: &Document, diff: &Diff) -> Document {
    let Value::Object(diff_map) = diff else {
        return diff.clone();
    };

    let mut merged = match current {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    for (field, delta) in diff_map {
        if is_delete_sentinel(delta) {
            merged.remove(field);
            continue;
        }
        let folded = match (merged.get(field), delta) {
            (Some(existing @ Value::Object(_)), Value::Object(_)) => integrate(existing, delta),
            _ => delta.clone(),
        };
        merged.insert(field.clone(), folded);
    }
    Value::Object(merged)
}

/// Pluggable differentiate/integrate pair.
///
/// The default [`MapDiff`] implements structural field-wise merge; embedders
/// with domain-specific semantics (numeric counters that add instead of
/// overwrite, positional array merges) supply their own.
pub trait DiffEngine: Send + Sync + 'static {
    fn differentiate(&self, previous: &Document, current: &Document) -> Diff;
    fn integrate(&self, current: &Document, diff: &Diff) -> Document;
}

/// Default structural engine over nested JSON maps.
#[derive(Debug, Clone, Copy, Default)]
pub struct MapDiff;

impl DiffEngine for MapDiff {
    fn differentiate(&self, previous: &Document, current: &Document) -> Diff {
        differentiate(previous, current)
    }

    fn integrate(&self, current: &Document, diff: &Diff) -> Document {
        integrate(current, diff)
    }
}
