//! Tag merging and flattening.
use serde_json::{Map, Value};

use crate::common::Tags;

/// Merges caller supplied tags with a default tag set.
///
/// Defaults take precedence, so a caller cannot accidentally break the standard service/env
/// dimensions through a name clash. Caller tags keep their position, new default keys are
/// appended.
pub fn merge_tags<'a, I>(tags: I, defaults: &Tags) -> Tags
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut merged: Tags = tags
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    for (k, v) in defaults {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

/// Flattens nested objects into dotted tag keys.
///
/// `{"outer": {"inner": 1}}` becomes `outer.inner = "1"`. Strings are used as is, every other
/// leaf value is rendered as JSON.
pub fn flatten_for_span(nested: &Map<String, Value>) -> Tags {
    let mut out = Tags::new();
    flatten_into(&mut out, None, nested);
    out
}

fn flatten_into(out: &mut Tags, prefix: Option<&str>, nested: &Map<String, Value>) {
    for (k, v) in nested {
        let key = match prefix {
            Some(p) => format!("{p}.{k}"),
            None => k.clone(),
        };
        match v {
            Value::Object(inner) => flatten_into(out, Some(&key), inner),
            Value::String(s) => {
                out.insert(key, s.clone());
            }
            other => {
                out.insert(key, other.to_string());
            }
        }
    }
}
