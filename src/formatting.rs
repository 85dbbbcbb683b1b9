use std::fmt::Display;

use crate::common::Tags;

/// Kind of dogstatsd metric, rendered as the type field of a line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricType {
    Count,
    Gauge,
    Histogram,
    Distribution,
    Set,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Count => "c",
            Self::Gauge => "g",
            Self::Histogram => "h",
            Self::Distribution => "d",
            Self::Set => "s",
        }
    }
}

/// Renders a tag set as `key:value` labels.
pub fn tags_to_labels(tags: &Tags) -> Vec<String> {
    tags.iter()
        .map(|(k, v)| format!("{}:{}", sanitize_label(k), sanitize_label_value(v)))
        .collect()
}

/// Sanitizes a label key to be valid under the datadog [data model].
///
/// [data model]: https://docs.datadoghq.com/getting_started/tagging/
pub fn sanitize_label(key: &str) -> String {
    // The first character must be a letter, and the last one must not be a colon.
    let mut out = String::with_capacity(key.len());
    let mut is_invalid: fn(char) -> bool = invalid_label_start_character;
    let mut key_chars = key.chars().peekable();
    let mut first = true;
    while let Some(c) = key_chars.next() {
        if !first && key_chars.peek().is_none() {
            is_invalid = invalid_label_last_character;
        }
        if is_invalid(c) {
            out.push('_');
        } else {
            out.push(c);
        }
        is_invalid = invalid_label_character;
        first = false;
    }
    out
}

pub fn sanitize_label_value(value: &str) -> String {
    value
        .chars()
        .map(|c| if invalid_label_character(c) { '_' } else { c })
        .collect()
}

/// Metrics naming [rules](https://docs.datadoghq.com/developers/dogstatsd/datagram_shell?tabs=metrics)
/// - Metric names must start with a letter.
/// - Metric names must only contain ASCII alphanumerics, underscores, and periods.
/// - Other characters, including spaces, are converted to underscores.
/// - Unicode is not supported.
pub fn sanitize_metric_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut is_invalid: fn(char) -> bool = invalid_metric_name_start_character;
    for c in name.chars() {
        if is_invalid(c) {
            out.push('_');
        } else {
            out.push(c);
        }
        is_invalid = invalid_metric_name_character;
    }
    out
}

/// Set members travel in the value field, so they must not contain the field separators.
pub fn sanitize_set_member(item: &str) -> String {
    item.chars()
        .map(|c| match c {
            '|' | ':' | '\n' => '_',
            c => c,
        })
        .collect()
}

// <METRIC_NAME>:<VALUE>|<TYPE>|#<TAG_KEY_1>:<TAG_VALUE_1>,<TAG_2>
pub fn write_metric_line<T>(
    buffer: &mut String,
    prefix: Option<&str>,
    name: &str,
    mtype: MetricType,
    labels: &[String],
    value: T,
) where
    T: Display,
{
    if let Some(pref) = prefix {
        buffer.push_str(sanitize_metric_name(pref).as_str());
        buffer.push('.');
    }
    buffer.push_str(sanitize_metric_name(name).as_str());

    buffer.push(':');
    buffer.push_str(value.to_string().as_str());
    buffer.push('|');
    buffer.push_str(mtype.as_str());

    if !labels.is_empty() {
        buffer.push_str("|#");
        buffer.push_str(labels.join(",").as_str());
    }
    buffer.push('\n');
}

#[inline]
fn invalid_metric_name_start_character(c: char) -> bool {
    // Essentially, needs to match the regex pattern of [a-zA-Z_].
    !(c.is_ascii_alphabetic() || c == '_')
}

#[inline]
fn invalid_metric_name_character(c: char) -> bool {
    // Essentially, needs to match the regex pattern of [a-zA-Z0-9_.].
    !(c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

// Tags must start with a letter and after that may contain alphanumerics, underscores,
// minuses, colons, periods and slashes. A tag cannot end with a colon.

#[inline]
fn invalid_label_start_character(c: char) -> bool {
    !c.is_alphabetic()
}

#[inline]
fn invalid_label_character(c: char) -> bool {
    !(c.is_alphanumeric() || c == '_' || c == '.' || c == ':' || c == '/' || c == '-')
}

#[inline]
fn invalid_label_last_character(c: char) -> bool {
    !(c.is_alphanumeric() || c == '_' || c == '.' || c == '/' || c == '-')
}
