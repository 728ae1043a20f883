//! Message template rendering.
//!
//! Templates use named holes like `{RequestPath}`, optionally with a capture hint
//! (`{@Payload}`, `{$Payload}`) and a format (`{Elapsed:0.0000}`, `{Name:l}`). Positional
//! holes (`{0}`) resolve against properties named `0`, `1`, ... Doubled braces escape.

use crate::event::PropertyValue;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{|\}\}|\{([@$]?)([A-Za-z0-9_]+)(?::([^{}]*))?\}")
        .expect("message template pattern is valid")
});

/// Returns the property names referenced by the given template, in order of appearance.
pub fn property_names(template: &str) -> Vec<&str> {
    TOKEN
        .captures_iter(template)
        .filter_map(|captures| captures.get(2).map(|name| name.as_str()))
        .collect()
}

/// Renders the template by substituting every hole with the matching property.
///
/// Holes without a matching property are kept verbatim.
pub fn render(template: &str, properties: &HashMap<String, PropertyValue>) -> String {
    TOKEN
        .replace_all(template, |captures: &Captures| {
            let token = &captures[0];
            match token {
                "{{" => return "{".to_string(),
                "}}" => return "}".to_string(),
                _ => {}
            }

            match properties.get(&captures[2]) {
                Some(value) => format_value(value, captures.get(3).map(|f| f.as_str())),
                None => token.to_string(),
            }
        })
        .into_owned()
}

/// Formats a single value according to a hole's format specifier.
///
/// Supported formats are `l` (literal strings without quotes) and fixed point patterns like
/// `0.00` which determine the number of decimals.
pub fn format_value(value: &PropertyValue, format: Option<&str>) -> String {
    match (value, format) {
        (PropertyValue::String(text), Some("l")) => text.clone(),
        (PropertyValue::Float(number), Some(format)) => match decimals(format) {
            Some(decimals) => format!("{:.*}", decimals, number),
            None => number.to_string(),
        },
        (PropertyValue::Integer(number), Some(format)) => match decimals(format) {
            Some(decimals) if decimals > 0 => format!("{:.*}", decimals, *number as f64),
            _ => number.to_string(),
        },
        (value, _) => value.to_string(),
    }
}

fn decimals(format: &str) -> Option<usize> {
    if format.is_empty() || !format.chars().all(|c| c == '0' || c == '#' || c == '.') {
        return None;
    }

    Some(format.split_once('.').map(|(_, fraction)| fraction.len()).unwrap_or(0))
}
