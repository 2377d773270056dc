//! Minimal DFXML fragment serialization.
//!
//! The report layer proper is outside this crate; scanners only need to turn
//! an ordered key/value map into one `<fileobject>` element written as a
//! feature context. Keys are kept sorted so repeated runs over the same image
//! produce byte-identical output.

use std::collections::BTreeMap;

pub fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&apos;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Render `map` as `<element attrs><key>value</key>...</element>`.
pub fn xmlmap(map: &BTreeMap<String, String>, element: &str, attrs: &str) -> String {
    let mut out = String::new();
    out.push('<');
    out.push_str(element);
    if !attrs.is_empty() {
        out.push(' ');
        out.push_str(attrs);
    }
    out.push('>');
    for (key, value) in map {
        out.push('<');
        out.push_str(key);
        out.push('>');
        out.push_str(&xml_escape(value));
        out.push_str("</");
        out.push_str(key);
        out.push('>');
    }
    out.push_str("</");
    out.push_str(element);
    out.push('>');
    out
}
