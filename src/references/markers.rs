//! Inline reference markers
//!
//! Two comment forms are recognized at the start of a line:
//!
//! ```text
//! /// <reference path="lib/util.js" />
//! /// <reference path="slow.js" jsharness-exclude="true" />
//! // <template path="views/row.html" id="row" type="text/x-template" mode="script" />
//! ```
//!
//! Exclusion accepts both `jsharness-exclude` and the older `jsharnessExclude`.

use regex::Regex;
use std::sync::OnceLock;

use crate::settings::{TemplateMode, TemplateOptions};

const EXCLUDE_ATTRIBUTES: [&str; 2] = ["jsharness-exclude", "jsharnessexclude"];

fn marker_regex() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| {
        Regex::new(r"(?mi)^[ \t]*(?:///?|/\*+)[ \t]*<[ \t]*(reference|template)\b([^>]*?)/?[ \t]*>")
            .expect("marker pattern is valid")
    })
}

fn attribute_regex() -> &'static Regex {
    static ATTRIBUTE: OnceLock<Regex> = OnceLock::new();
    ATTRIBUTE.get_or_init(|| {
        Regex::new(r#"([A-Za-z_][\w\-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
            .expect("attribute pattern is valid")
    })
}

/// A marker found in file text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker {
    Reference { path: String },
    Template { path: String, options: TemplateOptions },
}

/// Scan text for markers, in source order, dropping excluded references
pub fn scan(text: &str) -> Vec<Marker> {
    marker_regex()
        .captures_iter(text)
        .filter_map(|caps| {
            let kind = caps[1].to_lowercase();
            let attributes = parse_attributes(&caps[2]);
            let path = attribute(&attributes, "path")?.trim().to_string();
            if path.is_empty() {
                return None;
            }

            if kind == "template" {
                let mode = match attribute(&attributes, "mode") {
                    Some(m) if m.eq_ignore_ascii_case("script") => TemplateMode::Script,
                    _ => TemplateMode::Raw,
                };
                return Some(Marker::Template {
                    path,
                    options: TemplateOptions {
                        mode,
                        id: attribute(&attributes, "id").map(str::to_string),
                        script_type: attribute(&attributes, "type").map(str::to_string),
                    },
                });
            }

            let excluded = EXCLUDE_ATTRIBUTES
                .iter()
                .filter_map(|name| attribute(&attributes, name))
                .any(|value| value.trim().eq_ignore_ascii_case("true"));
            if excluded {
                tracing::trace!(path, "reference marker excluded");
                return None;
            }
            Some(Marker::Reference { path })
        })
        .collect()
}

fn parse_attributes(text: &str) -> Vec<(String, String)> {
    attribute_regex()
        .captures_iter(text)
        .map(|caps| {
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            (caps[1].to_lowercase(), value)
        })
        .collect()
}

fn attribute<'a>(attributes: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(path: &str) -> Marker {
        Marker::Reference {
            path: path.to_string(),
        }
    }

    #[test]
    fn test_reference_forms() {
        let text = r#"
/// <reference path="a.js" />
// <reference path='b.js'/>
/* <reference path="c.js" /> */
   ///<Reference Path="d.js" >
var x = '<reference path="not-a-marker.js" />';
"#;
        assert_eq!(
            scan(text),
            vec![reference("a.js"), reference("b.js"), reference("c.js"), reference("d.js")]
        );
    }

    #[test]
    fn test_both_exclude_spellings_honored() {
        let text = r#"
/// <reference path="a.js" jsharness-exclude="true" />
/// <reference path="b.js" jsharnessExclude="TRUE" />
/// <reference path="c.js" jsharness-exclude="false" />
"#;
        assert_eq!(scan(text), vec![reference("c.js")]);
    }

    #[test]
    fn test_template_marker() {
        let text = r#"// <template path="row.html" id="row" type="text/x-tmpl" mode="script" />"#;
        assert_eq!(
            scan(text),
            vec![Marker::Template {
                path: "row.html".to_string(),
                options: TemplateOptions {
                    mode: TemplateMode::Script,
                    id: Some("row".to_string()),
                    script_type: Some("text/x-tmpl".to_string()),
                },
            }]
        );
    }

    #[test]
    fn test_marker_without_path_is_ignored() {
        assert!(scan(r#"/// <reference types="node" />"#).is_empty());
    }
}
