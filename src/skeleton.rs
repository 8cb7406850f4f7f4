//! Per-file XML skeleton rendering
//!
//! Combines a structure outline (classes, methods, functions with line
//! ranges) with the raw file content wrapped in CDATA, one `<file>` section
//! per requested path.

use anyhow::Result;
use log::warn;

use crate::scope::{self, ScopeKind};

/// Escape `&`, `<`, `>`, `"`, and `'` for use in XML attribute values.
pub fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

/// Make text safe inside a CDATA section by splitting any `]]>` terminator.
fn escape_cdata(text: &str) -> String {
    text.replace("]]>", "]]]]><![CDATA[>")
}

/// Render an XML document describing the given files.
///
/// `fetch` maps a path to its text. Every input path gets a section in input
/// order; when `fetch` fails the section carries a placeholder comment as its
/// content instead of being dropped. Structure outlines are extracted for
/// `.py` paths only and omitted entirely when empty.
pub fn render<F>(paths: &[String], mut fetch: F) -> String
where
    F: FnMut(&str) -> Result<String>,
{
    let mut out: Vec<String> = vec!["<files>".to_string()];

    for path in paths {
        let content = match fetch(path) {
            Ok(text) => text,
            Err(err) => {
                warn!("error reading file {path}: {err:#}");
                format!("# Error reading file: {err:#}")
            }
        };

        out.push(format!("  <file path=\"{}\">", escape_xml(path)));

        let nodes = if path.ends_with(".py") {
            scope::build(&content)
        } else {
            Vec::new()
        };

        if !nodes.is_empty() {
            out.push("    <structure>".to_string());
            for node in &nodes {
                match node.kind {
                    ScopeKind::Class => {
                        out.push(format!(
                            "      <class name=\"{}\" start_line=\"{}\" end_line=\"{}\">",
                            escape_xml(&node.name),
                            node.start_line,
                            node.end_line
                        ));
                        for method in &node.children {
                            out.push(format!(
                                "        <method name=\"{}\" start_line=\"{}\" end_line=\"{}\" />",
                                escape_xml(&method.name),
                                method.start_line,
                                method.end_line
                            ));
                        }
                        out.push("      </class>".to_string());
                    }
                    ScopeKind::Function | ScopeKind::Method => {
                        out.push(format!(
                            "      <function name=\"{}\" start_line=\"{}\" end_line=\"{}\" />",
                            escape_xml(&node.name),
                            node.start_line,
                            node.end_line
                        ));
                    }
                }
            }
            out.push("    </structure>".to_string());
        }

        out.push("    <content><![CDATA[".to_string());
        out.push(escape_cdata(&content));
        out.push("    ]]></content>".to_string());
        out.push("  </file>".to_string());
    }

    out.push("</files>".to_string());
    out.join("\n")
}
