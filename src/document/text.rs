//! Find-or-insert of one keyed block inside an indentation-structured
//! document, without a YAML grammar.
//!
//! Lines outside the patched block are emitted exactly as they were read.
//! Tie-breaks:
//! - anchors and the child key resolve to their first match at the expected depth
//! - a missing top-level anchor appends the whole chain at the end of the document
//! - anything else that is missing is inserted directly after its parent header

use std::path::Path;

use serde_yaml::Value;
use tracing::debug;

use super::render::{format_key, render_entry};
use super::ConfigDocument;
use crate::error::{ProvisionError, Result};

/// What [`patch_block`] did to the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// The top-level anchor was missing; everything went to the end.
    Appended,
    /// The block (and any missing anchors) became the first child of its parent.
    Inserted,
    /// An existing block was replaced wholesale.
    Replaced,
    /// The existing block already matched line for line.
    Unchanged,
}

impl PatchOutcome {
    pub fn label(self) -> &'static str {
        match self {
            PatchOutcome::Appended => "appended",
            PatchOutcome::Inserted => "inserted",
            PatchOutcome::Replaced => "replaced",
            PatchOutcome::Unchanged => "unchanged",
        }
    }

    pub fn changed(self) -> bool {
        self != PatchOutcome::Unchanged
    }
}

/// Set `anchors.. / child_key` to `value` in `text`.
///
/// `origin` names the document in errors. Indentation that does not fit
/// the nesting model, or an anchor that carries an inline value, fails with
/// `PatchAmbiguity`.
pub fn patch_block(
    text: &str,
    origin: &Path,
    anchors: &[&str],
    child_key: &str,
    value: &Value,
) -> Result<(String, PatchOutcome)> {
    let doc = ConfigDocument::parse(text, origin)?;
    let step = doc.step();
    let sections = doc.sections();

    let mut parent: Option<usize> = None;
    for (depth, anchor) in anchors.iter().enumerate() {
        match doc.find_child(parent, anchor) {
            Some(id) => {
                let section = &sections[id];
                if section.has_value {
                    return Err(ProvisionError::ambiguity(
                        origin,
                        section.start + 1,
                        format!("'{}' has an inline value, expected a nested block", anchor),
                    ));
                }
                parent = Some(id);
            }
            None => {
                let block = render_chain(
                    &anchors[depth..],
                    child_key,
                    value,
                    doc.child_indent(parent),
                    step,
                );
                debug!(anchor = %anchor, "anchor missing, adding it");
                return Ok(splice_new(&doc, parent, block));
            }
        }
    }

    match doc.find_child(parent, child_key) {
        Some(id) => {
            let section = &sections[id];
            let block = render_entry(child_key, value, section.indent, step);
            let current = &doc.lines()[section.start..section.end];
            if current.len() == block.len()
                && current.iter().zip(&block).all(|(line, new)| &line.text == new)
            {
                return Ok((text.to_string(), PatchOutcome::Unchanged));
            }
            let mut out: Vec<&str> = doc.lines()[..section.start]
                .iter()
                .map(|l| l.text.as_str())
                .collect();
            out.extend(block.iter().map(String::as_str));
            out.extend(doc.lines()[section.end..].iter().map(|l| l.text.as_str()));
            Ok((join(&out, doc.trailing_newline()), PatchOutcome::Replaced))
        }
        None => {
            let block = render_entry(child_key, value, doc.child_indent(parent), step);
            Ok(splice_new(&doc, parent, block))
        }
    }
}

/// Header lines for each remaining anchor, then the block itself.
fn render_chain(
    anchors: &[&str],
    child_key: &str,
    value: &Value,
    indent: usize,
    step: usize,
) -> Vec<String> {
    let mut lines = Vec::new();
    let mut indent = indent;
    for anchor in anchors {
        lines.push(format!("{}{}:", " ".repeat(indent), format_key(anchor)));
        indent += step;
    }
    lines.extend(render_entry(child_key, value, indent, step));
    lines
}

/// Put `block` right after the header of `parent`, or at the end of the
/// document when there is no parent.
fn splice_new(doc: &ConfigDocument, parent: Option<usize>, block: Vec<String>) -> (String, PatchOutcome) {
    let lines = doc.lines();
    let (at, outcome) = match parent {
        Some(p) => (doc.sections()[p].start + 1, PatchOutcome::Inserted),
        None => (lines.len(), PatchOutcome::Appended),
    };
    let mut out: Vec<&str> = lines[..at].iter().map(|l| l.text.as_str()).collect();
    out.extend(block.iter().map(String::as_str));
    out.extend(lines[at..].iter().map(|l| l.text.as_str()));
    // A brand new document ends with a newline like any file we create.
    let trailing = doc.trailing_newline() || lines.is_empty();
    (join(&out, trailing), outcome)
}

fn join(lines: &[&str], trailing_newline: bool) -> String {
    let mut text = lines.join("\n");
    if trailing_newline && !lines.is_empty() {
        text.push('\n');
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> &'static Path {
        Path::new("30-wifis-dhcp.yaml")
    }

    fn mapping(yaml: &str) -> Value {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn wifi(ssid: &str, password: &str) -> Value {
        let mut ap = serde_yaml::Mapping::new();
        ap.insert(Value::from("password"), Value::from(password));
        let mut aps = serde_yaml::Mapping::new();
        aps.insert(Value::from(ssid), Value::Mapping(ap));
        let mut block = serde_yaml::Mapping::new();
        block.insert(Value::from("dhcp4"), Value::Bool(true));
        block.insert(Value::from("access-points"), Value::Mapping(aps));
        Value::Mapping(block)
    }

    fn patch_wlan0(text: &str, value: &Value) -> (String, PatchOutcome) {
        patch_block(text, origin(), &["network", "wifis"], "wlan0", value).unwrap()
    }

    const CONFIGURED: &str = "\
network:
  version: 2
  renderer: networkd
  wifis:
    wlan0:
      dhcp4: true
      access-points:
        \"old\":
          password: \"oldpass1\"
  ethernets:
    eth0:
      dhcp4: true
";

    #[test]
    fn test_empty_document_gets_minimal_tree() {
        let (out, outcome) = patch_wlan0("", &wifi("home net", "p@ss1234"));

        assert_eq!(outcome, PatchOutcome::Appended);
        assert_eq!(
            out,
            "network:\n  wifis:\n    wlan0:\n      dhcp4: true\n      access-points:\n        \"home net\":\n          password: \"p@ss1234\"\n"
        );

        let doc = ConfigDocument::parse(&out, origin()).unwrap();
        assert_eq!(doc.roots().len(), 1);
        let network = doc.find_child(None, "network").unwrap();
        assert_eq!(doc.sections()[network].children.len(), 1);
    }

    #[test]
    fn test_patch_is_idempotent() {
        let value = wifi("home net", "p@ss1234");
        for text in ["", CONFIGURED, "network:\n  version: 2\n", "# comment only\n"] {
            let (once, _) = patch_wlan0(text, &value);
            let (twice, outcome) = patch_wlan0(&once, &value);
            assert_eq!(once, twice, "second patch changed {text:?}");
            assert_eq!(outcome, PatchOutcome::Unchanged);
        }
    }

    #[test]
    fn test_existing_block_is_replaced_wholesale() {
        let (out, outcome) = patch_wlan0(CONFIGURED, &wifi("new", "newpass12"));

        assert_eq!(outcome, PatchOutcome::Replaced);
        assert!(!out.contains("\"old\""));
        assert!(!out.contains("oldpass1"));
        assert!(out.contains("        new:\n          password: newpass12\n"));
        assert!(out.starts_with("network:\n  version: 2\n  renderer: networkd\n  wifis:\n"));
        assert!(out.ends_with("  ethernets:\n    eth0:\n      dhcp4: true\n"));
    }

    #[test]
    fn test_sibling_keys_are_discarded_on_replace() {
        let text = "network:\n  wifis:\n    wlan0:\n      optional: true\n      dhcp4: false\n";

        let (out, _) = patch_wlan0(text, &mapping("dhcp4: true"));

        assert_eq!(out, "network:\n  wifis:\n    wlan0:\n      dhcp4: true\n");
    }

    #[test]
    fn test_first_match_wins_on_duplicate_keys() {
        let text = "network:\n  wifis:\n    wlan0:\n      dhcp4: false\n    wlan0:\n      dhcp4: no\n";

        let (out, outcome) = patch_wlan0(text, &mapping("dhcp4: true"));

        assert_eq!(outcome, PatchOutcome::Replaced);
        assert_eq!(
            out,
            "network:\n  wifis:\n    wlan0:\n      dhcp4: true\n    wlan0:\n      dhcp4: no\n"
        );
    }

    #[test]
    fn test_new_child_becomes_first_child() {
        let text = "network:\n  wifis:\n    wlan1:\n      dhcp4: true\n";

        let (out, outcome) = patch_wlan0(text, &mapping("dhcp4: true"));

        assert_eq!(outcome, PatchOutcome::Inserted);
        assert_eq!(
            out,
            "network:\n  wifis:\n    wlan0:\n      dhcp4: true\n    wlan1:\n      dhcp4: true\n"
        );
    }

    #[test]
    fn test_missing_intermediate_anchor_is_inserted_after_parent() {
        let text = "# managed by hand\nnetwork:\n  version: 2\n";

        let (out, outcome) = patch_wlan0(text, &mapping("dhcp4: true"));

        assert_eq!(outcome, PatchOutcome::Inserted);
        assert_eq!(
            out,
            "# managed by hand\nnetwork:\n  wifis:\n    wlan0:\n      dhcp4: true\n  version: 2\n"
        );
    }

    #[test]
    fn test_untouched_lines_are_verbatim() {
        let text = "network:    # root\n    ethernets:\n        eth0:   {dhcp4: true}\n";

        let (out, _) = patch_wlan0(text, &mapping("dhcp4: true"));

        assert_eq!(
            out,
            "network:    # root\n    wifis:\n        wlan0:\n            dhcp4: true\n    ethernets:\n        eth0:   {dhcp4: true}\n"
        );
    }

    #[test]
    fn test_missing_trailing_newline_is_kept() {
        let text = "network:\n  version: 2";

        let (out, outcome) =
            patch_block(text, origin(), &["network"], "renderer", &Value::from("networkd"))
                .unwrap();

        assert_eq!(outcome, PatchOutcome::Inserted);
        assert_eq!(out, "network:\n  renderer: networkd\n  version: 2");
    }

    #[test]
    fn test_scalar_children_build_standard_order() {
        let (text, _) = patch_wlan0("", &mapping("dhcp4: true"));
        let (text, _) =
            patch_block(&text, origin(), &["network"], "renderer", &Value::from("networkd"))
                .unwrap();
        let (text, _) = patch_block(&text, origin(), &["network"], "version", &Value::from(2)).unwrap();

        assert_eq!(
            text,
            "network:\n  version: 2\n  renderer: networkd\n  wifis:\n    wlan0:\n      dhcp4: true\n"
        );
    }

    #[test]
    fn test_anchor_with_inline_value_is_ambiguous() {
        let err = patch_block("network: {}\n", origin(), &["network", "wifis"], "wlan0", &mapping("dhcp4: true"))
            .unwrap_err();
        assert!(matches!(err, ProvisionError::PatchAmbiguity { line: 1, .. }));
    }

    #[test]
    fn test_malformed_document_is_not_patched() {
        let text = "network:\n  wifis:\n     wlan0:\n";
        let err = patch_block(text, origin(), &["network", "wifis"], "wlan0", &mapping("dhcp4: true"))
            .unwrap_err();
        assert!(matches!(err, ProvisionError::PatchAmbiguity { .. }));
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(PatchOutcome::Appended.label(), "appended");
        assert!(!PatchOutcome::Unchanged.changed());
        assert!(PatchOutcome::Replaced.changed());
    }
}
