//! Indentation-structured documents (netplan YAML) as lines plus a section tree.
//!
//! The text patcher never needs a full YAML grammar. It needs to know where
//! each keyed block starts and ends, and to refuse documents whose
//! indentation does not fit a simple nesting model. [`ConfigDocument`]
//! measures every line once and records the blocks as [`Section`] nodes in a
//! flat arena with parent/child indices, so block boundaries are values and
//! never re-derived by scanning.

pub mod render;
pub mod structured;
pub mod text;

use std::path::Path;

use crate::error::{ProvisionError, Result};

/// Indentation step assumed for documents that have no nested lines yet.
pub const DEFAULT_STEP: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    Blank,
    Comment,
    /// `key:` or `key: value`.
    Key {
        key: String,
        has_value: bool,
        block_scalar: bool,
    },
    /// `- item`
    Item,
    /// Content that does not open a block (block scalar bodies, markers).
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub text: String,
    pub indent: usize,
    pub kind: LineKind,
}

impl Line {
    fn is_content(&self) -> bool {
        !matches!(self.kind, LineKind::Blank | LineKind::Comment)
    }
}

/// One key (or sequence item) and everything nested beneath it.
///
/// `start..end` covers the header line through the last content line of the
/// block; blank and comment lines trailing the block stay outside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub key: String,
    pub indent: usize,
    pub depth: usize,
    pub start: usize,
    pub end: usize,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub is_item: bool,
    pub has_value: bool,
    /// Inside a sequence item, where nesting is only required to be deeper.
    pub in_sequence: bool,
}

#[derive(Debug, Clone)]
pub struct ConfigDocument {
    lines: Vec<Line>,
    trailing_newline: bool,
    base: usize,
    step: usize,
    sections: Vec<Section>,
    roots: Vec<usize>,
}

impl ConfigDocument {
    /// Measure `text` and build its section tree.
    ///
    /// `origin` is only used in error messages. Indentation that does not
    /// fit the nesting model is reported as `PatchAmbiguity`.
    pub fn parse(text: &str, origin: &Path) -> Result<Self> {
        let mut raw: Vec<&str> = text.split('\n').collect();
        let trailing_newline = text.ends_with('\n');
        if trailing_newline || text.is_empty() {
            raw.pop();
        }

        let mut lines = Vec::with_capacity(raw.len());
        let mut opaque_above: Option<usize> = None;
        for (index, text) in raw.iter().enumerate() {
            let line = measure(text, index + 1, &mut opaque_above, origin)?;
            lines.push(line);
        }

        let mut doc = ConfigDocument {
            lines,
            trailing_newline,
            base: 0,
            step: DEFAULT_STEP,
            sections: Vec::new(),
            roots: Vec::new(),
        };
        doc.build_tree(origin)?;
        Ok(doc)
    }

    fn build_tree(&mut self, origin: &Path) -> Result<()> {
        let structural = |l: &Line| matches!(l.kind, LineKind::Key { .. } | LineKind::Item);
        if let Some(first) = self.lines.iter().find(|l| structural(l)) {
            self.base = first.indent;
        }
        if let Some(nested) = self
            .lines
            .iter()
            .find(|l| structural(l) && l.indent > self.base)
        {
            self.step = nested.indent - self.base;
        }

        let mut stack: Vec<usize> = Vec::new();
        for index in 0..self.lines.len() {
            let line = &self.lines[index];
            if !line.is_content() {
                continue;
            }
            let number = index + 1;
            let indent = line.indent;
            let kind = line.kind.clone();

            match &kind {
                LineKind::Other => {}
                LineKind::Key { .. } | LineKind::Item => {
                    if indent < self.base {
                        return Err(ProvisionError::ambiguity(
                            origin,
                            number,
                            "line is shallower than the document root",
                        ));
                    }
                    let is_item = matches!(kind, LineKind::Item);
                    while let Some(&top) = stack.last() {
                        let open = &self.sections[top];
                        let belongs = open.indent < indent
                            || (is_item && open.indent == indent && !open.is_item && !open.has_value);
                        if belongs {
                            break;
                        }
                        stack.pop();
                    }
                    let parent = stack.last().copied();
                    self.check_nesting(parent, indent, is_item, number, origin)?;

                    let (key, has_value) = match &kind {
                        LineKind::Key { key, has_value, .. } => (key.clone(), *has_value),
                        _ => ("-".to_string(), true),
                    };
                    let in_sequence = parent
                        .map(|p| self.sections[p].is_item || self.sections[p].in_sequence)
                        .unwrap_or(false);
                    let id = self.sections.len();
                    self.sections.push(Section {
                        key,
                        indent,
                        depth: stack.len(),
                        start: index,
                        end: index + 1,
                        parent,
                        children: Vec::new(),
                        is_item,
                        has_value,
                        in_sequence,
                    });
                    match parent {
                        Some(p) => self.sections[p].children.push(id),
                        None => self.roots.push(id),
                    }
                    stack.push(id);
                }
                LineKind::Blank | LineKind::Comment => unreachable!("filtered above"),
            }

            for &open in &stack {
                self.sections[open].end = index + 1;
            }
        }
        Ok(())
    }

    fn check_nesting(
        &self,
        parent: Option<usize>,
        indent: usize,
        is_item: bool,
        number: usize,
        origin: &Path,
    ) -> Result<()> {
        let Some(parent) = parent else {
            if indent != self.base {
                return Err(ProvisionError::ambiguity(
                    origin,
                    number,
                    "top-level line is indented deeper than the first key",
                ));
            }
            return Ok(());
        };
        let parent = &self.sections[parent];
        if parent.is_item || parent.in_sequence {
            return Ok(());
        }
        if parent.has_value {
            return Err(ProvisionError::ambiguity(
                origin,
                number,
                format!("nested under '{}', which already has a value", parent.key),
            ));
        }
        if (indent - self.base) % self.step != 0 {
            return Err(ProvisionError::ambiguity(
                origin,
                number,
                format!(
                    "indentation {} is not a multiple of the document step {}",
                    indent, self.step
                ),
            ));
        }
        let compact_item = is_item && indent == parent.indent;
        if !compact_item && indent != parent.indent + self.step {
            return Err(ProvisionError::ambiguity(
                origin,
                number,
                format!("nested more than one level below '{}'", parent.key),
            ));
        }
        Ok(())
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    /// Indentation added per nesting level.
    pub fn step(&self) -> usize {
        self.step
    }

    pub fn trailing_newline(&self) -> bool {
        self.trailing_newline
    }

    /// First keyed section named `key` directly under `parent` (or at top level).
    pub fn find_child(&self, parent: Option<usize>, key: &str) -> Option<usize> {
        let candidates = match parent {
            Some(p) => &self.sections[p].children,
            None => &self.roots,
        };
        candidates
            .iter()
            .copied()
            .find(|&id| !self.sections[id].is_item && self.sections[id].key == key)
    }

    /// Indentation a new child of `parent` would get.
    pub fn child_indent(&self, parent: Option<usize>) -> usize {
        match parent {
            Some(p) => self.sections[p].indent + self.step,
            None => self.base,
        }
    }
}

fn measure(text: &str, number: usize, opaque_above: &mut Option<usize>, origin: &Path) -> Result<Line> {
    let visible = text.trim_end_matches('\r');
    let indent = visible.len() - visible.trim_start_matches(' ').len();
    let rest = &visible[indent..];

    if rest.trim().is_empty() {
        return Ok(Line {
            text: text.to_string(),
            indent,
            kind: LineKind::Blank,
        });
    }
    if let Some(limit) = *opaque_above {
        if indent > limit {
            return Ok(Line {
                text: text.to_string(),
                indent,
                kind: LineKind::Other,
            });
        }
        *opaque_above = None;
    }
    if rest.starts_with('\t') {
        return Err(ProvisionError::ambiguity(
            origin,
            number,
            "tab character in indentation",
        ));
    }

    let kind = classify(rest);
    if let LineKind::Key {
        block_scalar: true, ..
    } = kind
    {
        *opaque_above = Some(indent);
    }
    Ok(Line {
        text: text.to_string(),
        indent,
        kind,
    })
}

fn classify(rest: &str) -> LineKind {
    if rest.starts_with('#') {
        return LineKind::Comment;
    }
    if rest == "-" || rest.starts_with("- ") {
        return LineKind::Item;
    }
    if rest == "---" || rest == "..." {
        return LineKind::Other;
    }
    match split_key(rest) {
        Some((key, value)) => {
            let value = value.trim();
            let has_value = !value.is_empty() && !value.starts_with('#');
            LineKind::Key {
                key,
                has_value,
                block_scalar: value.starts_with('|') || value.starts_with('>'),
            }
        }
        None => LineKind::Other,
    }
}

/// Split `key: rest` into the unquoted key and everything after the colon.
pub(crate) fn split_key(rest: &str) -> Option<(String, &str)> {
    let (key, after) = match rest.chars().next()? {
        '"' => {
            let mut key = String::new();
            let mut escaped = false;
            let mut close = None;
            for (i, c) in rest.char_indices().skip(1) {
                if escaped {
                    key.push(match c {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    });
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == '"' {
                    close = Some(i);
                    break;
                } else {
                    key.push(c);
                }
            }
            (key, &rest[close? + 1..])
        }
        '\'' => {
            let mut key = String::new();
            let mut chars = rest.char_indices().skip(1).peekable();
            let mut close = None;
            while let Some((i, c)) = chars.next() {
                if c == '\'' {
                    if matches!(chars.peek(), Some((_, '\''))) {
                        key.push('\'');
                        chars.next();
                        continue;
                    }
                    close = Some(i);
                    break;
                }
                key.push(c);
            }
            (key, &rest[close? + 1..])
        }
        '{' | '[' | '&' | '*' | '!' | '|' | '>' | '%' | '@' | '`' => return None,
        _ => {
            let bytes = rest.as_bytes();
            let colon = (0..bytes.len()).find(|&i| {
                bytes[i] == b':' && matches!(bytes.get(i + 1), None | Some(b' ') | Some(b'\t'))
            })?;
            let key = rest[..colon].trim_end();
            if key.is_empty() || key.contains(" #") {
                return None;
            }
            return Some((key.to_string(), &rest[colon + 1..]));
        }
    };

    let after = after.trim_start_matches(' ');
    let value = after.strip_prefix(':')?;
    if !(value.is_empty() || value.starts_with(' ') || value.starts_with('\t')) {
        return None;
    }
    Some((key, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    const NETPLAN: &str = "\
network:
  version: 2
  renderer: networkd
  wifis:
    wlan0:
      dhcp4: true
      access-points:
        \"old\":
          password: \"secret123\"

  ethernets:
    eth0:
      dhcp4: true
";

    fn parse(text: &str) -> Result<ConfigDocument> {
        ConfigDocument::parse(text, Path::new("30-wifis-dhcp.yaml"))
    }

    #[test]
    fn test_parse_builds_section_tree() {
        let doc = parse(NETPLAN).unwrap();

        assert_eq!(doc.step(), 2);
        assert_eq!(doc.roots().len(), 1);
        let network = doc.find_child(None, "network").unwrap();
        let wifis = doc.find_child(Some(network), "wifis").unwrap();
        let wlan0 = doc.find_child(Some(wifis), "wlan0").unwrap();
        let section = &doc.sections()[wlan0];

        assert_eq!(section.start, 4);
        // The blank line after the block is not part of it.
        assert_eq!(section.end, 9);
        assert_eq!(section.depth, 2);
        assert_eq!(section.parent, Some(wifis));
        assert_eq!(doc.sections()[wifis].end, 9);
        assert_eq!(doc.sections()[network].end, 13);
    }

    #[test]
    fn test_quoted_keys_are_unquoted() {
        let doc = parse(NETPLAN).unwrap();
        let network = doc.find_child(None, "network").unwrap();
        let wifis = doc.find_child(Some(network), "wifis").unwrap();
        let wlan0 = doc.find_child(Some(wifis), "wlan0").unwrap();
        let aps = doc.find_child(Some(wlan0), "access-points").unwrap();

        assert!(doc.find_child(Some(aps), "old").is_some());
    }

    #[test]
    fn test_empty_document_has_no_sections() {
        let doc = parse("").unwrap();
        assert!(doc.lines().is_empty());
        assert!(doc.roots().is_empty());
        assert_eq!(doc.step(), DEFAULT_STEP);
    }

    #[test]
    fn test_four_space_step_is_detected() {
        let doc = parse("network:\n    version: 2\n    wifis:\n        wlan0: {}\n").unwrap();
        assert_eq!(doc.step(), 4);
    }

    #[test]
    fn test_indentation_not_multiple_of_step_is_ambiguous() {
        let err = parse("network:\n  version: 2\n   renderer: networkd\n").unwrap_err();
        assert!(matches!(err, ProvisionError::PatchAmbiguity { line: 3, .. }));
    }

    #[test]
    fn test_child_shallower_than_root_is_ambiguous() {
        let err = parse("  network:\n    version: 2\nwifis:\n").unwrap_err();
        assert!(matches!(err, ProvisionError::PatchAmbiguity { line: 3, .. }));
    }

    #[test]
    fn test_skipped_level_is_ambiguous() {
        let err = parse("network:\n  wifis:\n      wlan0:\n").unwrap_err();
        assert!(matches!(err, ProvisionError::PatchAmbiguity { line: 3, .. }));
    }

    #[test]
    fn test_tab_indentation_is_ambiguous() {
        let err = parse("network:\n\tversion: 2\n").unwrap_err();
        assert!(matches!(err, ProvisionError::PatchAmbiguity { line: 2, .. }));
    }

    #[test]
    fn test_sequences_and_block_scalars_are_tolerated() {
        let text = "\
network:
  ethernets:
    eth0:
      addresses:
      - 10.0.0.2/24
      routes:
        - to: default
          via: 10.0.0.1
      description: |
         free   form
        text
  version: 2
";
        let doc = parse(text).unwrap();
        let network = doc.find_child(None, "network").unwrap();
        assert!(doc.find_child(Some(network), "version").is_some());
        let ethernets = doc.find_child(Some(network), "ethernets").unwrap();
        assert_eq!(doc.sections()[ethernets].end, 11);
    }

    #[test]
    fn test_split_key_variants() {
        assert_eq!(split_key("dhcp4: true"), Some(("dhcp4".into(), " true")));
        assert_eq!(split_key("wifis:"), Some(("wifis".into(), "")));
        assert_eq!(
            split_key("\"home net\":"),
            Some(("home net".into(), ""))
        );
        assert_eq!(split_key("'it''s':"), Some(("it's".into(), "")));
        assert_eq!(split_key("url: http://x"), Some(("url".into(), " http://x")));
        assert_eq!(split_key("no colon here"), None);
        assert_eq!(split_key("{a: 1}"), None);
    }
}
