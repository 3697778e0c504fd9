//! Colon-delimited record databases: passwd, shadow, group, gshadow.
//!
//! A [`RecordFile`] keeps every line it read. Lines that are never touched
//! are written back byte for byte; only entries that were changed are
//! re-rendered from their fields.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::backup::BackupSet;
use crate::error::{ProvisionError, Result};
use crate::executor::files::{read_optional, write_atomic, WriteOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Passwd,
    Shadow,
    Group,
    Gshadow,
}

impl RecordKind {
    /// Number of colon-separated fields per entry.
    pub fn arity(self) -> usize {
        match self {
            RecordKind::Passwd => 7,
            RecordKind::Shadow => 9,
            RecordKind::Group | RecordKind::Gshadow => 4,
        }
    }

    /// Location relative to the root of the target filesystem.
    pub fn relative_path(self) -> &'static str {
        match self {
            RecordKind::Passwd => "etc/passwd",
            RecordKind::Shadow => "etc/shadow",
            RecordKind::Group => "etc/group",
            RecordKind::Gshadow => "etc/gshadow",
        }
    }

    /// Mode for a file this crate creates from scratch.
    pub fn default_mode(self) -> u32 {
        match self {
            RecordKind::Passwd | RecordKind::Group => 0o644,
            RecordKind::Shadow | RecordKind::Gshadow => 0o640,
        }
    }

    /// Field holding the numeric id, if the kind has one.
    pub fn id_field(self) -> Option<usize> {
        match self {
            RecordKind::Passwd | RecordKind::Group => Some(2),
            RecordKind::Shadow | RecordKind::Gshadow => None,
        }
    }

    /// Field holding the comma-separated member list, if the kind has one.
    pub fn member_field(self) -> Option<usize> {
        match self {
            RecordKind::Group | RecordKind::Gshadow => Some(3),
            RecordKind::Passwd | RecordKind::Shadow => None,
        }
    }

    /// Fields of a freshly created group entry.
    fn group_template(self, key: &str, id: Option<u32>, member: &str) -> Option<Vec<String>> {
        match self {
            RecordKind::Group => Some(vec![
                key.to_string(),
                "x".to_string(),
                id.map(|id| id.to_string()).unwrap_or_default(),
                member.to_string(),
            ]),
            RecordKind::Gshadow => Some(vec![
                key.to_string(),
                "!".to_string(),
                String::new(),
                member.to_string(),
            ]),
            RecordKind::Passwd | RecordKind::Shadow => None,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordKind::Passwd => "passwd",
            RecordKind::Shadow => "shadow",
            RecordKind::Group => "group",
            RecordKind::Gshadow => "gshadow",
        };
        f.write_str(name)
    }
}

/// Reject values that would split or end a record.
pub fn validate_field(value: &str) -> Result<()> {
    if value.contains([':', '\n', '\r']) {
        return Err(ProvisionError::validation(
            "record field",
            format!("'{}' contains ':' or a line break", value.escape_debug()),
        ));
    }
    Ok(())
}

/// One entry: an ordered list of fields, the first being the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordEntry {
    fields: Vec<String>,
}

impl RecordEntry {
    pub fn new<I, S>(fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        for field in &fields {
            validate_field(field)?;
        }
        match fields.first() {
            Some(key) if !key.is_empty() => Ok(Self { fields }),
            _ => Err(ProvisionError::validation("record key", "must not be empty")),
        }
    }

    fn parse(line: &str) -> Self {
        Self {
            fields: line.split(':').map(str::to_string).collect(),
        }
    }

    pub fn key(&self) -> &str {
        &self.fields[0]
    }

    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn render(&self) -> String {
        self.fields.join(":")
    }
}

#[derive(Debug, Clone)]
enum RecordLine {
    /// `raw` holds the original text until the entry is modified.
    Entry {
        entry: RecordEntry,
        raw: Option<String>,
        /// The line ended in `\r\n`; kept when the entry is re-rendered.
        crlf: bool,
    },
    /// Blank lines, comments and NIS `+`/`-` lines.
    Verbatim(String),
}

/// Whether [`RecordFile::add_member`] had anything to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberOutcome {
    Added,
    AlreadyMember,
    /// The group did not exist and was created with the member in it.
    Created { id: Option<u32> },
}

#[derive(Debug, Clone)]
pub struct RecordFile {
    path: PathBuf,
    kind: RecordKind,
    lines: Vec<RecordLine>,
    trailing_newline: bool,
}

impl RecordFile {
    /// Read `path`. A missing file loads as empty and is created on save.
    pub fn load(path: &Path, kind: RecordKind) -> Result<Self> {
        let text = read_optional(path)?.unwrap_or_default();
        Self::parse(path, &text, kind)
    }

    /// Parse `text` as the content of `path`.
    ///
    /// Entries with the wrong number of fields are `MalformedRecord`;
    /// a key that appears twice is `DuplicateKey`.
    pub fn parse(path: &Path, text: &str, kind: RecordKind) -> Result<Self> {
        let mut file = RecordFile {
            path: path.to_path_buf(),
            kind,
            lines: Vec::new(),
            trailing_newline: text.is_empty() || text.ends_with('\n'),
        };

        let body = text.strip_suffix('\n').unwrap_or(text);
        let lines = if text.is_empty() { None } else { Some(body.split('\n')) };
        for (index, line) in lines.into_iter().flatten().enumerate() {
            let content = line.strip_suffix('\r');
            let crlf = content.is_some();
            let content = content.unwrap_or(line);
            if content.trim().is_empty() || content.starts_with(['#', '+', '-']) {
                file.lines.push(RecordLine::Verbatim(line.to_string()));
                continue;
            }
            let entry = RecordEntry::parse(content);
            if entry.len() != kind.arity() {
                return Err(ProvisionError::MalformedRecord {
                    path: path.to_path_buf(),
                    line: index + 1,
                    reason: format!(
                        "expected {} fields for {}, found {}",
                        kind.arity(),
                        kind,
                        entry.len()
                    ),
                });
            }
            if file.contains(entry.key()) {
                return Err(ProvisionError::DuplicateKey {
                    path: path.to_path_buf(),
                    key: entry.key().to_string(),
                });
            }
            file.lines.push(RecordLine::Entry {
                entry,
                raw: Some(line.to_string()),
                crlf,
            });
        }
        Ok(file)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    pub fn entries(&self) -> impl Iterator<Item = &RecordEntry> {
        self.lines.iter().filter_map(|line| match line {
            RecordLine::Entry { entry, .. } => Some(entry),
            RecordLine::Verbatim(_) => None,
        })
    }

    pub fn get(&self, key: &str) -> Option<&RecordEntry> {
        self.entries().find(|entry| entry.key() == key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn entry_mut(&mut self, key: &str) -> Option<(&mut RecordEntry, &mut Option<String>)> {
        self.lines.iter_mut().find_map(|line| match line {
            RecordLine::Entry { entry, raw, .. } if entry.key() == key => Some((entry, raw)),
            _ => None,
        })
    }

    /// Append `entry` as a new last line.
    pub fn append_entry(&mut self, entry: RecordEntry) -> Result<()> {
        if entry.len() != self.kind.arity() {
            return Err(ProvisionError::MalformedRecord {
                path: self.path.clone(),
                line: self.lines.len() + 1,
                reason: format!(
                    "new {} entry '{}' has {} fields, expected {}",
                    self.kind,
                    entry.key(),
                    entry.len(),
                    self.kind.arity()
                ),
            });
        }
        if self.contains(entry.key()) {
            return Err(ProvisionError::DuplicateKey {
                path: self.path.clone(),
                key: entry.key().to_string(),
            });
        }
        debug!(file = %self.kind, key = entry.key(), "appending entry");
        self.lines.push(RecordLine::Entry {
            entry,
            raw: None,
            crlf: false,
        });
        Ok(())
    }

    /// Replace field `index` of the entry keyed `key`.
    ///
    /// Returns whether the value actually changed.
    pub fn update_field(&mut self, key: &str, index: usize, value: &str) -> Result<bool> {
        validate_field(value)?;
        if index == 0 || index >= self.kind.arity() {
            return Err(ProvisionError::validation(
                "record field",
                format!("index {} cannot be updated in {}", index, self.kind),
            ));
        }
        let path = self.path.clone();
        let (entry, raw) = self.entry_mut(key).ok_or_else(|| ProvisionError::KeyNotFound {
            path,
            key: key.to_string(),
        })?;
        if entry.fields[index] == value {
            return Ok(false);
        }
        entry.fields[index] = value.to_string();
        *raw = None;
        Ok(true)
    }

    /// Smallest integer `>= baseline` not used at `field` by any entry.
    pub fn allocate_id(&self, field: usize, baseline: u32) -> u32 {
        let used: std::collections::BTreeSet<u32> = self
            .entries()
            .filter_map(|entry| entry.field(field)?.parse().ok())
            .collect();
        (baseline..=u32::MAX)
            .find(|id| !used.contains(id))
            .unwrap_or(u32::MAX)
    }

    /// Add `member` to the membership list of `group`.
    ///
    /// The list keeps first-insertion order and holds each name once. A
    /// missing group is created with an id allocated from `baseline` and
    /// `member` as its only member.
    pub fn add_member(&mut self, group: &str, member: &str, baseline: u32) -> Result<MemberOutcome> {
        validate_field(member)?;
        if member.contains(',') {
            return Err(ProvisionError::validation(
                "group member",
                format!("'{}' contains ','", member),
            ));
        }
        let Some(field) = self.kind.member_field() else {
            return Err(ProvisionError::validation(
                "group member",
                format!("{} entries have no member list", self.kind),
            ));
        };

        if let Some((entry, raw)) = self.entry_mut(group) {
            let current = &entry.fields[field];
            if current.split(',').any(|m| m == member) {
                return Ok(MemberOutcome::AlreadyMember);
            }
            let updated = if current.is_empty() {
                member.to_string()
            } else {
                format!("{},{}", current, member)
            };
            entry.fields[field] = updated;
            *raw = None;
            return Ok(MemberOutcome::Added);
        }

        let id = self.kind.id_field().map(|f| self.allocate_id(f, baseline));
        let fields = self
            .kind
            .group_template(group, id, member)
            .ok_or_else(|| ProvisionError::validation("group", "kind has no group template"))?;
        self.append_entry(RecordEntry::new(fields)?)?;
        Ok(MemberOutcome::Created { id })
    }

    /// The file content as it would be written.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (index, line) in self.lines.iter().enumerate() {
            if index > 0 {
                out.push('\n');
            }
            match line {
                RecordLine::Verbatim(text) => out.push_str(text),
                RecordLine::Entry { raw: Some(raw), .. } => out.push_str(raw),
                RecordLine::Entry { entry, raw: None, crlf } => {
                    out.push_str(&entry.render());
                    if *crlf {
                        out.push('\r');
                    }
                }
            }
        }
        if self.trailing_newline && !self.lines.is_empty() {
            out.push('\n');
        }
        out
    }

    /// Write the file back if its content changed.
    ///
    /// The previous version is backed up first. An existing file keeps its
    /// mode and ownership; a new one gets the kind's default mode.
    pub fn save(&self, backups: &mut BackupSet) -> Result<WriteOutcome> {
        let content = self.render();
        let current = read_optional(&self.path)?;
        if current.as_deref() == Some(content.as_str()) {
            debug!(path = %self.path.display(), "record file unchanged");
            return Ok(WriteOutcome::Unchanged);
        }

        backups.ensure(&self.path)?;
        let mode = match current {
            Some(_) => None,
            None => Some(self.kind.default_mode()),
        };
        write_atomic(&self.path, content.as_bytes(), mode)?;
        info!(path = %self.path.display(), "record file written");
        Ok(if mode.is_some() {
            WriteOutcome::Created
        } else {
            WriteOutcome::Updated
        })
    }
}

/// Load, change and save `path` in one step.
///
/// Nothing is written when `change` fails or leaves the content as it was.
pub fn update<T>(
    path: &Path,
    kind: RecordKind,
    backups: &mut BackupSet,
    change: impl FnOnce(&mut RecordFile) -> Result<T>,
) -> Result<(T, WriteOutcome)> {
    let mut file = RecordFile::load(path, kind)?;
    let value = change(&mut file)?;
    let outcome = file.save(backups)?;
    Ok((value, outcome))
}
