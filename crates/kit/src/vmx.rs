//! Line-oriented model of VMware configuration files
//!
//! `.vmx` files and virtual disk descriptors (`.vmdk` text files) are lists
//! of `key = "value"` lines, plus comments, blank lines and (in descriptors)
//! extent lines such as `RW 83886080 VMFS "vm-flat.vmdk"`. Quoted values
//! escape special characters as `|XX` hex pairs (`"` is `|22`).
//!
//! Lines that are not modified are written back byte for byte.

use std::fmt::Write as _;

/// One line of a configuration file
#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    /// `key = value`
    Entry {
        key: String,
        value: String,
        quoted: bool,
        /// Original text, dropped once the entry is modified
        original: Option<String>,
    },
    /// Anything else, kept verbatim
    Other(String),
}

/// A parsed configuration file
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VmxFile {
    lines: Vec<Line>,
    trailing_newline: bool,
}

/// Decode `|XX` escapes in a quoted value
pub fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(pos) = rest.find('|') {
        out.push_str(&rest[..pos]);
        let hex = rest.get(pos + 1..pos + 3);
        match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
            Some(b) if b.is_ascii() => {
                out.push(b as char);
                rest = &rest[pos + 3..];
            }
            _ => {
                out.push('|');
                rest = &rest[pos + 1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Encode a value for use inside double quotes
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '"' | '|' | '#' => {
                let _ = write!(out, "|{:02X}", c as u32);
            }
            c if c.is_ascii_control() => {
                let _ = write!(out, "|{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

fn parse_line(raw: &str) -> Line {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Line::Other(raw.to_owned());
    }
    let Some((key, value)) = trimmed.split_once('=') else {
        return Line::Other(raw.to_owned());
    };
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return Line::Other(raw.to_owned());
    }
    let value = value.trim();
    let (value, quoted) = match value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
    {
        Some(inner) => (unescape(inner), true),
        None => (value.to_owned(), false),
    };
    Line::Entry {
        key: key.to_owned(),
        value,
        quoted,
        original: Some(raw.to_owned()),
    }
}

/// Rewrite `value` if it refers to `from`, see [`VmxFile::rename_references`].
///
/// Returns the new value, or `None` if the value does not refer to `from` or
/// already refers to `to`.
pub fn renamed(value: &str, from: &str, to: &str) -> Option<String> {
    if from.is_empty() || from == to || !value.starts_with(from) {
        return None;
    }
    if to.starts_with(from) && value.starts_with(to) {
        return None;
    }
    Some(format!("{to}{}", &value[from.len()..]))
}

/// Apply [`renamed`] to every double-quoted segment of a free-form line,
/// returning the new line and how many segments refer to `to` afterwards.
fn rename_quoted_segments(line: &str, from: &str, to: &str) -> (String, usize) {
    let mut out = String::with_capacity(line.len());
    let mut hits = 0;
    let mut rest = line;
    loop {
        let Some(start) = rest.find('"') else {
            out.push_str(rest);
            break;
        };
        let Some(len) = rest[start + 1..].find('"') else {
            out.push_str(rest);
            break;
        };
        let segment = &rest[start + 1..start + 1 + len];
        out.push_str(&rest[..=start]);
        match renamed(segment, from, to) {
            Some(new) => {
                out.push_str(&new);
                hits += 1;
            }
            None => {
                if segment.starts_with(to) {
                    hits += 1;
                }
                out.push_str(segment);
            }
        }
        out.push('"');
        rest = &rest[start + len + 2..];
    }
    (out, hits)
}

impl VmxFile {
    /// Parse file contents
    pub fn parse(content: &str) -> Self {
        Self {
            lines: content.lines().map(parse_line).collect(),
            trailing_newline: content.is_empty() || content.ends_with('\n'),
        }
    }

    /// Look up the (unescaped) value of `key`; keys compare case-insensitively
    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|l| match l {
            Line::Entry { key: k, value, .. } if k.eq_ignore_ascii_case(key) => {
                Some(value.as_str())
            }
            _ => None,
        })
    }

    /// Keys of all entries, in file order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().filter_map(|l| match l {
            Line::Entry { key, .. } => Some(key.as_str()),
            Line::Other(_) => None,
        })
    }

    /// Set `key` to the quoted `value`.
    ///
    /// The first existing entry is replaced in place and any duplicates are
    /// dropped; otherwise the entry is appended.
    pub fn set(&mut self, key: &str, value: &str) {
        let mut found = false;
        self.lines.retain_mut(|l| match l {
            Line::Entry {
                key: k,
                value: v,
                quoted,
                original,
            } if k.eq_ignore_ascii_case(key) => {
                if found {
                    return false;
                }
                found = true;
                if !(*quoted && v == value) {
                    *v = value.to_owned();
                    *quoted = true;
                    *original = None;
                }
                true
            }
            _ => true,
        });
        if !found {
            self.lines.push(Line::Entry {
                key: key.to_owned(),
                value: value.to_owned(),
                quoted: true,
                original: None,
            });
        }
    }

    /// Remove every entry whose key is in `keys`, returning how many were removed
    pub fn remove_keys(&mut self, keys: &[&str]) -> usize {
        let before = self.lines.len();
        self.lines.retain(|l| match l {
            Line::Entry { key, .. } => !keys.iter().any(|k| k.eq_ignore_ascii_case(key)),
            Line::Other(_) => true,
        });
        before - self.lines.len()
    }

    /// Rewrite every quoted value that starts with `from` to start with `to`
    /// instead, keeping the rest of the value.
    ///
    /// Quoted segments of non-entry lines (descriptor extents) are rewritten
    /// the same way. Values that already start with `to` are left alone, so
    /// running this twice changes nothing. Returns how many values refer to
    /// `to` afterwards.
    ///
    /// When `to` extends `from` this cannot tell an already renamed value from
    /// a source value that happens to start with `to`: renaming `app` to
    /// `app-2` leaves `app-2data.vmdk` untouched, because that is also what
    /// `appdata.vmdk` becomes. Pick a destination name that is not a prefix
    /// of any file name the source refers to.
    pub fn rename_references(&mut self, from: &str, to: &str) -> usize {
        let mut hits = 0;
        for line in self.lines.iter_mut() {
            match line {
                Line::Entry {
                    value,
                    quoted: true,
                    original,
                    ..
                } => {
                    if let Some(new) = renamed(value, from, to) {
                        *value = new;
                        *original = None;
                        hits += 1;
                    } else if value.starts_with(to) {
                        hits += 1;
                    }
                }
                Line::Entry { .. } => {}
                Line::Other(raw) => {
                    let (new, n) = rename_quoted_segments(raw, from, to);
                    *raw = new;
                    hits += n;
                }
            }
        }
        hits
    }

    /// Render the file
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, line) in self.lines.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            match line {
                Line::Entry {
                    original: Some(raw),
                    ..
                }
                | Line::Other(raw) => out.push_str(raw),
                Line::Entry {
                    key,
                    value,
                    quoted: true,
                    original: None,
                } => {
                    let _ = write!(out, "{key} = \"{}\"", escape(value));
                }
                Line::Entry {
                    key,
                    value,
                    quoted: false,
                    original: None,
                } => {
                    let _ = write!(out, "{key} = {value}");
                }
            }
        }
        if self.trailing_newline && !self.lines.is_empty() {
            out.push('\n');
        }
        out
    }
}
