//! Frontmatter parsing for markdown posts.
//!
//! A frontmatter block is a run of `key: value` lines between two lines that
//! consist of `---`, at the very start of the document. Parsing is total:
//! anything that isn't a well-formed block is treated as plain body text.

use std::collections::BTreeMap;

const DELIMITER: &str = "---";

/// A document split into its metadata block and body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frontmatter {
  pub metadata: BTreeMap<String, String>,
  pub body: String,
}

impl Frontmatter {
  /// Look up a metadata value, treating empty values as missing.
  pub fn get(&self, key: &str) -> Option<&str> {
    self
      .metadata
      .get(key)
      .map(String::as_str)
      .filter(|v| !v.is_empty())
  }
}

/// Split `raw` into frontmatter metadata and body.
///
/// - Missing opening or closing delimiter: no metadata, the whole (trimmed)
///   input is the body.
/// - Keys are split at the first colon, so values may contain colons.
/// - Lines without a colon, or with an empty key, are ignored.
/// - If a key repeats, the first occurrence wins.
/// - Matching single or double quotes around a value are removed.
pub fn parse_frontmatter(raw: &str) -> Frontmatter {
  let plain = || Frontmatter {
    metadata: BTreeMap::new(),
    body: raw.trim().to_string(),
  };

  let mut lines = raw.trim_start().lines();
  match lines.next() {
    Some(first) if first.trim() == DELIMITER => {}
    _ => return plain(),
  }

  let mut metadata = BTreeMap::new();
  let mut closed = false;
  for line in lines.by_ref() {
    if line.trim() == DELIMITER {
      closed = true;
      break;
    }
    let Some((key, value)) = line.split_once(':') else {
      continue;
    };
    let key = key.trim();
    if key.is_empty() {
      continue;
    }
    metadata
      .entry(key.to_string())
      .or_insert_with(|| unquote(value.trim()).to_string());
  }

  if !closed {
    return plain();
  }

  let body = lines.collect::<Vec<_>>().join("\n").trim().to_string();
  Frontmatter { metadata, body }
}

/// Build a document with a frontmatter block followed by `body`.
///
/// Line breaks inside values are flattened to spaces so every field stays on
/// its own line. Empty values are omitted.
pub fn render_frontmatter(metadata: &BTreeMap<String, String>, body: &str) -> String {
  let mut out = String::from(DELIMITER);
  out.push('\n');
  for (key, value) in metadata {
    let value = value.replace(['\r', '\n'], " ");
    let value = value.trim();
    if value.is_empty() {
      continue;
    }
    out.push_str(key);
    out.push_str(": ");
    out.push_str(value);
    out.push('\n');
  }
  out.push_str(DELIMITER);
  out.push_str("\n\n");
  out.push_str(body.trim());
  out.push('\n');
  out
}

fn unquote(value: &str) -> &str {
  for quote in ['"', '\''] {
    if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
      return &value[1..value.len() - 1];
    }
  }
  value
}
