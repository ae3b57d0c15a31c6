//! Textual metadata (tEXt, zTXt, iTXt).

use std::collections::BTreeMap;

/// Longest keyword a text chunk can carry.
pub const MAX_KEYWORD_LEN: usize = 79;

/// Values shorter than this are stored uncompressed.
const COMPRESSION_THRESHOLD: usize = 40;

/// Ordered key/value pairs in chunk encounter order. Keys may repeat.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetadataEntries {
    entries: Vec<(String, String)>,
}

impl MetadataEntries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    /// Append all entries of `other`, preserving order.
    pub fn extend(&mut self, other: MetadataEntries) {
        self.entries.extend(other.entries);
    }

    /// Value of the first entry with `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Human-readable summary: `key: value` pairs separated by blank lines,
    /// values with whitespace simplified.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.entries {
            if !out.is_empty() {
                out.push_str("\n\n");
            }
            out.push_str(key);
            out.push_str(": ");
            out.push_str(&simplify_whitespace(value));
        }
        out
    }
}

/// Trim and collapse every internal whitespace run to a single space.
pub fn simplify_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Wire encoding chosen for one text entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextEncoding {
    /// tEXt
    Latin1,
    /// zTXt
    Latin1Compressed,
    /// iTXt, uncompressed
    Unicode,
    /// iTXt, compressed
    UnicodeCompressed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct TextChunkPlan {
    pub key: String,
    pub value: String,
    pub encoding: TextEncoding,
}

/// Whether `value` cannot be represented as printable Latin-1.
fn needs_unicode(value: &str) -> bool {
    value.chars().any(|c| {
        let c = c as u32;
        c > 0xff || (c < 0x20 && c != u32::from(b'\n')) || (0x7f..0xa0).contains(&c)
    })
}

pub(crate) fn choose_encoding(value: &str) -> TextEncoding {
    let short = value.chars().count() < COMPRESSION_THRESHOLD;
    match (needs_unicode(value), short) {
        (false, true) => TextEncoding::Latin1,
        (false, false) => TextEncoding::Latin1Compressed,
        (true, true) => TextEncoding::Unicode,
        (true, false) => TextEncoding::UnicodeCompressed,
    }
}

/// Keyword as stored on disk: Latin-1, at most 79 characters.
pub(crate) fn wire_keyword(key: &str) -> String {
    key.trim()
        .chars()
        .map(|c| if (c as u32) <= 0xff { c } else { '?' })
        .take(MAX_KEYWORD_LEN)
        .collect()
}

/// Split a description summary back into key/value pairs.
///
/// Segments are separated by blank lines. A segment with no colon, or with a
/// space before its first colon, is stored under `Description`.
pub(crate) fn parse_description(description: &str) -> BTreeMap<String, String> {
    let mut text = BTreeMap::new();
    for pair in description.split("\n\n").filter(|p| !p.is_empty()) {
        let colon = pair.find(':');
        let space = pair.find(' ');
        match colon {
            Some(index) if !space.is_some_and(|s| s < index) => {
                let key = &pair[..index];
                if !key.trim().is_empty() {
                    let value = pair.get(index + 2..).unwrap_or("");
                    text.insert(key.to_owned(), simplify_whitespace(value));
                }
            }
            _ => {
                if !pair.trim().is_empty() {
                    text.insert("Description".to_owned(), simplify_whitespace(pair));
                }
            }
        }
    }
    text
}

/// Chunks to write for a buffer's metadata plus a caller description.
///
/// Description pairs take precedence over buffer entries with the same key.
/// Output is sorted by key.
pub(crate) fn plan_text_chunks(
    entries: &MetadataEntries,
    description: &str,
) -> Vec<TextChunkPlan> {
    let mut text = parse_description(description);
    for (key, value) in entries.iter() {
        if !key.is_empty() && !text.contains_key(key) {
            text.insert(key.to_owned(), value.to_owned());
        }
    }
    text.into_iter()
        .filter_map(|(key, value)| {
            let key = wire_keyword(&key);
            if key.is_empty() {
                return None;
            }
            let encoding = choose_encoding(&value);
            Some(TextChunkPlan {
                key,
                value,
                encoding,
            })
        })
        .collect()
}
