//! Normalization applied to source rows before they are embedded and stored.

use crate::types::SourceRecord;

/// Trait for source row cleaning strategies.
pub trait Cleaner: Send + Sync {
    /// Cleans the input row and returns a normalized version.
    fn clean(&self, row: SourceRecord) -> SourceRecord;

    /// Returns the cleaner name.
    fn name(&self) -> &'static str;
}

/// Default cleaner used by the index builder.
///
/// It performs lightweight normalization on every text field:
/// - collapse runs of whitespace (including newlines) into a single space
/// - strip leading and trailing separator punctuation (`-`, `–`, `—`, `:`) left over from
///   scraped author lines
/// - drop empty keywords
#[derive(Debug, Clone, Default)]
pub struct BasicCleaner;

impl BasicCleaner {
    const SEPARATORS: &'static [char] = &[' ', '-', '–', '—', ':'];

    fn collapse_whitespace(text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn clean_field(text: &str) -> String {
        Self::collapse_whitespace(text)
            .trim_matches(Self::SEPARATORS)
            .to_string()
    }
}

impl Cleaner for BasicCleaner {
    fn clean(&self, row: SourceRecord) -> SourceRecord {
        SourceRecord {
            external_id: row.external_id.map(|id| id.trim().to_string()),
            title: Self::clean_field(&row.title),
            authors: Self::clean_field(&row.authors),
            keywords: row
                .keywords
                .iter()
                .map(|k| Self::clean_field(k))
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    fn name(&self) -> &'static str {
        "basic"
    }
}
