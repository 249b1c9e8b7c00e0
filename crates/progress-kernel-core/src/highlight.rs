use serde::{Deserialize, Serialize};

/// One run of lesson text, either untouched or annotated with the glossary
/// term it matched.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TextSegment {
    Plain { text: String },
    Term { text: String, term: String },
}

impl TextSegment {
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Plain { text } | Self::Term { text, .. } => text,
        }
    }
}

fn is_word_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

fn word_bounded(text: &str, start: usize, end: usize) -> bool {
    let clear_before = text[..start].chars().next_back().map_or(true, |ch| !is_word_char(ch));
    let clear_after = text[end..].chars().next().map_or(true, |ch| !is_word_char(ch));
    clear_before && clear_after
}

fn overlaps(accepted: &[(usize, usize, &str)], start: usize, end: usize) -> bool {
    accepted
        .iter()
        .any(|&(accepted_start, accepted_end, _)| start < accepted_end && accepted_start < end)
}

/// Annotate whole-word key-term matches in lesson text.
///
/// Terms are tried longest first and a match overlapping an already-accepted
/// span is dropped, so "stack frame" beats "stack" wherever both apply.
/// Matching is ASCII-case-insensitive; word characters are `[A-Za-z0-9_]`.
/// Surviving matches come back in source order as alternating plain and term
/// segments, and concatenating every segment's text reproduces the input.
#[must_use]
pub fn annotate_key_terms(text: &str, terms: &[String]) -> Vec<TextSegment> {
    if text.is_empty() {
        return Vec::new();
    }

    let mut ordered_terms: Vec<&str> =
        terms.iter().map(String::as_str).filter(|term| !term.trim().is_empty()).collect();
    // Stable sort: equal-length terms keep the caller's precedence.
    ordered_terms.sort_by(|lhs, rhs| rhs.len().cmp(&lhs.len()));

    let mut accepted: Vec<(usize, usize, &str)> = Vec::new();
    for term in ordered_terms {
        for (start, _) in text.char_indices() {
            let end = start + term.len();
            if end > text.len() || !text.is_char_boundary(end) {
                continue;
            }
            if !text[start..end].eq_ignore_ascii_case(term) {
                continue;
            }
            if !word_bounded(text, start, end) || overlaps(&accepted, start, end) {
                continue;
            }
            accepted.push((start, end, term));
        }
    }
    accepted.sort_by_key(|&(start, _, _)| start);

    let mut segments = Vec::new();
    let mut cursor = 0;
    for (start, end, term) in accepted {
        if cursor < start {
            segments.push(TextSegment::Plain { text: text[cursor..start].to_string() });
        }
        segments
            .push(TextSegment::Term { text: text[start..end].to_string(), term: term.to_string() });
        cursor = end;
    }
    if cursor < text.len() {
        segments.push(TextSegment::Plain { text: text[cursor..].to_string() });
    }
    segments
}
