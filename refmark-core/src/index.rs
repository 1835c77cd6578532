//! Flattening of a page's fragments into one whitespace-free search string.
//!
//! Offsets are UTF-8 byte offsets into [`NormalizedIndex::text`], so a span
//! can slice the text directly.

use std::ops::Range;

use crate::TextFragment;

/// Byte range of one fragment inside the concatenated text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentSpan {
    pub start: usize,
    pub end: usize,
    pub fragment: usize,
}

impl FragmentSpan {
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Inclusive overlap test: a span that merely touches `[start, end)` at
    /// either boundary counts as overlapping.
    pub fn touches(&self, start: usize, end: usize) -> bool {
        !(self.end < start || self.start > end)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedIndex {
    pub text: String,
    pub spans: Vec<FragmentSpan>,
}

impl NormalizedIndex {
    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn slice(&self, span: &FragmentSpan) -> &str {
        &self.text[span.range()]
    }
}

fn is_blank(c: char) -> bool {
    // U+FEFF is not White_Space in Unicode but extraction sources emit it
    // as padding.
    c.is_whitespace() || c == '\u{feff}'
}

pub fn normalize(text: &str) -> String {
    text.chars().filter(|&c| !is_blank(c)).collect()
}

pub fn build_index(fragments: &[TextFragment]) -> NormalizedIndex {
    let mut text = String::new();
    let mut spans = Vec::with_capacity(fragments.len());

    for (position, fragment) in fragments.iter().enumerate() {
        let start = text.len();
        text.extend(fragment.text.chars().filter(|&c| !is_blank(c)));
        spans.push(FragmentSpan {
            start,
            end: text.len(),
            fragment: position,
        });
    }

    NormalizedIndex { text, spans }
}
