use crate::index::{normalize, FragmentSpan, NormalizedIndex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMatch {
    pub start: usize,
    pub end: usize,
    /// Every fragment span touching `[start, end]`, in fragment order.
    pub spans: Vec<FragmentSpan>,
}

impl TextMatch {
    pub fn fragment_positions(&self) -> impl Iterator<Item = usize> + '_ {
        self.spans.iter().map(|span| span.fragment)
    }
}

/// An empty (or whitespace-only) query never matches.
pub fn locate(index: &NormalizedIndex, query: &str) -> Option<TextMatch> {
    find_normalized(index, &normalize(query))
}

pub(crate) fn find_normalized(index: &NormalizedIndex, needle: &str) -> Option<TextMatch> {
    if needle.is_empty() {
        return None;
    }

    let start = index.text.find(needle)?;
    let end = start + needle.len();
    let spans = index
        .spans
        .iter()
        .filter(|span| span.touches(start, end))
        .copied()
        .collect();

    Some(TextMatch { start, end, spans })
}
