use tracing::{debug, info, warn};

use crate::index::{build_index, normalize};
use crate::locate::{find_normalized, TextMatch};
use crate::region::{compose, HighlightRegion};
use crate::{Document, HighlightError, PageNumber};

#[derive(Debug, Clone, PartialEq)]
pub struct ScanHit {
    pub page: PageNumber,
    pub region: HighlightRegion,
    pub matched: TextMatch,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanState {
    Idle,
    /// `page` is the next page to examine.
    Scanning { page: PageNumber },
    Found(ScanHit),
    Exhausted { failed_pages: Vec<PageNumber> },
}

impl ScanState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanState::Found(_) | ScanState::Exhausted { .. })
    }
}

pub struct PageScan<'a> {
    document: &'a Document,
    needle: String,
    scale: f32,
    state: ScanState,
    failed_pages: Vec<PageNumber>,
}

impl<'a> PageScan<'a> {
    pub fn new(document: &'a Document, query: &str, scale: f32) -> Self {
        Self {
            document,
            needle: normalize(query),
            scale,
            state: ScanState::Idle,
            failed_pages: Vec::new(),
        }
    }

    pub fn state(&self) -> &ScanState {
        &self.state
    }

    pub async fn step(&mut self) -> Result<&ScanState, HighlightError> {
        let pending = match &self.state {
            ScanState::Found(_) | ScanState::Exhausted { .. } => return Ok(&self.state),
            ScanState::Idle => None,
            ScanState::Scanning { page } => Some(*page),
        };
        let next = match pending {
            Some(page) => self.examine(page).await?,
            None if self.needle.is_empty() => {
                debug!("empty query, nothing to scan");
                self.exhausted()
            }
            None if self.document.page_count() == 0 => self.exhausted(),
            None => ScanState::Scanning { page: 1 },
        };
        self.state = next;
        Ok(&self.state)
    }

    pub async fn run(mut self) -> Result<Option<ScanHit>, HighlightError> {
        while !self.state.is_terminal() {
            self.step().await?;
        }

        match self.state {
            ScanState::Found(hit) => {
                info!(page = hit.page, "passage located");
                Ok(Some(hit))
            }
            ScanState::Exhausted { failed_pages } if !failed_pages.is_empty() => {
                Err(HighlightError::ExtractionFailed { pages: failed_pages })
            }
            _ => {
                info!("passage not found in document");
                Ok(None)
            }
        }
    }

    async fn examine(&mut self, number: PageNumber) -> Result<ScanState, HighlightError> {
        let page = match self.document.load_page(number, self.scale).await {
            Ok(page) => page,
            Err(HighlightError::Extraction { page, reason }) => {
                warn!(page, %reason, "skipping page whose text could not be extracted");
                self.failed_pages.push(page);
                return Ok(self.advance_from(number));
            }
            Err(err) => return Err(err),
        };

        let index = build_index(&page.fragments);
        debug!(
            page = number,
            fragments = page.fragments.len(),
            chars = index.len(),
            "searching page"
        );

        let Some(matched) = find_normalized(&index, &self.needle) else {
            return Ok(self.advance_from(number));
        };

        let region = compose(
            matched.spans.iter().map(|span| &page.fragments[span.fragment]),
            &page.transform,
        );
        Ok(ScanState::Found(ScanHit {
            page: number,
            region,
            matched,
        }))
    }

    fn advance_from(&mut self, number: PageNumber) -> ScanState {
        if number < self.document.page_count() {
            ScanState::Scanning { page: number + 1 }
        } else {
            self.exhausted()
        }
    }

    fn exhausted(&mut self) -> ScanState {
        ScanState::Exhausted {
            failed_pages: std::mem::take(&mut self.failed_pages),
        }
    }
}
