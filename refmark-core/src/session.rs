use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::region::PlacedHighlight;
use crate::scan::PageScan;
use crate::{Document, DocumentId, HighlightError, PageNumber};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub content: String,
}

impl Reference {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

pub fn load_references(path: &Path) -> Result<Vec<Reference>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read reference list {:?}", path))?;
    let references = serde_json::from_str(&raw)
        .with_context(|| format!("failed to decode reference list {:?}", path))?;
    Ok(references)
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ReferenceSelected { index: usize },
    ReferenceDeselected,
    HighlightCleared { page: PageNumber },
    HighlightPlaced { page: PageNumber },
    ScrollToPage { page: PageNumber },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HighlightOutcome {
    Found(PlacedHighlight),
    NotFound,
}

pub struct Session {
    document: Document,
    references: Vec<Reference>,
    scale: f32,
    selected: Option<usize>,
    highlight: Option<PlacedHighlight>,
    events: Arc<Mutex<Vec<SessionEvent>>>,
}

impl Session {
    pub fn new(document: Document, references: Vec<Reference>, scale: f32) -> Self {
        Self {
            document,
            references,
            scale,
            selected: None,
            highlight: None,
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn events(&self) -> Arc<Mutex<Vec<SessionEvent>>> {
        Arc::clone(&self.events)
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn document_id(&self) -> DocumentId {
        self.document.info().id
    }

    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    pub fn highlight(&self) -> Option<PlacedHighlight> {
        self.highlight
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn highlight_on(&self, page: PageNumber) -> Option<PlacedHighlight> {
        self.highlight.filter(|placed| placed.page == page)
    }

    #[instrument(skip(self))]
    pub async fn highlight_reference(
        &mut self,
        index: usize,
    ) -> Result<HighlightOutcome, HighlightError> {
        let query = self
            .references
            .get(index)
            .map(|reference| reference.content.clone())
            .ok_or(HighlightError::ReferenceRange {
                index,
                count: self.references.len(),
            })?;

        self.clear_highlight();
        self.selected = Some(index);
        self.push(SessionEvent::ReferenceSelected { index });
        self.run(&query).await
    }

    #[instrument(skip(self, query))]
    pub async fn highlight_text(
        &mut self,
        query: &str,
    ) -> Result<HighlightOutcome, HighlightError> {
        self.clear_highlight();
        self.deselect();
        self.run(query).await
    }

    pub fn clear(&mut self) {
        self.clear_highlight();
        self.deselect();
    }

    pub fn set_scale(&mut self, scale: f32) {
        if (self.scale - scale).abs() > f32::EPSILON {
            self.scale = scale;
            self.clear_highlight();
        }
    }

    async fn run(&mut self, query: &str) -> Result<HighlightOutcome, HighlightError> {
        let hit = PageScan::new(&self.document, query, self.scale).run().await?;
        let Some(hit) = hit else {
            return Ok(HighlightOutcome::NotFound);
        };

        let placed = PlacedHighlight {
            page: hit.page,
            region: hit.region,
        };
        info!(
            page = placed.page,
            top = placed.region.top,
            height = placed.region.height,
            "highlight placed"
        );
        self.highlight = Some(placed);
        self.push(SessionEvent::HighlightPlaced { page: placed.page });
        self.push(SessionEvent::ScrollToPage { page: placed.page });
        Ok(HighlightOutcome::Found(placed))
    }

    fn clear_highlight(&mut self) {
        if let Some(previous) = self.highlight.take() {
            self.push(SessionEvent::HighlightCleared {
                page: previous.page,
            });
        }
    }

    fn deselect(&mut self) {
        if self.selected.take().is_some() {
            self.push(SessionEvent::ReferenceDeselected);
        }
    }

    fn push(&self, event: SessionEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fragment, FakeBackend};
    use crate::TextFragment;

    use tempfile::tempdir;

    fn prose(baseline: f32) -> TextFragment {
        fragment("Lorem ipsum dolor sit amet, consectetur", 72.0, baseline, 10.0)
    }

    fn session_for(pages: Vec<Vec<TextFragment>>, references: &[&str]) -> Session {
        let (document, _) = FakeBackend::new(pages).into_document();
        let references = references.iter().map(|text| Reference::new(*text)).collect();
        Session::new(document, references, 1.5)
    }

    #[tokio::test]
    async fn match_on_second_page_is_anchored_there() {
        let mut second_page = vec![prose(720.0)];
        second_page.push(fragment("If You are not satisfied,", 72.0, 700.0, 10.0));
        second_page.push(fragment("for any reason", 72.0, 688.0, 10.0));
        let mut session = session_for(
            vec![vec![prose(720.0), prose(708.0)], second_page],
            &["If You are not satisfied, for any reason"],
        );

        let outcome = session.highlight_reference(0).await.unwrap();
        let placed = match outcome {
            HighlightOutcome::Found(placed) => placed,
            other => panic!("unexpected outcome: {:?}", other),
        };

        assert_eq!(placed.page, 2);
        assert_eq!(session.highlight_on(2), Some(placed));
        assert_eq!(session.highlight_on(1), None);
        assert_eq!(session.selected(), Some(0));

        let events = session.events();
        let events = events.lock();
        assert_eq!(
            *events,
            vec![
                SessionEvent::ReferenceSelected { index: 0 },
                SessionEvent::HighlightPlaced { page: 2 },
                SessionEvent::ScrollToPage { page: 2 },
            ]
        );
    }

    #[tokio::test]
    async fn band_covers_wrapped_lines_at_session_scale() {
        let mut session = session_for(
            vec![vec![
                fragment("We will then cancel Your", 72.0, 700.0, 10.0),
                fragment("coverage as of the", 72.0, 688.0, 10.0),
            ]],
            &[],
        );

        let outcome = session.highlight_text("cancel Your coverage").await.unwrap();
        let HighlightOutcome::Found(placed) = outcome else {
            panic!("expected a match");
        };
        // baselines (792-700)*1.5 = 138 and (792-688)*1.5 = 156, height 15
        assert!((placed.region.top - 123.0).abs() < 1e-3);
        assert!((placed.region.bottom() - 156.0).abs() < 1e-3);
        assert!((placed.region.width - 918.0).abs() < 1e-3);
        assert_eq!(placed.region.left, 0.0);
    }

    #[tokio::test]
    async fn new_selection_replaces_previous_highlight() {
        let mut session = session_for(
            vec![
                vec![fragment("EXCLUSIONS AND LIMITATIONS", 72.0, 700.0, 10.0)],
                vec![fragment("Notice Regarding Standard of Care", 72.0, 600.0, 10.0)],
            ],
            &["EXCLUSIONS AND LIMITATIONS", "Notice Regarding Standard of Care"],
        );

        session.highlight_reference(0).await.unwrap();
        assert_eq!(session.highlight().map(|h| h.page), Some(1));

        session.events().lock().clear();
        session.highlight_reference(1).await.unwrap();
        assert_eq!(session.highlight().map(|h| h.page), Some(2));
        assert_eq!(session.highlight_on(1), None);
        assert_eq!(session.selected(), Some(1));

        let events = session.events();
        let events = events.lock();
        // the old band is gone before the new one is placed
        assert_eq!(
            *events,
            vec![
                SessionEvent::HighlightCleared { page: 1 },
                SessionEvent::ReferenceSelected { index: 1 },
                SessionEvent::HighlightPlaced { page: 2 },
                SessionEvent::ScrollToPage { page: 2 },
            ]
        );
    }

    #[tokio::test]
    async fn failed_search_leaves_no_stale_highlight() {
        let mut session = session_for(
            vec![vec![fragment("Cigna Dental Preventive Plan", 72.0, 700.0, 10.0)]],
            &["Cigna Dental", "Tampa, FL 33630"],
        );

        session.highlight_reference(0).await.unwrap();
        let outcome = session.highlight_reference(1).await.unwrap();

        assert_eq!(outcome, HighlightOutcome::NotFound);
        assert_eq!(session.highlight(), None);
        assert_eq!(session.selected(), Some(1));
    }

    #[tokio::test]
    async fn image_only_pages_are_passed_over() {
        let mut session = session_for(
            vec![Vec::new(), Vec::new(), vec![fragment("P. O. Box 30365", 72.0, 100.0, 9.0)]],
            &["P.O. Box   30365"],
        );

        let outcome = session.highlight_reference(0).await.unwrap();
        assert!(matches!(outcome, HighlightOutcome::Found(p) if p.page == 3));
    }

    #[tokio::test]
    async fn unknown_reference_index_is_rejected() {
        let mut session = session_for(vec![Vec::new()], &["only one"]);

        match session.highlight_reference(4).await {
            Err(HighlightError::ReferenceRange { index, count }) => {
                assert_eq!(index, 4);
                assert_eq!(count, 1);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(session.selected(), None);
    }

    #[tokio::test]
    async fn clear_and_rescale_drop_the_highlight() {
        let mut session = session_for(
            vec![vec![fragment("Cigna Dental", 72.0, 700.0, 10.0)]],
            &["Cigna Dental"],
        );

        session.highlight_reference(0).await.unwrap();
        session.set_scale(2.0);
        assert_eq!(session.highlight(), None);
        assert_eq!(session.selected(), Some(0));

        session.highlight_reference(0).await.unwrap();
        session.clear();
        assert_eq!(session.highlight(), None);
        assert_eq!(session.selected(), None);
        assert_eq!(
            session.events().lock().last(),
            Some(&SessionEvent::ReferenceDeselected)
        );
    }

    #[test]
    fn references_load_from_json_array() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("refs.json");
        std::fs::write(
            &path,
            r#"[{"content": "Cigna Dental Preventive Plan"}, {"content": "PLEASE READ"}]"#,
        )
        .unwrap();

        let references = load_references(&path).unwrap();
        assert_eq!(
            references,
            vec![
                Reference::new("Cigna Dental Preventive Plan"),
                Reference::new("PLEASE READ"),
            ]
        );
    }

    #[test]
    fn malformed_reference_list_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("refs.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = load_references(&path).unwrap_err();
        assert!(format!("{err:#}").contains("failed to decode reference list"));
    }
}
