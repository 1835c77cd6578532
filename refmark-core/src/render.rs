//! Per-page render supervision. At most one render is live per page surface:
//! starting a new one cancels the previous ticket, and a cancelled render's
//! image is dropped instead of being handed to the display.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use crate::{Document, DocumentBackend, HighlightError, PageNumber, RenderImage, RenderRequest};

#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn same_as(&self, other: &CancellationToken) -> bool {
        Arc::ptr_eq(&self.cancelled, &other.cancelled)
    }
}

#[derive(Debug, Clone)]
pub struct RenderTicket {
    pub page: PageNumber,
    token: CancellationToken,
}

impl RenderTicket {
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

pub struct RenderCoordinator {
    backend: Arc<dyn DocumentBackend>,
    page_count: usize,
    outstanding: Mutex<HashMap<PageNumber, CancellationToken>>,
}

impl RenderCoordinator {
    pub fn new(document: &Document) -> Self {
        Self {
            backend: document.backend(),
            page_count: document.page_count(),
            outstanding: Mutex::new(HashMap::new()),
        }
    }

    pub fn begin(&self, page: PageNumber) -> RenderTicket {
        let token = CancellationToken::new();
        if let Some(previous) = self.outstanding.lock().insert(page, token.clone()) {
            debug!(page, "superseding in-flight render");
            previous.cancel();
        }
        RenderTicket { page, token }
    }

    fn finish(&self, ticket: &RenderTicket) {
        let mut outstanding = self.outstanding.lock();
        if outstanding
            .get(&ticket.page)
            .is_some_and(|current| current.same_as(&ticket.token))
        {
            outstanding.remove(&ticket.page);
        }
    }

    pub fn in_flight(&self) -> usize {
        self.outstanding.lock().len()
    }

    #[instrument(skip(self))]
    pub async fn render(
        &self,
        page: PageNumber,
        scale: f32,
    ) -> Result<RenderImage, HighlightError> {
        if page == 0 || page > self.page_count {
            return Err(HighlightError::PageRange {
                page,
                page_count: self.page_count,
            });
        }

        let ticket = self.begin(page);
        let backend = Arc::clone(&self.backend);
        let request = RenderRequest {
            page_index: page - 1,
            scale,
        };
        let result = tokio::task::spawn_blocking(move || backend.render_page(request)).await;

        if ticket.is_cancelled() {
            debug!(page, "discarding superseded render");
            return Err(HighlightError::RenderCancelled { page });
        }
        self.finish(&ticket);

        match result {
            Ok(Ok(image)) => Ok(image),
            Ok(Err(err)) => {
                warn!(?err, page, "render failed");
                Err(HighlightError::Render {
                    page,
                    reason: format!("{err:#}"),
                })
            }
            Err(err) => Err(HighlightError::Render {
                page,
                reason: err.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use anyhow::Result;

    use super::*;
    use crate::testing::{FakeBackend, LETTER};
    use crate::{DocumentInfo, DocumentMetadata, PageGeometry, TextFragment};

    struct SlowFirstBackend {
        info: DocumentInfo,
        calls: AtomicUsize,
    }

    impl DocumentBackend for SlowFirstBackend {
        fn info(&self) -> &DocumentInfo {
            &self.info
        }

        fn page_geometry(&self, _page_index: usize) -> Result<PageGeometry> {
            Ok(LETTER)
        }

        fn text_fragments(&self, _page_index: usize) -> Result<Vec<TextFragment>> {
            Ok(Vec::new())
        }

        fn render_page(&self, request: RenderRequest) -> Result<RenderImage> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                std::thread::sleep(Duration::from_millis(300));
            }
            Ok(RenderImage {
                width: 1,
                height: 1,
                pixels: vec![call as u8, request.page_index as u8, 0, 255],
            })
        }
    }

    #[test]
    fn token_cancellation_is_shared_between_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn begin_cancels_outstanding_ticket_for_same_page_only() {
        let (document, _) = FakeBackend::new(vec![Vec::new(), Vec::new()]).into_document();
        let coordinator = RenderCoordinator::new(&document);

        let first = coordinator.begin(1);
        let other_page = coordinator.begin(2);
        let second = coordinator.begin(1);

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert!(!other_page.is_cancelled());
        assert_eq!(coordinator.in_flight(), 2);
    }

    #[tokio::test]
    async fn completed_render_clears_outstanding_entry() {
        let (document, backend) = FakeBackend::new(vec![Vec::new(), Vec::new()]).into_document();
        let coordinator = RenderCoordinator::new(&document);

        let image = coordinator.render(2, 1.5).await.unwrap();
        assert_eq!(image.pixels[0], 1);
        assert_eq!(coordinator.in_flight(), 0);
        assert_eq!(backend.renders.lock().get(&1), Some(&1));
    }

    #[tokio::test]
    async fn render_rejects_out_of_range_page() {
        let (document, _) = FakeBackend::new(vec![Vec::new()]).into_document();
        let coordinator = RenderCoordinator::new(&document);

        assert!(matches!(
            coordinator.render(3, 1.0).await,
            Err(HighlightError::PageRange { page: 3, page_count: 1 })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn superseded_render_is_discarded() {
        let backend = Arc::new(SlowFirstBackend {
            info: DocumentInfo {
                id: crate::document_id_for_path(&PathBuf::from("/tmp/slow.pdf")),
                path: PathBuf::from("/tmp/slow.pdf"),
                page_count: 1,
                metadata: DocumentMetadata::default(),
            },
            calls: AtomicUsize::new(0),
        });
        let document = Document::from_backend(backend);
        let coordinator = Arc::new(RenderCoordinator::new(&document));

        let first = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.render(1, 1.0).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = coordinator.render(1, 1.0).await.unwrap();
        assert_eq!(second.pixels[0], 1);

        let first = first.await.unwrap();
        assert!(matches!(first, Err(HighlightError::RenderCancelled { page: 1 })));
        assert!(first.unwrap_err().is_superseded());
        assert_eq!(coordinator.in_flight(), 0);
    }
}
