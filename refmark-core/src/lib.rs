use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

pub mod config;
pub mod error;
pub mod geometry;
pub mod index;
pub mod locate;
pub mod region;
pub mod render;
pub mod scan;
pub mod session;

pub use config::{HighlightStyle, ViewerConfig};
pub use error::HighlightError;
pub use geometry::{DisplayTransform, Matrix, PageGeometry};
pub use index::{build_index, normalize, FragmentSpan, NormalizedIndex};
pub use locate::{locate, TextMatch};
pub use region::{compose, HighlightRegion, PlacedHighlight};
pub use render::{CancellationToken, RenderCoordinator, RenderTicket};
pub use scan::{PageScan, ScanHit, ScanState};
pub use session::{load_references, HighlightOutcome, Reference, Session, SessionEvent};

pub type DocumentId = Uuid;

/// 1-based page number, stable for the lifetime of a loaded document.
pub type PageNumber = usize;

static DOCUMENT_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::parse_str("3d8f6a0e-52c4-5b1e-9a77-0c41d2e8b6f5").expect("valid namespace UUID")
});

pub fn document_id_for_path(path: &Path) -> DocumentId {
    let resolved = path
        .canonicalize()
        .or_else(|_| {
            if path.is_absolute() {
                Ok(path.to_path_buf())
            } else {
                std::env::current_dir().map(|cwd| cwd.join(path))
            }
        })
        .unwrap_or_else(|_| path.to_path_buf());
    let rendered = resolved.to_string_lossy();
    Uuid::new_v5(&*DOCUMENT_NAMESPACE, rendered.as_bytes())
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub id: DocumentId,
    pub path: PathBuf,
    pub page_count: usize,
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextFragment {
    pub text: String,
    pub transform: Matrix,
    /// Glyph run height in page units.
    pub height: f32,
}

impl TextFragment {
    pub fn new(text: impl Into<String>, transform: Matrix, height: f32) -> Self {
        Self {
            text: text.into(),
            transform,
            height,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Page {
    pub number: PageNumber,
    pub fragments: Vec<TextFragment>,
    pub transform: DisplayTransform,
}

#[derive(Debug, Clone, Copy)]
pub struct RenderRequest {
    /// 0-based index as understood by the backend.
    pub page_index: usize,
    pub scale: f32,
}

impl Default for RenderRequest {
    fn default() -> Self {
        Self {
            page_index: 0,
            scale: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Page-level services of an opened document. Page indices are 0-based.
pub trait DocumentBackend: Send + Sync {
    fn info(&self) -> &DocumentInfo;
    fn page_geometry(&self, page_index: usize) -> Result<PageGeometry>;
    fn text_fragments(&self, page_index: usize) -> Result<Vec<TextFragment>>;
    fn render_page(&self, request: RenderRequest) -> Result<RenderImage>;
}

#[async_trait::async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn open(&self, path: &Path) -> Result<Arc<dyn DocumentBackend>>;
}

#[derive(Clone)]
pub struct Document {
    backend: Arc<dyn DocumentBackend>,
}

impl Document {
    #[instrument(skip(provider))]
    pub async fn load<P>(provider: &P, path: &Path) -> Result<Self, HighlightError>
    where
        P: DocumentProvider + ?Sized,
    {
        let backend = provider
            .open(path)
            .await
            .map_err(|err| HighlightError::Load {
                locator: path.display().to_string(),
                reason: format!("{err:#}"),
            })?;
        debug!(pages = backend.info().page_count, "document loaded");
        Ok(Self { backend })
    }

    pub fn from_backend(backend: Arc<dyn DocumentBackend>) -> Self {
        Self { backend }
    }

    pub fn info(&self) -> &DocumentInfo {
        self.backend.info()
    }

    pub fn page_count(&self) -> usize {
        self.backend.info().page_count
    }

    pub fn backend(&self) -> Arc<dyn DocumentBackend> {
        Arc::clone(&self.backend)
    }

    pub fn check_page(&self, number: PageNumber) -> Result<usize, HighlightError> {
        let page_count = self.page_count();
        if number == 0 || number > page_count {
            return Err(HighlightError::PageRange {
                page: number,
                page_count,
            });
        }
        Ok(number - 1)
    }

    #[instrument(skip(self))]
    pub async fn load_page(&self, number: PageNumber, scale: f32) -> Result<Page, HighlightError> {
        let page_index = self.check_page(number)?;
        let backend = Arc::clone(&self.backend);
        let loaded = tokio::task::spawn_blocking(move || {
            let geometry = backend.page_geometry(page_index)?;
            let fragments = backend.text_fragments(page_index)?;
            Ok::<_, anyhow::Error>((geometry, fragments))
        })
        .await;

        let (geometry, fragments) = match loaded {
            Ok(Ok(loaded)) => loaded,
            Ok(Err(err)) => {
                return Err(HighlightError::Extraction {
                    page: number,
                    reason: format!("{err:#}"),
                })
            }
            Err(err) => {
                return Err(HighlightError::Extraction {
                    page: number,
                    reason: err.to_string(),
                })
            }
        };

        Ok(Page {
            number,
            fragments,
            transform: DisplayTransform::for_page(geometry, scale),
        })
    }

    pub async fn page_transform(
        &self,
        number: PageNumber,
        scale: f32,
    ) -> Result<DisplayTransform, HighlightError> {
        let page_index = self.check_page(number)?;
        let backend = Arc::clone(&self.backend);
        let geometry = tokio::task::spawn_blocking(move || backend.page_geometry(page_index))
            .await
            .map_err(|err| HighlightError::Render {
                page: number,
                reason: err.to_string(),
            })?
            .map_err(|err| HighlightError::Render {
                page: number,
                reason: format!("{err:#}"),
            })?;
        Ok(DisplayTransform::for_page(geometry, scale))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::{HashMap, HashSet};
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use anyhow::{anyhow, Result};
    use parking_lot::Mutex;

    use super::*;

    pub const LETTER: PageGeometry = PageGeometry {
        origin_x: 0.0,
        origin_y: 0.0,
        width: 612.0,
        height: 792.0,
        rotation: 0,
    };

    pub fn fragment(text: &str, x: f32, baseline: f32, height: f32) -> TextFragment {
        TextFragment::new(text, Matrix::new(height, 0.0, 0.0, height, x, baseline), height)
    }

    pub struct FakeBackend {
        info: DocumentInfo,
        pages: Vec<Vec<TextFragment>>,
        broken: HashSet<usize>,
        pub extracted: Mutex<Vec<usize>>,
        pub renders: Mutex<HashMap<usize, usize>>,
    }

    impl FakeBackend {
        pub fn new(pages: Vec<Vec<TextFragment>>) -> Self {
            let info = DocumentInfo {
                id: document_id_for_path(Path::new("/tmp/fake.pdf")),
                path: PathBuf::from("/tmp/fake.pdf"),
                page_count: pages.len(),
                metadata: DocumentMetadata::default(),
            };
            Self {
                info,
                pages,
                broken: HashSet::new(),
                extracted: Mutex::new(Vec::new()),
                renders: Mutex::new(HashMap::new()),
            }
        }

        pub fn with_broken_page(mut self, number: PageNumber) -> Self {
            self.broken.insert(number - 1);
            self
        }

        pub fn into_document(self) -> (Document, Arc<FakeBackend>) {
            let backend = Arc::new(self);
            (Document::from_backend(backend.clone()), backend)
        }
    }

    impl DocumentBackend for FakeBackend {
        fn info(&self) -> &DocumentInfo {
            &self.info
        }

        fn page_geometry(&self, _page_index: usize) -> Result<PageGeometry> {
            Ok(LETTER)
        }

        fn text_fragments(&self, page_index: usize) -> Result<Vec<TextFragment>> {
            self.extracted.lock().push(page_index + 1);
            if self.broken.contains(&page_index) {
                return Err(anyhow!("corrupt content stream"));
            }
            self.pages
                .get(page_index)
                .cloned()
                .ok_or_else(|| anyhow!("page {} out of range", page_index))
        }

        fn render_page(&self, request: RenderRequest) -> Result<RenderImage> {
            *self.renders.lock().entry(request.page_index).or_default() += 1;
            Ok(RenderImage {
                width: 1,
                height: 1,
                pixels: vec![request.page_index as u8, 0, 0, 255],
            })
        }
    }
}
