use std::convert::TryFrom;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use refmark_core::{
    document_id_for_path, DocumentBackend, DocumentInfo, DocumentMetadata, DocumentProvider,
    Matrix, PageGeometry, RenderImage, RenderRequest, TextFragment,
};
use tracing::{debug, instrument, warn};

pub const PDFIUM_LIBRARY_ENV: &str = "REFMARK_PDFIUM_LIBRARY_PATH";

pub struct PdfiumRenderFactory {
    pdfium: Arc<Pdfium>,
}

impl PdfiumRenderFactory {
    pub fn new() -> Result<Self> {
        let pdfium = match bind_pdfium_from_env() {
            Some(pdfium) => pdfium,
            None => bind_pdfium_default()?,
        };
        Ok(Self {
            pdfium: Arc::new(pdfium),
        })
    }
}

#[async_trait]
impl DocumentProvider for PdfiumRenderFactory {
    async fn open(&self, path: &Path) -> Result<Arc<dyn DocumentBackend>> {
        let absolute = path
            .canonicalize()
            .with_context(|| format!("failed to resolve path for {:?}", path))?;
        let info = build_document_info(&self.pdfium, &absolute)?;
        Ok(Arc::new(PdfiumDocument::new(
            Arc::clone(&self.pdfium),
            absolute,
            info,
        )))
    }
}

struct PdfiumDocument {
    document: Mutex<Option<PdfDocument<'static>>>,
    pdfium: Arc<Pdfium>,
    path: PathBuf,
    info: DocumentInfo,
}

impl PdfiumDocument {
    fn new(pdfium: Arc<Pdfium>, path: PathBuf, info: DocumentInfo) -> Self {
        Self {
            document: Mutex::new(None),
            pdfium,
            path,
            info,
        }
    }

    fn open_document(&self) -> Result<PdfDocument<'static>> {
        let document = self
            .pdfium
            .load_pdf_from_file(&self.path, None)
            .with_context(|| format!("failed to open {:?}", self.path))?;
        // SAFETY: the document borrows the bindings owned by self.pdfium. It lives in
        // self.document, which is declared before self.pdfium and therefore dropped first.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };
        Ok(document)
    }

    fn with_page<R, F>(&self, page_index: usize, f: F) -> Result<R>
    where
        F: FnOnce(&PdfPage<'_>) -> Result<R>,
    {
        let mut guard = self.document.lock();
        if guard.is_none() {
            *guard = Some(self.open_document()?);
        }
        let document = guard
            .as_ref()
            .ok_or_else(|| anyhow!("document {:?} is not loaded", self.path))?;

        let index: PdfPageIndex = page_index
            .try_into()
            .map_err(|_| anyhow!("page {} is out of supported range", page_index))?;
        let page = document
            .pages()
            .get(index)
            .with_context(|| format!("page {} out of range", page_index))?;
        f(&page)
    }
}

impl DocumentBackend for PdfiumDocument {
    fn info(&self) -> &DocumentInfo {
        &self.info
    }

    fn page_geometry(&self, page_index: usize) -> Result<PageGeometry> {
        self.with_page(page_index, |page| {
            let rotation = match page.rotation() {
                Ok(rotation) => rotation_degrees(rotation),
                Err(err) => {
                    warn!(?err, page = page_index, "failed to read page rotation");
                    0
                }
            };
            let (width, height) =
                unrotated_size(page.width().value, page.height().value, rotation);
            let boundaries = page.boundaries();
            let lower_left = |boundary: PdfPageBoundaryBox| {
                (boundary.bounds.left().value, boundary.bounds.bottom().value)
            };
            let (origin_x, origin_y) = visible_origin(
                boundaries.crop().ok().map(lower_left),
                boundaries.media().ok().map(lower_left),
            );
            Ok(PageGeometry::new(width, height, rotation).with_origin(origin_x, origin_y))
        })
    }

    #[instrument(skip(self))]
    fn text_fragments(&self, page_index: usize) -> Result<Vec<TextFragment>> {
        self.with_page(page_index, |page| {
            let text = page
                .text()
                .with_context(|| format!("failed to extract text for page {}", page_index))?;

            let mut fragments = Vec::new();
            for segment in text.segments().iter() {
                let bounds = segment.bounds();
                if let Some(fragment) = fragment_from_bounds(
                    segment.text(),
                    bounds.left().value,
                    bounds.bottom().value,
                    bounds.top().value,
                ) {
                    fragments.push(fragment);
                }
            }
            debug!(page = page_index, fragments = fragments.len(), "extracted text");
            Ok(fragments)
        })
    }

    #[instrument(skip(self))]
    fn render_page(&self, request: RenderRequest) -> Result<RenderImage> {
        self.with_page(request.page_index, |page| {
            let config = PdfRenderConfig::new().scale_page_by_factor(request.scale.max(0.1));
            let bitmap = page
                .render_with_config(&config)
                .with_context(|| format!("failed to render page {}", request.page_index))?;
            let image = bitmap.as_image().to_rgba8();

            Ok(RenderImage {
                width: u32::try_from(bitmap.width()).unwrap_or_default(),
                height: u32::try_from(bitmap.height()).unwrap_or_default(),
                pixels: image.into_raw(),
            })
        })
    }
}

fn rotation_degrees(rotation: PdfPageRenderRotation) -> i32 {
    match rotation {
        PdfPageRenderRotation::None => 0,
        PdfPageRenderRotation::Degrees90 => 90,
        PdfPageRenderRotation::Degrees180 => 180,
        PdfPageRenderRotation::Degrees270 => 270,
    }
}

/// Pdfium reports page sizes with `/Rotate` already applied; text positions
/// stay in unrotated page space.
fn unrotated_size(width: f32, height: f32, rotation: i32) -> (f32, f32) {
    if rotation.rem_euclid(180) == 90 {
        (height, width)
    } else {
        (width, height)
    }
}

// CropBox, else MediaBox
fn visible_origin(crop: Option<(f32, f32)>, media: Option<(f32, f32)>) -> (f32, f32) {
    crop.or(media)
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .unwrap_or((0.0, 0.0))
}

/// Pdfium segments carry a bounding box rather than a text matrix. The
/// fragment's origin is placed at the bottom-left corner of that box and its
/// height is the box height.
fn fragment_from_bounds(text: String, left: f32, bottom: f32, top: f32) -> Option<TextFragment> {
    let height = top - bottom;
    if !height.is_finite() || !left.is_finite() || !bottom.is_finite() {
        return None;
    }
    let height = height.max(0.0);
    Some(TextFragment::new(
        text,
        Matrix::new(height, 0.0, 0.0, height, left, bottom),
        height,
    ))
}

fn build_document_info(pdfium: &Pdfium, path: &Path) -> Result<DocumentInfo> {
    let document = pdfium
        .load_pdf_from_file(path, None)
        .with_context(|| format!("failed to open {:?}", path))?;
    let page_count = usize::try_from(document.pages().len()).unwrap_or_default();
    let metadata = document.metadata();

    let title = metadata
        .get(PdfDocumentMetadataTagType::Title)
        .map(|t| t.value().to_owned());
    let author = metadata
        .get(PdfDocumentMetadataTagType::Author)
        .map(|t| t.value().to_owned());

    Ok(DocumentInfo {
        id: document_id_for_path(path),
        path: path.to_path_buf(),
        page_count,
        metadata: DocumentMetadata { title, author },
    })
}

pub type PdfRenderFactory = PdfiumRenderFactory;

fn bind_pdfium_from_env() -> Option<Pdfium> {
    let path = std::env::var(PDFIUM_LIBRARY_ENV).ok()?;
    if path.is_empty() {
        return None;
    }
    match Pdfium::bind_to_library(&path) {
        Ok(bindings) => Some(Pdfium::new(bindings)),
        Err(err) => {
            warn!("failed to load Pdfium from {}={}: {}", PDFIUM_LIBRARY_ENV, path, err);
            None
        }
    }
}

fn bind_pdfium_default() -> Result<Pdfium> {
    let mut errors = Vec::new();

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");

    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("{}: {}", cwd_path.display(), err));
        }
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; install it or set {} ({})",
                PDFIUM_LIBRARY_ENV,
                errors.join(", ")
            ))
        }
    }
}
