use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossterm::cursor;
use crossterm::event::{self, Event};
use crossterm::style::{Attribute, Print, SetAttribute};
use crossterm::terminal::{self, Clear, ClearType};
use directories::ProjectDirs;
use parking_lot::Mutex;
use refmark_core::config::{MAX_SCALE, MIN_SCALE};
use refmark_core::{
    load_references, Document, HighlightOutcome, HighlightStyle,
    PageNumber, PlacedHighlight, Reference, RenderCoordinator, RenderImage, Session,
    SessionEvent, ViewerConfig,
};
use refmark_render::PdfRenderFactory;
use refmark_tty::{
    paint_highlight, write_status_line, DrawParams, EventMapper, KittyRenderer, UiEvent,
};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "refmark",
    version,
    about = "Locate reference passages in a PDF and highlight them"
)]
struct Args {
    /// PDF document to open
    pdf: PathBuf,

    /// JSON array of `{"content": "..."}` reference records
    #[arg(short = 'r', long = "references")]
    references: Option<PathBuf>,

    /// Reference passage given inline; may be repeated
    #[arg(long = "reference")]
    reference: Vec<String>,

    /// Page surface scale factor
    #[arg(short = 's', long = "scale")]
    scale: Option<f32>,

    /// Config file to use instead of the platform default
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Locate the reference at this index (0-based), print the result as JSON and exit
    #[arg(short = 'l', long = "locate")]
    locate: Option<usize>,

    /// Write the highlighted page to this PNG file
    #[arg(long = "export", requires = "locate")]
    export: Option<PathBuf>,
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> anyhow::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, cursor::Show);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "refmark", "refmark")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let config = match &args.config {
        Some(path) => ViewerConfig::load(path)?,
        None => ViewerConfig::load_or_default(&ViewerConfig::default_path(&project_dirs))?,
    }
    .with_scale(args.scale);
    let _log_guard = init_logging(&project_dirs, &config.log_filter, args.locate.is_some())?;

    let references = collect_references(args.references.as_deref(), &args.reference)?;
    let provider = PdfRenderFactory::new()?;
    let document = Document::load(&provider, &args.pdf).await?;
    info!(
        path = ?document.info().path,
        pages = document.page_count(),
        references = references.len(),
        "document loaded"
    );
    let session = Session::new(document, references, config.scale);

    match args.locate {
        Some(index) => {
            locate_once(session, index, args.export.as_deref(), &config.highlight).await
        }
        None => run_viewer(session, config.highlight).await,
    }
}

fn collect_references(path: Option<&Path>, inline: &[String]) -> Result<Vec<Reference>> {
    let mut references = match path {
        Some(path) => load_references(path)?,
        None => Vec::new(),
    };
    references.extend(inline.iter().map(|content| Reference::new(content.as_str())));
    Ok(references)
}

async fn locate_once(
    mut session: Session,
    index: usize,
    export: Option<&Path>,
    style: &HighlightStyle,
) -> Result<()> {
    let placed = match session.highlight_reference(index).await? {
        HighlightOutcome::Found(placed) => Some(placed),
        HighlightOutcome::NotFound => None,
    };

    let mut stdout = io::stdout();
    serde_json::to_writer(&mut stdout, &placed)?;
    writeln!(stdout)?;

    match (export, placed) {
        (Some(path), Some(placed)) => export_page(&session, placed, path, style).await,
        (Some(path), None) => {
            warn!(?path, "nothing to export, passage not found");
            Ok(())
        }
        (None, _) => Ok(()),
    }
}

async fn export_page(
    session: &Session,
    placed: PlacedHighlight,
    path: &Path,
    style: &HighlightStyle,
) -> Result<()> {
    let coordinator = RenderCoordinator::new(session.document());
    let mut page = coordinator.render(placed.page, session.scale()).await?;
    let (surface_width, surface_height) =
        surface_size(session.document(), placed.page, session.scale(), &page).await;
    paint_highlight(&mut page, &placed.region, surface_width, surface_height, style);

    let buffer = image::RgbaImage::from_raw(page.width, page.height, page.pixels)
        .ok_or_else(|| anyhow!("rendered page {} has a malformed pixel buffer", placed.page))?;
    buffer
        .save(path)
        .with_context(|| format!("failed to write {:?}", path))?;
    info!(?path, page = placed.page, "exported highlighted page");
    Ok(())
}

async fn surface_size(
    document: &Document,
    page: PageNumber,
    scale: f32,
    rendered: &RenderImage,
) -> (u32, u32) {
    match document.page_transform(page, scale).await {
        Ok(transform) => (transform.surface_width(), transform.surface_height()),
        Err(err) => {
            warn!(?err, page, "failed to read page geometry");
            (rendered.width, rendered.height)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum LastOutcome {
    Found { page: PageNumber },
    NotFound,
    Failed(String),
}

impl LastOutcome {
    fn describe(&self) -> String {
        match self {
            LastOutcome::Found { page } => format!("found on page {}", page),
            LastOutcome::NotFound => "no match".to_string(),
            LastOutcome::Failed(reason) => format!("error: {}", reason),
        }
    }
}

enum LoopAction {
    Continue,
    ContinueRedraw,
    Quit,
}

struct ReferenceList {
    entries: Vec<String>,
    selected: usize,
    scroll_offset: usize,
}

impl ReferenceList {
    fn new(references: &[Reference]) -> Self {
        Self {
            entries: references
                .iter()
                .map(|reference| preview(&reference.content))
                .collect(),
            selected: 0,
            scroll_offset: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn select(&mut self, index: usize) -> bool {
        if index < self.entries.len() {
            self.selected = index;
            true
        } else {
            false
        }
    }

    fn move_selection(&mut self, delta: isize) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let len = self.entries.len() as isize;
        let next = (self.selected as isize).saturating_add(delta).clamp(0, len - 1) as usize;
        if next != self.selected {
            self.selected = next;
            true
        } else {
            false
        }
    }

    fn ensure_visible(&mut self, viewport_height: usize) {
        if viewport_height == 0 || self.entries.is_empty() {
            self.scroll_offset = 0;
            return;
        }
        let max_offset = self.entries.len().saturating_sub(viewport_height);
        if self.scroll_offset > max_offset {
            self.scroll_offset = max_offset;
        }
        if self.selected < self.scroll_offset {
            self.scroll_offset = self.selected;
            return;
        }
        let bottom = self.scroll_offset + viewport_height;
        if self.selected >= bottom {
            self.scroll_offset = self.selected + 1 - viewport_height;
        }
    }
}

fn preview(content: &str) -> String {
    content.split_whitespace().collect::<Vec<_>>().join(" ")
}

struct Viewer {
    session: Session,
    coordinator: RenderCoordinator,
    events: Arc<Mutex<Vec<SessionEvent>>>,
    style: HighlightStyle,
    list: ReferenceList,
    current_page: PageNumber,
    outcome: Option<LastOutcome>,
}

impl Viewer {
    fn new(session: Session, style: HighlightStyle) -> Self {
        let coordinator = RenderCoordinator::new(session.document());
        let events = session.events();
        let list = ReferenceList::new(session.references());
        let current_page = usize::from(session.document().page_count() > 0);
        Self {
            session,
            coordinator,
            events,
            style,
            list,
            current_page,
            outcome: None,
        }
    }

    async fn handle(&mut self, event: UiEvent) -> Result<LoopAction> {
        let page_count = self.session.document().page_count();
        match event {
            UiEvent::MoveSelection { delta } => {
                if self.list.move_selection(delta) {
                    Ok(LoopAction::ContinueRedraw)
                } else {
                    Ok(LoopAction::Continue)
                }
            }
            UiEvent::SelectReference { index } => {
                if self.list.select(index) {
                    self.activate(index).await;
                } else {
                    self.outcome = Some(LastOutcome::Failed(format!(
                        "no reference {} ({} loaded)",
                        index + 1,
                        self.list.entries.len()
                    )));
                }
                Ok(LoopAction::ContinueRedraw)
            }
            UiEvent::ActivateSelection => {
                if self.list.is_empty() {
                    return Ok(LoopAction::Continue);
                }
                self.activate(self.list.selected).await;
                Ok(LoopAction::ContinueRedraw)
            }
            UiEvent::NextPage { count } => {
                let next = self.current_page.saturating_add(count).min(page_count);
                Ok(self.goto_page(next))
            }
            UiEvent::PrevPage { count } => {
                let next = self.current_page.saturating_sub(count).max(1).min(page_count);
                Ok(self.goto_page(next))
            }
            UiEvent::ScaleBy { factor } => {
                let scale = (self.session.scale() * factor).clamp(MIN_SCALE, MAX_SCALE);
                self.session.set_scale(scale);
                self.drain_events();
                if let Some(index) = self.session.selected() {
                    self.activate(index).await;
                }
                Ok(LoopAction::ContinueRedraw)
            }
            UiEvent::ClearHighlight => {
                self.session.clear();
                self.outcome = None;
                self.drain_events();
                Ok(LoopAction::ContinueRedraw)
            }
            UiEvent::Quit => Ok(LoopAction::Quit),
            UiEvent::None => Ok(LoopAction::Continue),
        }
    }

    fn goto_page(&mut self, page: PageNumber) -> LoopAction {
        if page != self.current_page {
            self.current_page = page;
            LoopAction::ContinueRedraw
        } else {
            LoopAction::Continue
        }
    }

    async fn activate(&mut self, index: usize) {
        self.outcome = Some(match self.session.highlight_reference(index).await {
            Ok(HighlightOutcome::Found(placed)) => LastOutcome::Found { page: placed.page },
            Ok(HighlightOutcome::NotFound) => LastOutcome::NotFound,
            Err(err) => {
                warn!(%err, index, "highlight request failed");
                LastOutcome::Failed(err.to_string())
            }
        });
        self.drain_events();
    }

    fn drain_events(&mut self) {
        let events = std::mem::take(&mut *self.events.lock());
        for event in events {
            if let SessionEvent::ScrollToPage { page } = event {
                self.current_page = page;
            }
        }
    }

    fn status(&self) -> String {
        let document = self.session.document();
        format_status(
            document
                .info()
                .path
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("<unknown>"),
            self.current_page,
            document.page_count(),
            self.session.selected(),
            self.list.entries.len(),
            self.outcome.as_ref(),
            self.session.scale(),
        )
    }
}

async fn run_viewer(session: Session, style: HighlightStyle) -> Result<()> {
    let mut viewer = Viewer::new(session, style);

    let _raw = RawModeGuard::new()?;
    let mut stdout = io::stdout();
    crossterm::execute!(stdout, cursor::Hide)?;
    let mut renderer = KittyRenderer::new(stdout);
    let mut event_mapper = EventMapper::new();
    let mut dirty = true;

    loop {
        if dirty {
            let pending = event_mapper.pending_input();
            redraw(&mut renderer, &mut viewer, pending.as_deref()).await?;
            dirty = false;
        }

        if event::poll(Duration::from_millis(100))? {
            let ev = event::read()?;
            if matches!(ev, Event::Resize(..)) {
                dirty = true;
                continue;
            }
            let ui_event = event_mapper.map_event(ev);
            let pending = event_mapper.pending_input();
            if let Some(status) = combine_status(Some(viewer.status()), pending.as_deref()) {
                draw_status_line(&mut renderer, &status)?;
            }
            match viewer.handle(ui_event).await? {
                LoopAction::ContinueRedraw => dirty = true,
                LoopAction::Continue => {}
                LoopAction::Quit => break,
            }
        }
    }

    renderer.clear_images()?;
    renderer.clear_all()?;
    Ok(())
}

async fn redraw(
    renderer: &mut KittyRenderer<io::Stdout>,
    viewer: &mut Viewer,
    pending_input: Option<&str>,
) -> Result<()> {
    let window = terminal::window_size()?;
    let total_cols = u32::from(window.columns).max(1);
    let total_rows = u32::from(window.rows).max(1);
    let image_rows_available = total_rows.saturating_sub(1).max(1);
    let panel_cols = if total_cols >= 60 { (total_cols / 3).min(48) } else { 0 };

    renderer.clear_all()?;

    if viewer.current_page > 0 {
        let scale = viewer.session.scale();
        match viewer.coordinator.render(viewer.current_page, scale).await {
            Ok(mut image) => {
                if let Some(placed) = viewer.session.highlight_on(viewer.current_page) {
                    let (surface_width, surface_height) =
                        surface_size(viewer.session.document(), placed.page, scale, &image)
                            .await;
                    paint_highlight(
                        &mut image,
                        &placed.region,
                        surface_width,
                        surface_height,
                        &viewer.style,
                    );
                }

                let available_cols = total_cols.saturating_sub(panel_cols + 1).max(1);
                let (cell_width, cell_height) = if window.width > 0 && window.height > 0 {
                    (
                        f32::from(window.width) / total_cols as f32,
                        f32::from(window.height) / total_rows as f32,
                    )
                } else {
                    (1.0, 2.0)
                };
                let (draw_cols, draw_rows) = fit_to_cells(
                    image.width,
                    image.height,
                    available_cols,
                    image_rows_available,
                    cell_width,
                    cell_height,
                );
                let start_col = panel_cols + 1 + (available_cols.saturating_sub(draw_cols)) / 2;
                {
                    let mut writer = renderer.writer();
                    crossterm::execute!(&mut writer, cursor::MoveTo(start_col as u16, 0))?;
                }
                renderer.draw(&image, DrawParams::clamped(draw_cols, draw_rows))?;
            }
            Err(err) if err.is_superseded() => {}
            Err(err) => {
                warn!(%err, page = viewer.current_page, "failed to render page");
                viewer.outcome = Some(LastOutcome::Failed(err.to_string()));
            }
        }
    }

    if panel_cols > 0 {
        draw_reference_panel(
            renderer,
            &mut viewer.list,
            viewer.session.selected(),
            panel_cols,
            image_rows_available,
        )?;
    }

    if let Some(status) = combine_status(Some(viewer.status()), pending_input) {
        draw_status_line(renderer, &status)?;
    }
    Ok(())
}

fn draw_reference_panel(
    renderer: &mut KittyRenderer<io::Stdout>,
    list: &mut ReferenceList,
    active: Option<usize>,
    panel_cols: u32,
    rows: u32,
) -> Result<()> {
    const TITLE: &str = "References";
    const EMPTY_MESSAGE: &str = "No references loaded";

    let inner_width = panel_cols.saturating_sub(2) as usize;
    let content_height = rows.saturating_sub(4) as usize;
    if inner_width < 10 || content_height == 0 {
        return Ok(());
    }
    list.ensure_visible(content_height);

    let mut writer = renderer.writer();
    let horizontal_border = format!("+{}+", "-".repeat(inner_width));
    let mut current_row = 0u16;

    print_inverted(&mut writer, 0, current_row, &horizontal_border)?;
    current_row = current_row.saturating_add(1);
    let title_line = format!("|{: ^inner_width$}|", TITLE, inner_width = inner_width);
    print_inverted(&mut writer, 0, current_row, &title_line)?;
    current_row = current_row.saturating_add(1);
    print_inverted(&mut writer, 0, current_row, &format!("|{}|", "-".repeat(inner_width)))?;
    current_row = current_row.saturating_add(1);

    let mut rendered = 0;
    if list.is_empty() {
        let content = truncate_with_ellipsis(format!("  {}", EMPTY_MESSAGE), inner_width);
        print_inverted(&mut writer, 0, current_row, &format!("|{}|", content))?;
        current_row = current_row.saturating_add(1);
        rendered = 1;
    } else {
        let end_index = (list.scroll_offset + content_height).min(list.entries.len());
        for idx in list.scroll_offset..end_index {
            let content = format_reference_line(
                idx,
                &list.entries[idx],
                idx == list.selected,
                active == Some(idx),
                inner_width,
            );
            print_inverted(&mut writer, 0, current_row, &format!("|{}|", content))?;
            current_row = current_row.saturating_add(1);
            rendered += 1;
        }
    }
    for _ in rendered..content_height {
        print_inverted(&mut writer, 0, current_row, &format!("|{}|", " ".repeat(inner_width)))?;
        current_row = current_row.saturating_add(1);
    }

    print_inverted(&mut writer, 0, current_row, &horizontal_border)?;
    Ok(())
}

fn print_inverted(writer: &mut impl Write, col: u16, row: u16, content: &str) -> Result<()> {
    crossterm::execute!(
        writer,
        cursor::MoveTo(col, row),
        SetAttribute(Attribute::Reverse),
        Print(content),
        SetAttribute(Attribute::Reset)
    )?;
    Ok(())
}

fn format_reference_line(
    index: usize,
    entry: &str,
    selected: bool,
    active: bool,
    inner_width: usize,
) -> String {
    let marker = if selected { '>' } else { ' ' };
    let flag = if active { '*' } else { ' ' };
    truncate_with_ellipsis(format!("{}{}{:>3}. {}", marker, flag, index + 1, entry), inner_width)
}

fn truncate_with_ellipsis(text: String, width: usize) -> String {
    let len = text.chars().count();
    let mut text = if len > width {
        if width <= 3 {
            text.chars().take(width).collect::<String>()
        } else {
            let mut truncated = text.chars().take(width - 3).collect::<String>();
            truncated.push_str("...");
            truncated
        }
    } else {
        text
    };
    let len = text.chars().count();
    if len < width {
        text.push_str(&" ".repeat(width - len));
    }
    text
}

fn format_status(
    file_name: &str,
    page: PageNumber,
    page_count: usize,
    selected: Option<usize>,
    reference_count: usize,
    outcome: Option<&LastOutcome>,
    scale: f32,
) -> String {
    let zoom_percent = scale * 100.0;
    let zoom_display = if zoom_percent.is_finite() {
        format!("{:.0}%", zoom_percent)
    } else {
        "—".to_string()
    };

    let mut status = format!("{} — page {}/{}", file_name, page, page_count);
    if let Some(index) = selected {
        status.push_str(&format!(" — ref {}/{}", index + 1, reference_count));
    }
    if let Some(outcome) = outcome {
        status.push_str(" — ");
        status.push_str(&outcome.describe());
    }
    status.push_str(" — ");
    status.push_str(&zoom_display);
    status
}

fn combine_status(base: Option<String>, pending_input: Option<&str>) -> Option<String> {
    match (base, pending_input.filter(|s| !s.is_empty())) {
        (Some(mut base), Some(pending)) => {
            base.push_str(" | ");
            base.push_str(pending);
            Some(base)
        }
        (Some(base), None) => Some(base),
        (None, Some(pending)) => Some(pending.to_string()),
        (None, None) => None,
    }
}

fn draw_status_line(renderer: &mut KittyRenderer<io::Stdout>, status: &str) -> Result<()> {
    let window = terminal::window_size()?;
    let status_row = u32::from(window.rows).max(1).saturating_sub(1);
    let mut writer = renderer.writer();
    crossterm::execute!(
        &mut writer,
        cursor::MoveTo(0, status_row as u16),
        Clear(ClearType::CurrentLine)
    )?;
    write_status_line(&mut writer, status)?;
    Ok(())
}

fn fit_to_cells(
    image_width: u32,
    image_height: u32,
    cols: u32,
    rows: u32,
    cell_width: f32,
    cell_height: f32,
) -> (u32, u32) {
    let cols = cols.max(1);
    let rows = rows.max(1);
    if image_width == 0 || image_height == 0 || cell_width <= 0.0 || cell_height <= 0.0 {
        return (cols, rows);
    }

    let box_width = cols as f32 * cell_width;
    let box_height = rows as f32 * cell_height;
    let ratio = (box_width / image_width as f32).min(box_height / image_height as f32);
    if !ratio.is_finite() || ratio <= 0.0 {
        return (cols, rows);
    }

    let draw_cols = (image_width as f32 * ratio / cell_width)
        .round()
        .clamp(1.0, cols as f32) as u32;
    let draw_rows = (image_height as f32 * ratio / cell_height)
        .round()
        .clamp(1.0, rows as f32) as u32;
    (draw_cols, draw_rows)
}

fn init_logging(
    project_dirs: &ProjectDirs,
    default_filter: &str,
    console: bool,
) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "refmark.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);
    // stdout carries the JSON result in locate mode
    let console_layer = console.then(|| tracing_subscriber::fmt::layer().with_writer(io::stderr));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}
