use image::DynamicImage;
use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
};
use ratatui_image::{Resize, StatefulImage, picker::Picker, protocol::StatefulProtocol};
use std::collections::HashMap;
use std::time::Instant;

use crate::backend::controller::{LoadedPage, ReaderController};
use crate::backend::dimensions::column_layout;
use crate::backend::reader::{ChapterTicket, ReaderState, ReadingMode};

/// Chapters left below the selection before the next batch is requested.
const LOAD_MORE_THRESHOLD: usize = 5;
const DEFAULT_CELL_SIZE: (u16, u16) = (8, 16);

/// A vertically cropped slice of a page, rebuilt when the scroll position
/// changes which part of the page is on screen.
struct PageSlice {
    skip_rows: u32,
    rows: u16,
    protocol: StatefulProtocol,
}

pub struct App {
    pub controller: ReaderController,
    pub manga_title: String,
    pub chapter_list_state: ListState,
    pub picker: Option<Picker>,
    pub show_controls: bool,
    pub vertical_scroll: u32,
    pub viewport_rows: u16,
    pub visible_pages: Vec<usize>,
    page_sources: HashMap<usize, DynamicImage>,
    page_states: HashMap<usize, StatefulProtocol>,
    page_slices: HashMap<usize, PageSlice>,
    shown_chapter: Option<ChapterTicket>,
    started: Instant,
}

impl App {
    pub fn new(controller: ReaderController, manga_title: String, picker: Option<Picker>) -> Self {
        let mut chapter_list_state = ListState::default();
        chapter_list_state.select(Some(0));

        Self {
            controller,
            manga_title,
            chapter_list_state,
            picker,
            show_controls: true,
            vertical_scroll: 0,
            viewport_rows: 0,
            visible_pages: Vec::new(),
            page_sources: HashMap::new(),
            page_states: HashMap::new(),
            page_slices: HashMap::new(),
            shown_chapter: None,
            started: Instant::now(),
        }
    }

    pub fn cell_size(&self) -> (u16, u16) {
        self.picker
            .as_ref()
            .map(|p| p.font_size())
            .filter(|(w, h)| *w > 0 && *h > 0)
            .unwrap_or(DEFAULT_CELL_SIZE)
    }

    /// Drops page images that belong to a chapter that is no longer open.
    pub fn sync_chapter(&mut self) {
        let current = self.controller.reader().current_ticket().cloned();
        if current != self.shown_chapter {
            self.page_sources.clear();
            self.page_states.clear();
            self.page_slices.clear();
            self.visible_pages.clear();
            self.vertical_scroll = 0;
            self.shown_chapter = current;
        }
    }

    pub fn add_page_image(&mut self, page: LoadedPage) {
        if let Some(ref picker) = self.picker {
            let protocol = picker.new_resize_protocol(page.image.clone());
            self.page_states.insert(page.index, protocol);
        }
        self.page_slices.remove(&page.index);
        self.page_sources.insert(page.index, page.image);
    }

    /// Pages the view wants loaded right now.
    pub fn wanted_pages(&self) -> Vec<usize> {
        let reader = self.controller.reader();
        match reader.state() {
            ReaderState::Reading {
                mode: ReadingMode::Horizontal,
            } => {
                let current = reader.current_page();
                (current..current + 2)
                    .filter(|i| *i < reader.page_count())
                    .filter(|i| !self.page_sources.contains_key(i))
                    .collect()
            }
            ReaderState::Reading {
                mode: ReadingMode::Vertical,
            } => {
                let mut wanted = self.visible_pages.clone();
                if let Some(last) = wanted.last().copied() {
                    if last + 1 < reader.page_count() {
                        wanted.push(last + 1);
                    }
                }
                wanted.retain(|i| !self.page_sources.contains_key(i));
                wanted
            }
            _ => Vec::new(),
        }
    }

    pub fn selected_chapter(&self) -> usize {
        self.chapter_list_state.selected().unwrap_or(0)
    }

    pub fn select_chapter_row(&mut self, index: usize) {
        let len = self.controller.reader().catalog().len();
        if len == 0 {
            return;
        }
        self.chapter_list_state.select(Some(index.min(len - 1)));
    }

    /// True when the selection is close enough to the end of the loaded list
    /// that the next batch should be fetched.
    pub fn near_end_of_list(&self) -> bool {
        let len = self.controller.reader().catalog().len();
        len == 0 || self.selected_chapter() + LOAD_MORE_THRESHOLD >= len
    }

    pub fn scroll_by(&mut self, delta: i32) {
        self.vertical_scroll = if delta < 0 {
            self.vertical_scroll.saturating_sub(delta.unsigned_abs())
        } else {
            self.vertical_scroll.saturating_add(delta.unsigned_abs())
        };
    }

    fn spinner(&self) -> &'static str {
        const FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
        let idx = (self.started.elapsed().as_millis() / 100) as usize % FRAMES.len();
        FRAMES[idx]
    }

    fn chapter_label(&self, chapter_id: &str) -> String {
        let catalog = self.controller.reader().catalog();
        catalog
            .position(chapter_id)
            .and_then(|i| catalog.get(i))
            .map(|c| c.label())
            .unwrap_or_else(|| format!("Chapter {chapter_id}"))
    }
}

pub fn ui(f: &mut Frame, app: &mut App) {
    let state = app.controller.reader().state().clone();
    match state {
        ReaderState::BrowsingChapters => draw_chapter_list(f, app),
        ReaderState::CatalogLoadFailed { message } => {
            draw_chapter_list(f, app);
            draw_alert(
                f,
                "Could not load chapters",
                &message,
                "r: retry   Esc: back to list   R: reload list   q: quit",
            );
        }
        ReaderState::LoadingChapter { chapter_id } => {
            let message = format!("Loading {}...", app.chapter_label(&chapter_id));
            draw_loading_screen(f, app.spinner(), &message);
        }
        ReaderState::ChapterLoadFailed {
            chapter_id,
            message,
        } => {
            draw_chapter_list(f, app);
            let title = format!("{} is unavailable", app.chapter_label(&chapter_id));
            draw_alert(f, &title, &message, "press any key to return to the list");
        }
        ReaderState::Reading { mode } => draw_reader(f, app, mode),
    }
}

pub fn draw_loading_screen(f: &mut Frame, spinner: &str, message: &str) {
    let area = f.area();

    let block = Block::default()
        .borders(Borders::ALL)
        .title("Manga Reader")
        .border_style(Style::default().fg(Color::Cyan));

    let inner = block.inner(area);
    f.render_widget(block, area);

    let center_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(40),
            Constraint::Length(3),
            Constraint::Length(2),
            Constraint::Percentage(40),
        ])
        .split(inner);

    let loading_text = Line::from(vec![
        Span::styled(
            format!(" {} ", spinner),
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            "Loading...",
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        ),
    ]);
    f.render_widget(
        Paragraph::new(loading_text).alignment(Alignment::Center),
        center_layout[1],
    );

    let message = Paragraph::new(message)
        .style(Style::default().fg(Color::DarkGray))
        .alignment(Alignment::Center);
    f.render_widget(message, center_layout[2]);
}

fn draw_chapter_list(f: &mut Frame, app: &mut App) {
    let area = f.area();
    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(5),    // chapters
            Constraint::Length(1), // load state
            Constraint::Length(3), // footer
        ])
        .split(area);

    let catalog = app.controller.reader().catalog();
    let items: Vec<ListItem> = catalog
        .chapters()
        .iter()
        .map(|chapter| {
            let mut spans = vec![Span::styled(
                format!("Chapter {}", chapter.number),
                Style::default()
                    .fg(Color::White)
                    .add_modifier(Modifier::BOLD),
            )];
            if let Some(title) = &chapter.title {
                spans.push(Span::styled(
                    format!("  {title}"),
                    Style::default().fg(Color::Gray),
                ));
            }
            if let Some(volume) = &chapter.volume {
                spans.push(Span::styled(
                    format!("  vol. {volume}"),
                    Style::default().fg(Color::DarkGray),
                ));
            }
            if chapter.pages > 0 {
                spans.push(Span::styled(
                    format!("  {} pages", chapter.pages),
                    Style::default().fg(Color::DarkGray),
                ));
            }
            ListItem::new(Line::from(spans))
        })
        .collect();

    let mode = match app.controller.reader().mode() {
        ReadingMode::Horizontal => "horizontal",
        ReadingMode::Vertical => "vertical",
    };
    let status = if catalog.is_loading() {
        format!(" {} loading more chapters...", app.spinner())
    } else if catalog.is_empty() {
        " No chapters in this language".to_string()
    } else if catalog.has_more() {
        format!(" {} chapters loaded, scroll for more  ({mode})", catalog.len())
    } else {
        format!(" {} chapters  ({mode})", catalog.len())
    };

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(app.manga_title.as_str())
                .border_style(Style::default().fg(Color::Cyan)),
        )
        .highlight_style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("▶ ");
    f.render_stateful_widget(list, root[0], &mut app.chapter_list_state);

    f.render_widget(
        Paragraph::new(status).style(Style::default().fg(Color::DarkGray)),
        root[1],
    );

    draw_footer(
        f,
        root[2],
        &[("↑/↓", "select"), ("Enter", "read"), ("R", "reload"), ("q", "quit")],
    );
}

fn draw_reader(f: &mut Frame, app: &mut App, mode: ReadingMode) {
    let area = f.area();
    let constraints = if app.show_controls {
        vec![Constraint::Length(1), Constraint::Min(3), Constraint::Length(3)]
    } else {
        vec![Constraint::Length(0), Constraint::Min(3), Constraint::Length(0)]
    };
    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(area);

    if app.show_controls {
        draw_reader_header(f, root[0], app, mode);
    }

    match mode {
        ReadingMode::Horizontal => draw_horizontal_page(f, root[1], app),
        ReadingMode::Vertical => draw_vertical_column(f, root[1], app),
    }

    if app.show_controls {
        let toggle = match mode {
            ReadingMode::Horizontal => "vertical",
            ReadingMode::Vertical => "horizontal",
        };
        let pages = match mode {
            ReadingMode::Horizontal => ("←/→", "page"),
            ReadingMode::Vertical => ("↑/↓", "scroll"),
        };
        draw_footer(
            f,
            root[2],
            &[
                ("Esc", "chapters"),
                pages,
                ("m", toggle),
                ("n/p", "next/prev chapter"),
                ("space", "controls"),
                ("c", "clear cache"),
            ],
        );
    }
}

fn draw_reader_header(f: &mut Frame, area: Rect, app: &App, mode: ReadingMode) {
    let reader = app.controller.reader();
    let chapter = reader
        .current_ticket()
        .map(|t| app.chapter_label(&t.chapter_id))
        .unwrap_or_default();

    let mut spans = vec![
        Span::styled(
            app.manga_title.as_str(),
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw("  "),
        Span::styled(chapter, Style::default().fg(Color::White)),
    ];
    if mode == ReadingMode::Horizontal {
        spans.push(Span::styled(
            format!("  {} / {}", reader.current_page() + 1, reader.page_count()),
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        ));
    }
    if reader.refresh_in_flight() {
        spans.push(Span::styled(
            "  refreshing session...",
            Style::default().fg(Color::DarkGray),
        ));
    } else if let Some(error) = reader.last_refresh_error() {
        spans.push(Span::styled(
            format!("  {error}"),
            Style::default().fg(Color::Red),
        ));
    }

    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn draw_horizontal_page(f: &mut Frame, area: Rect, app: &mut App) {
    let index = app.controller.reader().current_page();
    if let Some(state) = app.page_states.get_mut(&index) {
        let image_widget = StatefulImage::new().resize(Resize::Scale(None));
        f.render_stateful_widget(image_widget, area, state);
        return;
    }

    let text = if app.page_sources.contains_key(&index) {
        format!("Page {} (image preview unsupported in this terminal)", index + 1)
    } else {
        format!("{} Loading page {}...", app.spinner(), index + 1)
    };
    draw_placeholder(f, area, &text);
}

fn draw_vertical_column(f: &mut Frame, area: Rect, app: &mut App) {
    app.viewport_rows = area.height;

    let reader = app.controller.reader();
    let Some(dims) = reader.dimensions().map(<[_]>::to_vec) else {
        let waiting = if reader.dimensions_pending() {
            "Measuring pages..."
        } else {
            "Waiting for pages..."
        };
        let text = format!("{} {waiting}", app.spinner());
        app.visible_pages.clear();
        draw_placeholder(f, area, &text);
        return;
    };

    let (cell_w, cell_h) = app.cell_size();
    let fallback_height = app.controller.fallback_dimension().height;
    let width_px = u32::from(area.width) * u32::from(cell_w);
    let (offsets, total_px) = column_layout(&dims, width_px, fallback_height);

    let spans = page_row_spans(&offsets, total_px, cell_h);
    let total_rows = spans.last().map_or(0, |(_, bottom)| *bottom);
    let max_scroll = total_rows.saturating_sub(u32::from(area.height));
    app.vertical_scroll = app.vertical_scroll.min(max_scroll);

    let view_top = app.vertical_scroll;
    let visible = visible_spans(&spans, view_top, area.height);

    app.visible_pages = visible.iter().map(|v| v.index).collect();
    for v in visible {
        // Both differences are bounded by the viewport height.
        let rect = Rect::new(
            area.x,
            area.y + (v.shown_top - view_top) as u16,
            area.width,
            (v.shown_bottom - v.shown_top) as u16,
        );
        let (top, bottom) = spans[v.index];
        draw_page_slice(f, rect, app, v.index, v.shown_top - top, bottom - top);
    }
}

/// Row span `[top, bottom)` of every page in the column. Every page gets at
/// least one row.
fn page_row_spans(offsets: &[u32], total_px: u32, cell_h: u16) -> Vec<(u32, u32)> {
    let cell_h = u32::from(cell_h.max(1));
    let total_rows = total_px.div_ceil(cell_h);
    offsets
        .iter()
        .enumerate()
        .map(|(index, offset)| {
            let top = offset / cell_h;
            let bottom = match offsets.get(index + 1) {
                Some(next) => next / cell_h,
                None => total_rows,
            }
            .max(top + 1);
            (top, bottom)
        })
        .collect()
}

#[derive(Debug, PartialEq, Eq)]
struct VisibleSpan {
    index: usize,
    shown_top: u32,
    shown_bottom: u32,
}

fn visible_spans(spans: &[(u32, u32)], view_top: u32, height: u16) -> Vec<VisibleSpan> {
    let view_bottom = view_top.saturating_add(u32::from(height));
    spans
        .iter()
        .enumerate()
        .filter(|(_, (top, bottom))| *bottom > view_top && *top < view_bottom)
        .map(|(index, (top, bottom))| VisibleSpan {
            index,
            shown_top: (*top).max(view_top),
            shown_bottom: (*bottom).min(view_bottom),
        })
        .collect()
}

fn draw_page_slice(
    f: &mut Frame,
    rect: Rect,
    app: &mut App,
    index: usize,
    skip_rows: u32,
    page_rows: u32,
) {
    let Some(source) = app.page_sources.get(&index) else {
        let text = format!("{} Page {}", app.spinner(), index + 1);
        draw_placeholder(f, rect, &text);
        return;
    };
    let Some(picker) = app.picker.as_ref() else {
        draw_placeholder(f, rect, &format!("Page {}", index + 1));
        return;
    };

    let stale = app
        .page_slices
        .get(&index)
        .is_none_or(|s| s.skip_rows != skip_rows || s.rows != rect.height);
    if stale {
        let (y0, height) = slice_bounds(source.height(), skip_rows, rect.height, page_rows);
        let slice = source.crop_imm(0, y0, source.width(), height);
        app.page_slices.insert(
            index,
            PageSlice {
                skip_rows,
                rows: rect.height,
                protocol: picker.new_resize_protocol(slice),
            },
        );
    }

    if let Some(slice) = app.page_slices.get_mut(&index) {
        let image_widget = StatefulImage::new().resize(Resize::Scale(None));
        f.render_stateful_widget(image_widget, rect, &mut slice.protocol);
    }
}

/// Source pixel rows `(y0, height)` for the part of a page `page_rows` tall
/// that starts `skip_rows` into it and shows `shown_rows`.
fn slice_bounds(
    image_height: u32,
    skip_rows: u32,
    shown_rows: u16,
    page_rows: u32,
) -> (u32, u32) {
    let image_height = u64::from(image_height);
    let rows = u64::from(page_rows.max(1));
    let y0 = (u64::from(skip_rows) * image_height / rows).min(image_height.saturating_sub(1));
    let height = (u64::from(shown_rows) * image_height / rows)
        .max(1)
        .min((image_height - y0).max(1));
    (y0 as u32, height as u32)
}

fn draw_placeholder(f: &mut Frame, area: Rect, text: &str) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));
    let paragraph = Paragraph::new(Line::from(Span::styled(
        text.to_string(),
        Style::default().fg(Color::DarkGray),
    )))
    .block(block)
    .alignment(Alignment::Center);
    f.render_widget(paragraph, area);
}

fn draw_alert(f: &mut Frame, title: &str, message: &str, hint: &str) {
    let area = centered_rect(60, 7, f.area());
    f.render_widget(Clear, area);

    let text = vec![
        Line::from(Span::styled(message, Style::default().fg(Color::White))),
        Line::from(""),
        Line::from(Span::styled(hint, Style::default().fg(Color::DarkGray))),
    ];
    let alert = Paragraph::new(text)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(title)
                .border_style(
                    Style::default()
                        .fg(Color::Red)
                        .add_modifier(Modifier::BOLD),
                ),
        )
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true });
    f.render_widget(alert, area);
}

fn draw_footer(f: &mut Frame, area: Rect, keys: &[(&str, &str)]) {
    let mut spans = Vec::with_capacity(keys.len() * 2);
    for (key, action) in keys {
        spans.push(Span::styled(*key, Style::default().fg(Color::Yellow)));
        spans.push(Span::raw(format!(": {action}  ")));
    }

    let p = Paragraph::new(Line::from(spans))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan)),
        )
        .alignment(Alignment::Center);
    f.render_widget(p, area);
}

fn centered_rect(percent_x: u16, height: u16, area: Rect) -> Rect {
    let width = area.width * percent_x / 100;
    let height = height.min(area.height);
    Rect::new(
        area.x + (area.width - width) / 2,
        area.y + (area.height - height) / 2,
        width,
        height,
    )
}
