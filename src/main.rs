mod backend;
mod ui;

use backend::cache::PageCache;
use backend::catalog::ChapterCatalog;
use backend::config::Config;
use backend::controller::{ReaderController, Services};
use backend::dimensions::PageDimension;
use backend::mangadex::MangaDexClient;
use backend::reader::{ReaderSession, ReaderState, ReadingMode};
use backend::tasks::BackgroundTask;
use ui::ui::{App, draw_loading_screen, ui};

use clap::Parser;
use crossterm::{
    event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use futures::StreamExt;
use ratatui::{Terminal, backend::CrosstermBackend};
use ratatui_image::picker::Picker;
use std::{error::Error, fs, io, path::PathBuf, sync::Arc};
use tokio::sync::mpsc;

/// Rows scrolled per arrow key in the vertical reader.
const SCROLL_STEP: i32 = 3;

#[derive(Parser, Debug)]
#[command(name = "manga-reader", version, about = "Read a MangaDex manga in the terminal")]
struct Cli {
    /// MangaDex manga id
    manga_id: String,

    /// Path to config.toml (defaults to the platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Reading mode to start in
    #[arg(long, value_enum)]
    mode: Option<ReadingMode>,

    /// Translated language to list chapters for
    #[arg(long)]
    language: Option<String>,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

enum Action {
    Continue,
    ClearCache,
    Quit,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => match Config::default_path() {
            Ok(path) => Config::load_or_default(&path)?,
            Err(e) => {
                log::warn!("{e}, using defaults");
                Config::default()
            }
        },
    };
    if let Some(mode) = cli.mode {
        config.reader.default_mode = mode;
    }
    if let Some(language) = cli.language {
        config.api.language = language;
    }
    config.validate()?;

    let client = Arc::new(MangaDexClient::new(&config)?);

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let picker = Picker::from_query_stdio().ok();
    let fallback = PageDimension {
        width: screen_width_px(picker.as_ref(), &config),
        height: config.reader.fallback_page_height,
    };

    terminal.draw(|f| draw_loading_screen(f, "⠋", "Fetching manga details..."))?;
    let manga_title = match client.fetch_manga_title(&cli.manga_id).await {
        Ok(title) => title,
        Err(e) => {
            log::warn!("could not fetch title for {}: {}", cli.manga_id, e);
            cli.manga_id.clone()
        }
    };

    let (task_tx, mut task_rx) = mpsc::unbounded_channel::<BackgroundTask>();

    let reader = ReaderSession::new(
        ChapterCatalog::new(cli.manga_id.clone(), config.catalog.batch_limit),
        config.reader.default_mode,
        config.session_policy(),
    );
    let services = Services {
        source: client.clone(),
        images: client,
    };
    let cache = PageCache::new(PageCache::default_dir(), &config.cache);
    let mut controller = ReaderController::new(reader, services, fallback, cache, task_tx);
    controller.load_more_chapters();

    let mut app = App::new(controller, manga_title, picker);
    let res = run_app(&mut terminal, &mut app, &mut task_rx).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        log::error!("{err}");
        eprintln!("{err}");
    }
    Ok(())
}

/// Logs go to `<cache_dir>/manga-reader/reader.log`; stderr belongs to the
/// terminal UI.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));

    let file = dirs::cache_dir()
        .map(|dir| dir.join("manga-reader"))
        .and_then(|dir| {
            fs::create_dir_all(&dir).ok()?;
            fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join("reader.log"))
                .ok()
        });
    match file {
        Some(file) => {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }
        None => {
            builder.filter_level(log::LevelFilter::Off);
        }
    }
    builder.init();
}

fn screen_width_px(picker: Option<&Picker>, config: &Config) -> u32 {
    if let Ok(size) = crossterm::terminal::window_size() {
        if size.width > 0 {
            return u32::from(size.width);
        }
        if let Some(picker) = picker {
            let (cell_width, _) = picker.font_size();
            if size.columns > 0 && cell_width > 0 {
                return u32::from(size.columns) * u32::from(cell_width);
            }
        }
    }
    config.reader.fallback_screen_width
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    task_rx: &mut mpsc::UnboundedReceiver<BackgroundTask>,
) -> io::Result<()> {
    let mut event_stream = EventStream::new();

    loop {
        app.sync_chapter();
        if *app.controller.reader().state() == ReaderState::BrowsingChapters
            && app.near_end_of_list()
        {
            app.controller.load_more_chapters();
        }

        terminal.draw(|f| ui(f, app))?;

        if let ReaderState::Reading {
            mode: ReadingMode::Vertical,
        } = app.controller.reader().state()
        {
            if let Some(first) = app.visible_pages.first().copied() {
                app.controller.set_current_page(first);
            }
        }
        for index in app.wanted_pages() {
            app.controller.request_page(index);
        }

        tokio::select! {
            // Redraw tick for spinners
            _ = tokio::time::sleep(tokio::time::Duration::from_millis(50)) => {}

            Some(Ok(event)) = event_stream.next() => {
                if let Event::Key(key) = event {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    match handle_key(app, key) {
                        Action::Continue => {}
                        Action::ClearCache => app.controller.clear_cache().await,
                        Action::Quit => return Ok(()),
                    }
                }
            }

            Some(task) = task_rx.recv() => {
                if let Some(page) = app.controller.handle(task) {
                    app.add_page_image(page);
                }
            }
        }
    }
}

fn handle_key(app: &mut App, key: KeyEvent) -> Action {
    let state = app.controller.reader().state().clone();
    match state {
        ReaderState::BrowsingChapters => handle_list_input(app, key.code),
        ReaderState::CatalogLoadFailed { .. } => match key.code {
            KeyCode::Char('r') => {
                app.controller.retry_catalog();
                Action::Continue
            }
            KeyCode::Char('R') => {
                if app.controller.reload_catalog() {
                    app.chapter_list_state.select(Some(0));
                }
                Action::Continue
            }
            KeyCode::Esc => {
                app.controller.dismiss_catalog_error();
                Action::Continue
            }
            KeyCode::Char('q') => Action::Quit,
            _ => Action::Continue,
        },
        ReaderState::LoadingChapter { .. } => match key.code {
            KeyCode::Esc => {
                app.controller.close_chapter();
                Action::Continue
            }
            KeyCode::Char('q') => Action::Quit,
            _ => Action::Continue,
        },
        ReaderState::ChapterLoadFailed { .. } => {
            app.controller.dismiss_error();
            Action::Continue
        }
        ReaderState::Reading { mode } => handle_reader_input(app, key.code, mode),
    }
}

fn handle_list_input(app: &mut App, key: KeyCode) -> Action {
    match key {
        KeyCode::Char('q') => return Action::Quit,
        KeyCode::Char('R') => {
            if app.controller.reload_catalog() {
                app.chapter_list_state.select(Some(0));
            }
        }
        KeyCode::Up => {
            let selected = app.selected_chapter();
            app.select_chapter_row(selected.saturating_sub(1));
        }
        KeyCode::Down => {
            let selected = app.selected_chapter();
            app.select_chapter_row(selected + 1);
        }
        KeyCode::PageUp => {
            let selected = app.selected_chapter();
            app.select_chapter_row(selected.saturating_sub(10));
        }
        KeyCode::PageDown => {
            let selected = app.selected_chapter();
            app.select_chapter_row(selected + 10);
        }
        KeyCode::Enter => {
            let chapter_id = app
                .controller
                .reader()
                .catalog()
                .get(app.selected_chapter())
                .map(|c| c.id.clone());
            if let Some(chapter_id) = chapter_id {
                app.controller.select_chapter(&chapter_id);
            }
        }
        _ => {}
    }
    Action::Continue
}

fn handle_reader_input(app: &mut App, key: KeyCode, mode: ReadingMode) -> Action {
    match key {
        KeyCode::Char('q') => return Action::Quit,
        KeyCode::Char('c') => return Action::ClearCache,
        KeyCode::Esc => {
            // Keep the list selection on the chapter that was open.
            let position = app
                .controller
                .reader()
                .current_ticket()
                .and_then(|t| app.controller.reader().catalog().position(&t.chapter_id));
            app.controller.close_chapter();
            if let Some(position) = position {
                app.select_chapter_row(position);
            }
        }
        KeyCode::Char('m') => app.controller.toggle_mode(),
        KeyCode::Char(' ') => app.show_controls = !app.show_controls,
        KeyCode::Char('n') => {
            app.controller.open_next_chapter();
        }
        KeyCode::Char('p') => {
            app.controller.open_previous_chapter();
        }
        KeyCode::Home => {
            app.controller.set_current_page(0);
            app.vertical_scroll = 0;
        }
        KeyCode::End => {
            let last = app.controller.reader().page_count().saturating_sub(1);
            app.controller.set_current_page(last);
            app.vertical_scroll = u32::MAX;
        }
        code => match mode {
            ReadingMode::Horizontal => match code {
                KeyCode::Left => {
                    app.controller.prev_page();
                }
                KeyCode::Right => {
                    app.controller.next_page();
                }
                _ => {}
            },
            ReadingMode::Vertical => {
                let page = i32::from(app.viewport_rows.max(1));
                match code {
                    KeyCode::Up => app.scroll_by(-SCROLL_STEP),
                    KeyCode::Down => app.scroll_by(SCROLL_STEP),
                    KeyCode::PageUp => app.scroll_by(-page),
                    KeyCode::PageDown => app.scroll_by(page),
                    _ => {}
                }
            }
        },
    }
    Action::Continue
}
