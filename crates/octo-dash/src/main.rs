mod logging;
mod state;
mod theme;
mod ui;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use notify::{Config as WatchConfig, RecommendedWatcher, RecursiveMode, Watcher};
use octo_core::{config, ChannelNotifier, Config, DashboardController};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::{
    io,
    path::{Path, PathBuf},
    sync::mpsc::{self, Receiver},
    time::{Duration, Instant},
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "octo-dash", version, about = "Terminal dashboard for running scripts")]
struct Args {
    /// Directory scanned for scripts (created if missing)
    #[arg(long)]
    scripts_dir: Option<PathBuf>,
    /// Config file, defaults to $XDG_CONFIG_HOME/octo/config.toml
    #[arg(long)]
    config: Option<PathBuf>,
    /// Directory for octo-dash.log; logging is off without one
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    let _log_guard = logging::init_logging(config.log_dir.as_deref());
    info!(scripts_dir = %config.scripts_dir.display(), "starting octo-dash");

    let (notifier, redraw_rx) = ChannelNotifier::channel();
    let mut app = state::App::new(DashboardController::new(config, notifier));
    app.refresh_catalog();
    app.update_clock();

    let (watcher, watch_rx) = setup_watcher(app.controller.scripts_dir());
    let mut terminal = enter_terminal()?;
    let result = run_app(&mut terminal, &mut app, &redraw_rx, watch_rx);
    leave_terminal(&mut terminal)?;
    drop(watcher);
    app.shutdown();

    if let Err(err) = result {
        eprintln!("octo-dash: {err}");
    }

    Ok(())
}

fn load_config(args: &Args) -> Result<Config> {
    let path = args.config.clone().unwrap_or_else(config::config_path);
    let mut config = Config::load(&path)
        .with_context(|| format!("Failed to load config {}", path.display()))?;
    if let Some(dir) = &args.scripts_dir {
        config.scripts_dir = dir.clone();
    }
    if let Some(dir) = &args.log_dir {
        config.log_dir = Some(dir.clone());
    }
    Ok(config)
}

type Tui = Terminal<CrosstermBackend<io::Stdout>>;

fn enter_terminal() -> Result<Tui> {
    enable_raw_mode().context("Failed to enable raw mode")?;
    execute!(io::stdout(), EnterAlternateScreen, EnableMouseCapture)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout()))?;
    terminal.clear()?;
    Ok(terminal)
}

/// Undoes `enter_terminal` even if one step fails, reporting the first error.
fn leave_terminal(terminal: &mut Tui) -> Result<()> {
    let raw = disable_raw_mode();
    let screen = execute!(
        terminal.backend_mut(),
        DisableMouseCapture,
        LeaveAlternateScreen
    );
    let cursor = terminal.show_cursor();
    raw?;
    screen?;
    cursor?;
    Ok(())
}

fn run_app(
    terminal: &mut Tui,
    app: &mut state::App,
    redraw_rx: &Receiver<()>,
    watch_rx: Option<Receiver<()>>,
) -> Result<()> {
    let poll_interval = app.controller.config().poll_interval();
    let clock_interval = app.controller.config().clock_interval();
    let input_poll = Duration::from_millis(20);
    let mut last_poll = Instant::now();
    let mut last_clock = Instant::now();

    loop {
        if app.dirty {
            terminal.draw(|f| ui::render(f, app))?;
            app.dirty = false;
        }

        if event::poll(input_poll)? {
            match event::read()? {
                Event::Key(key) => {
                    if matches!(key.kind, KeyEventKind::Press | KeyEventKind::Repeat) {
                        app.handle_key(key);
                    }
                }
                Event::Mouse(mouse) => {
                    app.handle_mouse(mouse);
                }
                Event::Resize(_, _) => {
                    app.mark_dirty();
                }
                _ => {}
            }
        }

        // Output arrives from the relay thread; only this thread touches the UI.
        if redraw_rx.try_recv().is_ok() {
            app.mark_dirty();
        }

        if let Some(rx) = &watch_rx {
            let mut changed = false;
            while rx.try_recv().is_ok() {
                changed = true;
            }
            if changed {
                app.refresh_catalog();
                last_poll = Instant::now();
            }
        }

        if last_poll.elapsed() >= poll_interval {
            app.on_tick();
            last_poll = Instant::now();
        }

        if last_clock.elapsed() >= clock_interval {
            app.update_clock();
            last_clock = Instant::now();
        }

        if app.should_quit() {
            break;
        }
    }

    Ok(())
}

fn setup_watcher(root: &Path) -> (Option<RecommendedWatcher>, Option<Receiver<()>>) {
    let (tx, rx) = mpsc::sync_channel(1);
    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if res.is_ok() {
                let _ = tx.try_send(());
            }
        },
        WatchConfig::default(),
    ) {
        Ok(watcher) => watcher,
        Err(err) => {
            warn!(error = %err, "file watcher unavailable, polling only");
            return (None, None);
        }
    };

    if let Err(err) = watcher.watch(root, RecursiveMode::Recursive) {
        warn!(error = %err, root = %root.display(), "watch failed, polling only");
        return (None, None);
    }

    (Some(watcher), Some(rx))
}
