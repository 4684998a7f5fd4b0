use std::fs::OpenOptions;
use std::sync::Mutex;

use anyhow::{Context, Result};
use thinkai_core::{Config, ProviderRouter};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod app;
mod handler;
mod tui;
mod ui;

use app::App;
use tui::{EventHandler, Tui};

const LOG_ENV: &str = "THINKAI_LOG";

/// Log to a file; the terminal belongs to the UI
fn init_logging() -> Result<()> {
    let log_dir = dirs::cache_dir()
        .context("Could not find cache directory")?
        .join("thinkai");
    std::fs::create_dir_all(&log_dir)?;

    let log_path = log_dir.join("thinkai.log");
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("opening {}", log_path.display()))?;

    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new("warn,thinkai_core=info,thinkai=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
        .with(filter)
        .try_init()
        .context("installing log subscriber")?;

    Ok(())
}

async fn run(terminal: &mut Tui, app: &mut App, events: &mut EventHandler) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        match events.next().await {
            Some(event) => handler::handle_event(app, event).await?,
            None => break,
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(err) = init_logging() {
        eprintln!("warning: logging disabled: {:#}", err);
    }

    let config = Config::load().unwrap_or_else(|err| {
        warn!(error = %format!("{:#}", err), "config unreadable, using defaults");
        Config::new()
    });
    let router = ProviderRouter::from_config(&config)?;

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = EventHandler::new();
    let mut app = App::new(config, router, events.sender());
    info!("thinkai started");

    let result = run(&mut terminal, &mut app, &mut events).await;

    tui::restore()?;
    result
}
