use std::time::Duration;
use anyhow::Result;
use azchat_core::{ChatClient, ChatConfig, ChatSession};
use tracing::{info, warn};

mod app;
mod handler;
mod logging;
mod tui;
mod ui;

use app::App;
use tui::{EventHandler, Tui};

#[tokio::main]
async fn main() -> Result<()> {
    let log_dir = ChatConfig::config_dir()?;
    let _log_guard = logging::init(&log_dir)?;

    let config = match ChatConfig::load() {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "could not read config file, using defaults");
            ChatConfig::new().with_env_overrides()
        }
    };
    if config.api_key.is_empty() {
        warn!("no API key configured, set AZCHAT_API_KEY or add api_key to the config file");
    }

    let client = ChatClient::new(&config)?;
    info!(model = %config.model, url = %config.base_url, "starting azchat");
    let mut app = App::new(ChatSession::new(client));

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let result = run(&mut terminal, &mut app, config.typing_interval()).await;
    tui::restore()?;

    result
}

async fn run(terminal: &mut Tui, app: &mut App, typing_interval: Duration) -> Result<()> {
    let mut events = EventHandler::new(typing_interval);
    terminal.draw(|frame| ui::render(app, frame))?;

    while !app.should_quit {
        let redraw = tokio::select! {
            event = events.next() => match event {
                Some(event) => handler::handle_event(app, event)?,
                None => break,
            },
            Some(update) = app.session.next_update() => {
                let changed = app.session.handle_update(update);
                if changed && app.follow_output {
                    app.scroll_to_bottom();
                }
                changed
            }
        };

        if redraw {
            terminal.draw(|frame| ui::render(app, frame))?;
        }
    }

    Ok(())
}
