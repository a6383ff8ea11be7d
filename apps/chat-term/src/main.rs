mod bridge;
mod config;
mod logging;
mod state;

use std::{
    error::Error,
    io::Write,
    sync::{Arc, Mutex, PoisonError},
};

use bridge::{HELP_TEXT, InputCommand, TermBridge, ViewCallback, parse_input};
use chat_platform::{FileSessionStore, SessionStore};
use config::TermConfig;
use state::TermSnapshot;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    logging::init();
    info!("starting chat-term");

    let config = match TermConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            return Err(err.into());
        }
    };
    info!(
        api_base_url = %config.api_base_url,
        poll_interval_ms = config.sync.poll_interval_ms,
        data_dir = %config.data_dir.display(),
        "configuration loaded"
    );

    let runtime = chat_client::spawn_http_runtime(config.api_base_url.clone(), config.sync.clone())?;
    let store: Arc<dyn SessionStore> = Arc::new(FileSessionStore::new(config.session_profile_path()));
    let bridge = TermBridge::spawn(&config, runtime, store, stdout_view());

    println!("{HELP_TEXT}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_input(&line) {
            Ok(None) => {}
            Ok(Some(InputCommand::Quit)) => break,
            Ok(Some(InputCommand::Help)) => println!("{HELP_TEXT}"),
            Ok(Some(command)) => bridge.handle_input(command),
            Err(usage) => bridge.show_error(usage),
        }
    }

    info!("chat-term exiting");
    Ok(())
}

/// Print each snapshot once; identical consecutive snapshots are skipped.
fn stdout_view() -> ViewCallback {
    let last = Mutex::new(None::<TermSnapshot>);
    Arc::new(move |snapshot: TermSnapshot| {
        let mut last = last.lock().unwrap_or_else(PoisonError::into_inner);
        if last.as_ref() == Some(&snapshot) {
            return;
        }
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{}", snapshot.render());
        let _ = out.flush();
        *last = Some(snapshot);
    })
}
