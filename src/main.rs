mod api;
mod app;
mod assistant;
mod config;
mod error;
mod render;
mod store;

use std::future::pending;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use config::{Cli, Intent, OutputMode, Settings};
use render::Console;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("ASKY_LOG").unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let intent = Cli::parse().intent();
    if intent == Intent::ShowHelp {
        return ExitCode::from(app::show_help(&mut Console::stdio(OutputMode::Plain)));
    }

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            Console::stdio(OutputMode::Plain).error(&e.diagnostic());
            return ExitCode::from(app::EXIT_FAILURE);
        }
    };
    let mut console = Console::stdio(settings.output);

    let interrupt = async {
        // Without a handler the run just isn't interruptible.
        if tokio::signal::ctrl_c().await.is_err() {
            pending::<()>().await;
        }
    };

    let code = app::execute(intent, &settings, &mut console, api::open_gemini, interrupt).await;
    ExitCode::from(code)
}
