use std::future::Future;
use std::io::Write;

use anyhow::Result;
use tracing::debug;

use crate::api::{ApiError, GeminiConfig, Generate};
use crate::assistant::Assistant;
use crate::config::{Cli, Intent, Settings};
use crate::error::AskyError;
use crate::render::Console;
use crate::store::ConfigStore;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_INTERRUPTED: u8 = 130;

/// Runs one invocation to completion and returns the process exit code.
///
/// Everything after argument parsing races against `interrupt`; if it
/// resolves first, the in-flight work is dropped and the run ends with
/// [`EXIT_INTERRUPTED`].
pub async fn execute<O, E, F, I>(
    intent: Intent,
    settings: &Settings,
    console: &mut Console<O, E>,
    open_model: F,
    interrupt: I,
) -> u8
where
    O: Write,
    E: Write,
    F: FnOnce(GeminiConfig, &str) -> Result<Box<dyn Generate>, ApiError>,
    I: Future<Output = ()>,
{
    let request = match intent {
        Intent::ShowHelp => return show_help(console),
        Intent::SetApiKey(key) => Request::SetApiKey(key),
        Intent::AskQuestion(question) => Request::Ask(question),
    };

    let outcome = {
        let work = dispatch(request, settings, console, open_model);
        tokio::pin!(work);
        tokio::pin!(interrupt);
        tokio::select! {
            biased;
            _ = &mut interrupt => None,
            result = &mut work => Some(result),
        }
    };

    match outcome {
        Some(Ok(())) => EXIT_SUCCESS,
        Some(Err(e)) => {
            let message = match e.downcast_ref::<AskyError>() {
                Some(asky) => asky.diagnostic(),
                None => format!("Error: {:#}", e),
            };
            console.error(&message);
            EXIT_FAILURE
        }
        None => {
            console.notice("\nOperation interrupted by user");
            EXIT_INTERRUPTED
        }
    }
}

/// Prints usage; asking for nothing is a failed invocation.
pub fn show_help<O: Write, E: Write>(console: &mut Console<O, E>) -> u8 {
    console.print(&Cli::help_text());
    EXIT_FAILURE
}

/// The intents that need the configuration store.
enum Request {
    SetApiKey(String),
    Ask(String),
}

async fn dispatch<O, E, F>(
    request: Request,
    settings: &Settings,
    console: &mut Console<O, E>,
    open_model: F,
) -> Result<()>
where
    O: Write,
    E: Write,
    F: FnOnce(GeminiConfig, &str) -> Result<Box<dyn Generate>, ApiError>,
{
    let mut store = ConfigStore::open(&settings.config_dir)?;
    debug!(file = %store.config_file().display(), "using configuration");

    match request {
        Request::SetApiKey(key) => {
            store.set_api_key(key.as_str())?;
            console.success("API key saved successfully");
        }
        Request::Ask(question) => {
            let assistant = Assistant::connect(&store, settings, open_model)?;
            let response = assistant.ask(&question).await;
            console.display(&response);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::tests::{settings_in, Canned};
    use crate::assistant::EMPTY_RESPONSE;
    use crate::render::tests::{console, stderr_of, stdout_of};
    use crate::render::PlainRenderer;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::fs;
    use std::future::pending;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;
    use tokio::sync::Notify;

    /// Announces that a request is in flight, then never answers.
    struct Stalled {
        asked: Arc<Notify>,
    }

    #[async_trait]
    impl Generate for Stalled {
        async fn generate(&self, _prompt: &str) -> Result<Option<String>, ApiError> {
            self.asked.notify_one();
            pending().await
        }
    }

    fn canned(
        reply: fn() -> Result<Option<String>, ApiError>,
    ) -> impl FnOnce(GeminiConfig, &str) -> Result<Box<dyn Generate>, ApiError> {
        move |_: GeminiConfig, _: &str| -> Result<Box<dyn Generate>, ApiError> {
            Ok(Box::new(Canned(reply)))
        }
    }

    fn ask(question: &str) -> Intent {
        Intent::AskQuestion(question.to_string())
    }

    fn store_key(settings: &Settings, key: &str) {
        ConfigStore::open(&settings.config_dir)
            .unwrap()
            .set_api_key(key)
            .unwrap();
    }

    #[tokio::test]
    async fn help_exits_with_failure() {
        let home = tempdir().unwrap();
        let settings = settings_in(home.path());
        let mut console = console(Box::new(PlainRenderer));

        let code = execute(Intent::ShowHelp, &settings, &mut console, canned(|| Ok(None)), pending()).await;

        assert_eq!(code, EXIT_FAILURE);
        assert!(stdout_of(&console).contains("--set-api-key"));
        assert!(!settings.config_dir.exists());
    }

    #[tokio::test]
    async fn set_key_persists_and_confirms() {
        let home = tempdir().unwrap();
        let settings = settings_in(home.path());
        let mut console = console(Box::new(PlainRenderer));

        let code = execute(
            Intent::SetApiKey("secret".to_string()),
            &settings,
            &mut console,
            canned(|| Ok(None)),
            pending(),
        )
        .await;

        assert_eq!(code, EXIT_SUCCESS);
        assert_eq!(stdout_of(&console), "API key saved successfully\n");
        let store = ConfigStore::open(&settings.config_dir).unwrap();
        assert_eq!(store.api_key(), Some("secret"));
    }

    #[tokio::test]
    async fn empty_key_is_rejected() {
        let home = tempdir().unwrap();
        let settings = settings_in(home.path());
        let mut console = console(Box::new(PlainRenderer));

        let code = execute(
            Intent::SetApiKey(String::new()),
            &settings,
            &mut console,
            canned(|| Ok(None)),
            pending(),
        )
        .await;

        assert_eq!(code, EXIT_FAILURE);
        assert_eq!(
            stderr_of(&console),
            "Error: The API key must be a non-empty string\n"
        );
        assert!(!settings.config_dir.join("config.json").exists());
    }

    #[tokio::test]
    async fn ask_without_key_never_reaches_the_model() {
        let home = tempdir().unwrap();
        let settings = settings_in(home.path());
        let mut console = console(Box::new(PlainRenderer));

        let code = execute(
            ask("anyone there?"),
            &settings,
            &mut console,
            |_: GeminiConfig, _: &str| -> Result<Box<dyn Generate>, ApiError> {
                panic!("no model without a key")
            },
            pending(),
        )
        .await;

        assert_eq!(code, EXIT_FAILURE);
        assert_eq!(
            stderr_of(&console),
            "API key is not configured. Use --set-api-key to set it.\n"
        );
        assert!(stdout_of(&console).is_empty());
    }

    #[tokio::test]
    async fn answer_is_rendered() {
        let home = tempdir().unwrap();
        let settings = settings_in(home.path());
        store_key(&settings, "secret");
        let mut console = console(Box::new(PlainRenderer));

        let code = execute(
            ask("meaning of life"),
            &settings,
            &mut console,
            canned(|| Ok(Some("42".to_string()))),
            pending(),
        )
        .await;

        assert_eq!(code, EXIT_SUCCESS);
        assert_eq!(stdout_of(&console), "42\n");
    }

    #[tokio::test]
    async fn empty_answer_prints_sentinel() {
        let home = tempdir().unwrap();
        let settings = settings_in(home.path());
        store_key(&settings, "secret");
        let mut console = console(Box::new(PlainRenderer));

        let code = execute(ask("q"), &settings, &mut console, canned(|| Ok(None)), pending()).await;

        assert_eq!(code, EXIT_SUCCESS);
        assert_eq!(stdout_of(&console), format!("{}\n", EMPTY_RESPONSE));
    }

    #[tokio::test]
    async fn transport_failure_is_printed_not_fatal() {
        let home = tempdir().unwrap();
        let settings = settings_in(home.path());
        store_key(&settings, "secret");
        let mut console = console(Box::new(PlainRenderer));

        let code = execute(
            ask("q"),
            &settings,
            &mut console,
            canned(|| {
                Err(ApiError::Api {
                    status: StatusCode::BAD_GATEWAY,
                    message: "upstream reset".to_string(),
                })
            }),
            pending(),
        )
        .await;

        assert_eq!(code, EXIT_SUCCESS);
        assert_eq!(
            stdout_of(&console),
            "Error receiving response: 502 Bad Gateway: upstream reset\n"
        );
        assert!(stderr_of(&console).is_empty());
    }

    #[tokio::test]
    async fn unreachable_service_is_printed_not_fatal() {
        let home = tempdir().unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut settings = settings_in(home.path());
        settings.api_base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        store_key(&settings, "secret");
        let mut console = console(Box::new(PlainRenderer));

        let code = execute(ask("q"), &settings, &mut console, crate::api::open_gemini, pending()).await;

        assert_eq!(code, EXIT_SUCCESS);
        assert!(stdout_of(&console).starts_with("Error receiving response: Network error: "));
    }

    #[tokio::test]
    async fn interrupt_during_ask_exits_130() {
        let home = tempdir().unwrap();
        let settings = settings_in(home.path());
        store_key(&settings, "secret");
        let mut console = console(Box::new(PlainRenderer));

        let asked = Arc::new(Notify::new());
        let model_asked = asked.clone();
        let opened = Arc::new(AtomicBool::new(false));
        let model_opened = opened.clone();

        let code = execute(
            ask("q"),
            &settings,
            &mut console,
            move |_: GeminiConfig, _: &str| -> Result<Box<dyn Generate>, ApiError> {
                model_opened.store(true, Ordering::SeqCst);
                Ok(Box::new(Stalled { asked: model_asked }))
            },
            async move { asked.notified().await },
        )
        .await;

        assert_eq!(code, EXIT_INTERRUPTED);
        assert!(opened.load(Ordering::SeqCst));
        assert_eq!(stdout_of(&console), "\nOperation interrupted by user\n");
    }

    #[test]
    fn help_needs_no_settings() {
        let mut console = console(Box::new(PlainRenderer));

        assert_eq!(show_help(&mut console), EXIT_FAILURE);
        assert!(stdout_of(&console).contains("Example usage:"));
        assert!(stderr_of(&console).is_empty());
    }

    #[tokio::test]
    async fn malformed_config_is_fatal() {
        let home = tempdir().unwrap();
        let settings = settings_in(home.path());
        fs::create_dir_all(&settings.config_dir).unwrap();
        fs::write(settings.config_dir.join("config.json"), "{").unwrap();
        let mut console = console(Box::new(PlainRenderer));

        let code = execute(ask("q"), &settings, &mut console, canned(|| Ok(None)), pending()).await;

        assert_eq!(code, EXIT_FAILURE);
        assert_eq!(stderr_of(&console), "Error: Invalid configuration file format\n");
    }
}
