use std::env;
use std::path::PathBuf;

use clap::Parser;
use directories::BaseDirs;

use crate::api::DEFAULT_API_BASE;
use crate::error::AskyError;

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash-exp";

#[derive(Debug, Parser)]
#[clap(
    name = "asky",
    version,
    about = "AskY: Your Console AI Assistant",
    after_help = "Example usage:\n  asky --set-api-key YOUR_API_KEY\n  asky 'How does a quantum computer work'"
)]
pub struct Cli {
    #[clap(
        long("set-api-key"),
        value_name = "KEY",
        help = "Set API key for Google Gemini"
    )]
    pub set_api_key: Option<String>,

    #[clap(
        value_name = "QUESTION",
        help = "Question for AI (if not specified --set-api-key)"
    )]
    pub question: Option<String>,
}

/// What a single invocation asks `asky` to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    SetApiKey(String),
    AskQuestion(String),
    ShowHelp,
}

impl Cli {
    /// Storing a key wins over asking, even when a question was also given.
    pub fn intent(self) -> Intent {
        match (self.set_api_key, self.question) {
            (Some(key), _) => Intent::SetApiKey(key),
            (None, Some(question)) if !question.is_empty() => Intent::AskQuestion(question),
            _ => Intent::ShowHelp,
        }
    }

    pub fn help_text() -> String {
        use clap::CommandFactory;
        Cli::command().render_help().to_string()
    }
}

/// How answers are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Markdown,
    Plain,
}

/// Runtime settings that are not part of the command line.
#[derive(Debug, Clone)]
pub struct Settings {
    pub config_dir: PathBuf,
    pub model_id: String,
    pub api_base: String,
    pub output: OutputMode,
}

impl Settings {
    pub fn from_env() -> Result<Self, AskyError> {
        Self::from_lookup(|name| env::var(name).ok().filter(|v| !v.is_empty()))
    }

    /// Builds settings from `ASKY_*` variables as reported by `lookup`,
    /// falling back to `~/.asky` and the built-in model and endpoint.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AskyError> {
        let config_dir = match lookup("ASKY_CONFIG_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => BaseDirs::new()
                .ok_or(AskyError::NoHomeDirectory)?
                .home_dir()
                .join(".asky"),
        };

        let output = match lookup("ASKY_OUTPUT").as_deref() {
            Some("plain") => OutputMode::Plain,
            _ => OutputMode::Markdown,
        };

        Ok(Settings {
            config_dir,
            model_id: lookup("ASKY_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_base: lookup("ASKY_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            output,
        })
    }
}
