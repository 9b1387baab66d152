use std::fs::{self, DirBuilder};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::AskyError;

const CONFIG_FILE_NAME: &str = "config.json";
const API_KEY: &str = "api_key";

/// The on-disk configuration record: a single JSON object kept in
/// `<dir>/config.json`.
///
/// Keys other than `api_key` are carried along untouched, so a save never
/// drops something another version of the tool wrote.
#[derive(Debug)]
pub struct ConfigStore {
    dir: PathBuf,
    path: PathBuf,
    record: Map<String, Value>,
}

impl ConfigStore {
    /// Opens the store rooted at `dir`: creates the directory if needed and
    /// loads the record when the file already exists.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, AskyError> {
        let dir = dir.into();
        let path = dir.join(CONFIG_FILE_NAME);
        let mut store = ConfigStore {
            dir,
            path,
            record: Map::new(),
        };
        store.initialize()?;
        store.load()?;
        Ok(store)
    }

    /// Ensures the configuration directory exists, owner-only on Unix.
    pub fn initialize(&self) -> Result<(), AskyError> {
        let mut builder = DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }

        builder.create(&self.dir).map_err(|e| {
            if e.kind() == ErrorKind::PermissionDenied {
                AskyError::ConfigPermission(self.dir.clone())
            } else {
                AskyError::ConfigDirectory(e)
            }
        })?;
        debug!(dir = %self.dir.display(), "configuration directory ready");
        Ok(())
    }

    /// Replaces the in-memory record with the file's content. A missing file
    /// leaves the record as it is.
    pub fn load(&mut self) -> Result<(), AskyError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no configuration file yet");
                return Ok(());
            }
            Err(e) => return Err(AskyError::ConfigRead(e)),
        };

        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(record)) => {
                self.record = record;
                debug!(path = %self.path.display(), keys = self.record.len(), "configuration loaded");
                Ok(())
            }
            Ok(other) => {
                debug!(kind = ?other, "configuration file is not a JSON object");
                Err(AskyError::ConfigFormat)
            }
            Err(e) => {
                debug!(error = %e, "configuration file is not valid JSON");
                Err(AskyError::ConfigFormat)
            }
        }
    }

    /// Writes the whole record back, replacing whatever the file held.
    pub fn save(&self) -> Result<(), AskyError> {
        let mut json = serde_json::to_string_pretty(&self.record)
            .map_err(|e| AskyError::ConfigWrite(std::io::Error::other(e)))?;
        json.push('\n');
        fs::write(&self.path, json).map_err(AskyError::ConfigWrite)?;
        debug!(path = %self.path.display(), "configuration saved");
        Ok(())
    }

    /// Stores `api_key` and saves. Empty or missing keys are rejected before
    /// anything changes.
    pub fn set_api_key<'a>(&mut self, api_key: impl Into<Option<&'a str>>) -> Result<(), AskyError> {
        let api_key = match api_key.into() {
            Some(key) if !key.is_empty() => key,
            _ => return Err(AskyError::Validation),
        };

        self.record
            .insert(API_KEY.to_string(), Value::String(api_key.to_string()));
        self.save()
    }

    pub fn api_key(&self) -> Option<&str> {
        self.record.get(API_KEY).and_then(Value::as_str)
    }

    pub fn config_file(&self) -> &Path {
        &self.path
    }
}
