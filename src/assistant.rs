use tracing::{info, warn};

use crate::api::{ApiError, GeminiConfig, Generate};
use crate::config::Settings;
use crate::error::AskyError;
use crate::store::ConfigStore;

pub const EMPTY_RESPONSE: &str = "Received empty response from AI";

/// A ready-to-use connection to the completion model.
///
/// Getting one can fail (no key stored, model unavailable); using one cannot.
pub struct Assistant {
    model: Box<dyn Generate>,
}

impl Assistant {
    /// Configures the transport with the stored key and acquires the model
    /// through `open_model`. Nothing is sent over the network here, and
    /// `open_model` is not called at all when no key is stored.
    pub fn connect<F>(store: &ConfigStore, settings: &Settings, open_model: F) -> Result<Self, AskyError>
    where
        F: FnOnce(GeminiConfig, &str) -> Result<Box<dyn Generate>, ApiError>,
    {
        let api_key = store.api_key().ok_or(AskyError::MissingCredential)?;
        let config = GeminiConfig::new(api_key)
            .and_then(|c| c.base_url(&settings.api_base))
            .map_err(AskyError::ModelInit)?;
        let model = open_model(config, &settings.model_id).map_err(AskyError::ModelInit)?;

        info!(model = %settings.model_id, "assistant ready");
        Ok(Assistant { model })
    }

    /// Asks `question` and always returns something printable: the answer,
    /// the empty-response sentinel, or a description of what went wrong.
    pub async fn ask(&self, question: &str) -> String {
        match self.model.generate(question).await {
            Ok(Some(text)) if !text.is_empty() => text,
            Ok(_) => EMPTY_RESPONSE.to_string(),
            Err(e) => {
                warn!(error = %e, "completion request failed");
                format!("Error receiving response: {}", e)
            }
        }
    }
}
