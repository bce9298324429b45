//! Voice name → VOICEVOX style id resolution.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::voicevox::{SpeechEngine, Speaker};
use crate::error::{Error, Result};

/// A caller's voice choice: an explicit style id or a display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SpeakerRef {
    Id(u32),
    Name(String),
}

/// Resolves voice names against the VOICEVOX directory.
///
/// Resolved names are cached for the process lifetime, so each distinct
/// name costs at most one directory query. The cache lock is never held
/// across a query; concurrent misses may both query and store equal ids.
pub struct SpeakerResolver {
    engine: Arc<dyn SpeechEngine>,
    default_name: String,
    cache: Mutex<HashMap<String, u32>>,
}

impl SpeakerResolver {
    pub fn new(engine: Arc<dyn SpeechEngine>, default_name: &str) -> Self {
        Self {
            engine,
            default_name: default_name.to_string(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn default_name(&self) -> &str {
        &self.default_name
    }

    /// Resolve a voice choice, substituting the default voice when absent or blank.
    pub async fn resolve(&self, speaker: Option<&SpeakerRef>) -> Result<u32> {
        let name = match speaker {
            Some(SpeakerRef::Id(id)) => return Ok(*id),
            Some(SpeakerRef::Name(name)) if !name.trim().is_empty() => name.trim(),
            _ => self.default_name.trim(),
        };

        if !name.is_empty() && name.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(id) = name.parse() {
                return Ok(id);
            }
        }

        let cached = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied();
        if let Some(id) = cached {
            return Ok(id);
        }

        let speakers = self.engine.speakers().await?;
        let id = find_style_id(&speakers, name)?;
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), id);
        debug!("Resolved speaker '{name}' → {id}");
        Ok(id)
    }
}

/// First style id of the first directory entry named exactly `name`.
pub fn find_style_id(speakers: &[Speaker], name: &str) -> Result<u32> {
    let speaker = speakers
        .iter()
        .find(|s| s.name == name)
        .ok_or_else(|| Error::SpeakerNotFound(name.to_string()))?;
    speaker
        .styles
        .first()
        .map(|style| style.id)
        .ok_or_else(|| Error::SpeakerNotFound(format!("{name} (no styles)")))
}
