//! VOICEVOX engine client.
//!
//! Wire contract:
//! - `GET /speakers` → voice directory
//! - `POST /audio_query?text=&speaker=` → synthesis query (JSON)
//! - `POST /synthesis?speaker=` with that query → WAV bytes

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

const JSON_TIMEOUT: Duration = Duration::from_secs(15);
const SYNTHESIS_TIMEOUT: Duration = Duration::from_secs(20);

/// One entry of the voice directory.
#[derive(Debug, Clone, Deserialize)]
pub struct Speaker {
    pub name: String,
    #[serde(default)]
    pub styles: Vec<SpeakerStyle>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpeakerStyle {
    #[serde(default)]
    pub name: String,
    pub id: u32,
}

/// Remote text-to-speech collaborator.
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    /// List available voices.
    async fn speakers(&self) -> Result<Vec<Speaker>>;

    /// Synthesize `text` with the given style id, returning WAV bytes.
    async fn synthesize(&self, text: &str, speaker_id: u32) -> Result<Vec<u8>>;
}

pub struct VoicevoxClient {
    base_url: String,
    client: Client,
}

impl VoicevoxClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| Error::Upstream(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[async_trait]
impl SpeechEngine for VoicevoxClient {
    async fn speakers(&self) -> Result<Vec<Speaker>> {
        let resp = self
            .client
            .get(self.url("/speakers"))
            .timeout(JSON_TIMEOUT)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| upstream("GET /speakers", &e))?;

        let speakers: Vec<Speaker> = resp
            .json()
            .await
            .map_err(|e| upstream("GET /speakers", &e))?;
        debug!("VOICEVOX lists {} speakers", speakers.len());
        Ok(speakers)
    }

    async fn synthesize(&self, text: &str, speaker_id: u32) -> Result<Vec<u8>> {
        let speaker = speaker_id.to_string();

        let query: serde_json::Value = self
            .client
            .post(self.url("/audio_query"))
            .query(&[("text", text), ("speaker", speaker.as_str())])
            .timeout(JSON_TIMEOUT)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| upstream("POST /audio_query", &e))?
            .json()
            .await
            .map_err(|e| upstream("POST /audio_query", &e))?;

        let wav = self
            .client
            .post(self.url("/synthesis"))
            .query(&[("speaker", speaker.as_str())])
            .json(&query)
            .timeout(SYNTHESIS_TIMEOUT)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| upstream("POST /synthesis", &e))?
            .bytes()
            .await
            .map_err(|e| upstream("POST /synthesis", &e))?;

        debug!(
            "Synthesized {} chars → {} bytes (speaker {speaker_id})",
            text.chars().count(),
            wav.len()
        );
        Ok(wav.to_vec())
    }
}

fn upstream(op: &str, e: &reqwest::Error) -> Error {
    if e.is_connect() {
        Error::Upstream(format!("cannot connect to VOICEVOX ({op}): {e}"))
    } else if e.is_timeout() {
        Error::Upstream(format!("VOICEVOX request timed out ({op})"))
    } else {
        Error::Upstream(format!("VOICEVOX request failed ({op}): {e}"))
    }
}
