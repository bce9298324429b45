//! One speak request end to end.
//!
//! Inside the cross-process lock: resolve the voice, produce the reply,
//! then (unless dry-run) synthesize and play it. Failures after the reply
//! exists are reported in [`SpeakResult::error`] alongside the reply text.

use std::fmt::Display;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::lock::ProcessLock;
use crate::reply::{elapsed_ms, CommandLlm, LanguageModel, Mode, ReplyGenerator, ReplySource};
use crate::speech::player::{AudioSink, CommandPlayer, PlayerSelector};
use crate::speech::speakers::{SpeakerRef, SpeakerResolver};
use crate::speech::stream::StreamingPipeline;
use crate::speech::voicevox::{SpeechEngine, VoicevoxClient};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpeakRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub speaker: Option<SpeakerRef>,
}

impl SpeakRequest {
    pub fn new(text: impl Into<String>, mode: Mode) -> Self {
        Self {
            text: text.into(),
            mode,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Latency {
    pub total_ms: u64,
    pub llm_ms: u64,
    /// Synthesis plus playback; 0 for dry runs.
    pub tts_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpeakResult {
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_text: Option<String>,
    pub played: bool,
    pub latency_ms: Latency,
    pub speaker_id: Option<u32>,
    pub reply_source: Option<ReplySource>,
    pub input_chars: usize,
    pub output_chars: usize,
    pub mode: Mode,
    pub error: Option<String>,
}

impl SpeakResult {
    /// A result for a request that never produced a reply.
    pub fn failed(request_id: String, request: &SpeakRequest, error: impl Display) -> Self {
        Self {
            request_id,
            reply_text: None,
            played: false,
            latency_ms: Latency::default(),
            speaker_id: None,
            reply_source: None,
            input_chars: request.text.chars().count(),
            output_chars: 0,
            mode: request.mode,
            error: Some(error.to_string()),
        }
    }

    /// An error with no reply text. An error next to a reply is a degraded
    /// success: the reply was produced but not (fully) spoken.
    pub fn is_failure(&self) -> bool {
        self.error.is_some() && self.reply_text.as_deref().map_or(true, str::is_empty)
    }
}

/// Short opaque id: SHA-256 over `"<unix seconds>:<text>"`, first 10 hex chars.
pub fn request_id(text: &str) -> String {
    request_id_at(text, Utc::now())
}

fn request_id_at(text: &str, at: DateTime<Utc>) -> String {
    let seconds = at.timestamp() as f64 + f64::from(at.timestamp_subsec_micros()) / 1e6;
    let digest = Sha256::digest(format!("{seconds}:{text}").as_bytes());
    hex::encode(digest)[..10].to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct VoicevoxHealth {
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speakers_count: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DefaultSpeaker {
    pub name: String,
    pub id: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub voicevox: VoicevoxHealth,
    pub default_speaker: DefaultSpeaker,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Health {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

pub struct SpeakerBox {
    config: Arc<Config>,
    engine: Arc<dyn SpeechEngine>,
    speakers: SpeakerResolver,
    replies: ReplyGenerator,
    pipeline: StreamingPipeline,
}

impl SpeakerBox {
    /// Wire the real collaborators from configuration.
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let engine: Arc<dyn SpeechEngine> = Arc::new(VoicevoxClient::new(&config.voicevox.url)?);
        let llm: Arc<dyn LanguageModel> = Arc::new(CommandLlm::new(
            config.llm_argv()?,
            Duration::from_secs(config.llm.timeout_sec),
        ));
        let players = Arc::new(PlayerSelector::new(config.player_argv()?));
        Ok(Self::with_parts(config, engine, llm, Arc::new(CommandPlayer), players))
    }

    pub fn with_parts(
        config: Arc<Config>,
        engine: Arc<dyn SpeechEngine>,
        llm: Arc<dyn LanguageModel>,
        sink: Arc<dyn AudioSink>,
        players: Arc<PlayerSelector>,
    ) -> Self {
        let speakers = SpeakerResolver::new(engine.clone(), &config.voicevox.speaker_name);
        let replies = ReplyGenerator::new(llm, config.reply.min_chars, config.reply.max_chars);
        let pipeline =
            StreamingPipeline::new(engine.clone(), sink, players, config.playback.stream);
        Self {
            config,
            engine,
            speakers,
            replies,
            pipeline,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run one request under the cross-process lock. Never fails; errors
    /// land in the returned result.
    pub async fn process(&self, request: SpeakRequest) -> SpeakResult {
        let started = Instant::now();
        let id = request_id(&request.text);
        let mut result = match self.process_locked(&request, id.clone(), started).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Speak request {id} failed: {e}");
                SpeakResult::failed(id, &request, e)
            }
        };
        result.latency_ms.total_ms = elapsed_ms(started);

        match serde_json::to_string(&result) {
            Ok(json) => info!("Speak result: {json}"),
            Err(e) => warn!("Failed to serialize speak result: {e}"),
        }
        result
    }

    async fn process_locked(
        &self,
        request: &SpeakRequest,
        request_id: String,
        started: Instant,
    ) -> Result<SpeakResult> {
        let _lock = ProcessLock::acquire(&self.config.queue.lock_path).await?;

        let speaker_id = self.speakers.resolve(request.speaker.as_ref()).await?;
        let reply = self.replies.generate(&request.text, request.mode).await;

        let mut result = SpeakResult {
            request_id,
            output_chars: reply.text.chars().count(),
            reply_text: Some(reply.text),
            played: false,
            latency_ms: Latency {
                llm_ms: reply.llm_ms,
                ..Latency::default()
            },
            speaker_id: Some(speaker_id),
            reply_source: Some(reply.source),
            input_chars: request.text.chars().count(),
            mode: request.mode,
            error: None,
        };

        if request.dry_run {
            return Ok(result);
        }

        let tts_started = Instant::now();
        let text = result.reply_text.as_deref().unwrap_or_default();
        let spoken = self.pipeline.run(text, speaker_id).await;
        match spoken {
            Ok(()) => {
                result.played = true;
                result.latency_ms.tts_ms = elapsed_ms(tts_started);
            }
            Err(e) => {
                warn!("Playback failed after {}ms: {e}", elapsed_ms(started));
                result.error = Some(e.to_string());
            }
        }
        Ok(result)
    }

    /// Stream `text` as-is with the given voice, bypassing reply generation.
    pub async fn say(&self, text: &str, speaker: Option<&SpeakerRef>) -> Result<()> {
        if text.trim().is_empty() {
            return Err(Error::InvalidRequest("text is empty".into()));
        }
        let _lock = ProcessLock::acquire(&self.config.queue.lock_path).await?;
        let speaker_id = self.speakers.resolve(speaker).await?;
        info!("Speaking with style {speaker_id}");
        self.pipeline.stream(text, speaker_id).await
    }

    /// Probe VOICEVOX and resolve the default voice.
    pub async fn health(&self) -> Health {
        let mut health = Health {
            status: "ok",
            voicevox: VoicevoxHealth {
                reachable: false,
                speakers_count: None,
            },
            default_speaker: DefaultSpeaker {
                name: self.speakers.default_name().to_string(),
                id: None,
            },
            error: None,
        };

        let outcome = match self.engine.speakers().await {
            Ok(speakers) => {
                health.voicevox = VoicevoxHealth {
                    reachable: true,
                    speakers_count: Some(speakers.len()),
                };
                self.speakers.resolve(None).await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(id) => health.default_speaker.id = Some(id),
            Err(e) => {
                health.status = "degraded";
                health.error = Some(e.to_string());
            }
        }
        health
    }
}
