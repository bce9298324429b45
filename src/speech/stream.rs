//! Sentence-level streaming: synthesize the next segment while the current
//! one plays.
//!
//! Pipeline:
//! 1. Reply → sentence segments (split on 。！？!?)
//! 2. Producer task: segment → VOICEVOX synthesis → handoff channel (depth 2)
//! 3. Caller: handoff → player, strictly in segment order
//! 4. Player failure → retry the same payload once on the next player

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::player::{AudioSink, PlayerSelector};
use super::voicevox::SpeechEngine;
use crate::error::{Error, Result};
use crate::text::split_sentences;

/// Synthesized payloads allowed to wait for the player.
const HANDOFF_DEPTH: usize = 2;

enum Handoff {
    Audio(Vec<u8>),
    Done,
}

pub struct StreamingPipeline {
    engine: Arc<dyn SpeechEngine>,
    sink: Arc<dyn AudioSink>,
    players: Arc<PlayerSelector>,
    streaming: bool,
}

impl StreamingPipeline {
    pub fn new(
        engine: Arc<dyn SpeechEngine>,
        sink: Arc<dyn AudioSink>,
        players: Arc<PlayerSelector>,
        streaming: bool,
    ) -> Self {
        Self {
            engine,
            sink,
            players,
            streaming,
        }
    }

    /// Speak a reply, streamed per sentence unless streaming is disabled.
    pub async fn run(&self, reply: &str, speaker_id: u32) -> Result<()> {
        if self.streaming {
            return self.stream(reply, speaker_id).await;
        }

        self.players.select()?;
        let wav = self.engine.synthesize(reply, speaker_id).await?;
        self.play(&wav).await
    }

    /// Speak `text` segment by segment, overlapping synthesis and playback.
    pub async fn stream(&self, text: &str, speaker_id: u32) -> Result<()> {
        let mut segments = split_sentences(text);
        if segments.is_empty() {
            segments.push(text.to_string());
        }
        self.players.select()?;

        let total = segments.len();
        let (tx, mut rx) = mpsc::channel::<Result<Handoff>>(HANDOFF_DEPTH);

        let engine = self.engine.clone();
        let texts = segments.clone();
        let producer = tokio::spawn(async move {
            for segment in &texts {
                let result = engine.synthesize(segment, speaker_id).await;
                let failed = result.is_err();
                if tx.send(result.map(Handoff::Audio)).await.is_err() || failed {
                    // Consumer gone, or nothing sensible left to send
                    return;
                }
            }
            let _ = tx.send(Ok(Handoff::Done)).await;
        });

        let mut outcome = Ok(());
        let mut index = 0;
        loop {
            match rx.recv().await {
                Some(Ok(Handoff::Audio(wav))) => {
                    index += 1;
                    info!("[play {index}/{total}] {}", segments[index - 1]);
                    if let Err(e) = self.play(&wav).await {
                        outcome = Err(e);
                        break;
                    }
                }
                Some(Ok(Handoff::Done)) => break,
                Some(Err(e)) => {
                    warn!("Synthesis failed for segment {}/{total}: {e}", index + 1);
                    outcome = Err(e);
                    break;
                }
                None => {
                    outcome = Err(Error::Upstream("synthesis stopped before the last segment".into()));
                    break;
                }
            }
        }

        // Unblock a producer parked on a full channel
        drop(rx);
        if let Err(e) = producer.await {
            warn!("Synthesis producer ended abnormally: {e}");
        }
        debug!("Streamed {index}/{total} segments");
        outcome
    }

    /// Play one payload, retrying once on the next player if the current one fails.
    async fn play(&self, wav: &[u8]) -> Result<()> {
        let command = self.players.select()?;
        match self.sink.play(&command, wav).await {
            Err(Error::Player(reason)) => {
                warn!("Player '{}' failed: {reason}", command.join(" "));
                let Ok(next) = self.players.fallback(&command) else {
                    return Err(Error::Player(reason));
                };
                self.sink.play(&next, wav).await
            }
            other => other,
        }
    }
}
