//! Audio player selection and subprocess playback.
//!
//! WAV payloads are written to a temporary file and handed to an external
//! player program. The player is either the configured command or the first
//! installed of `pw-play`, `paplay`, `aplay -q`.

use std::io::Write;
use std::process::Stdio;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Probe order when no player is configured.
const CANDIDATES: &[&[&str]] = &[&["pw-play"], &["paplay"], &["aplay", "-q"]];

/// Plays one WAV payload with a given player command line.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Fails with [`Error::Player`] when the player program itself fails.
    async fn play(&self, command: &[String], wav: &[u8]) -> Result<()>;
}

/// Runs `<command...> <tmpfile.wav>` and waits for it to exit.
pub struct CommandPlayer;

#[async_trait]
impl AudioSink for CommandPlayer {
    async fn play(&self, command: &[String], wav: &[u8]) -> Result<()> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| Error::PlayerNotFound("empty player command".into()))?;

        let mut file = tempfile::Builder::new()
            .prefix("vv-speaker-")
            .suffix(".wav")
            .tempfile()?;
        file.write_all(wav)?;
        file.flush()?;

        debug!("Playing {} bytes with {program}", wav.len());
        let status = Command::new(program)
            .args(args)
            .arg(file.path())
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|e| Error::Player(format!("failed to launch {program}: {e}")))?;

        if !status.success() {
            return Err(Error::Player(format!("{program} exited with {status}")));
        }
        Ok(())
    }
}

type Probe = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Picks the player command, remembering the choice for the process.
pub struct PlayerSelector {
    preferred: Vec<String>,
    probe: Probe,
    selected: Mutex<Option<Vec<String>>>,
}

impl PlayerSelector {
    /// `preferred` is the tokenized configured command; empty means probe.
    pub fn new(preferred: Vec<String>) -> Self {
        Self::with_probe(preferred, |program| which::which(program).is_ok())
    }

    pub fn with_probe<F>(preferred: Vec<String>, probe: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self {
            preferred,
            probe: Box::new(probe),
            selected: Mutex::new(None),
        }
    }

    /// Usable players in priority order.
    fn chain(&self) -> Vec<Vec<String>> {
        let mut chain = Vec::new();
        if !self.preferred.is_empty() {
            chain.push(self.preferred.clone());
        }
        for candidate in CANDIDATES {
            let argv: Vec<String> = candidate.iter().map(|s| (*s).to_string()).collect();
            if !chain.contains(&argv) && (self.probe)(candidate[0]) {
                chain.push(argv);
            }
        }
        chain
    }

    /// Current player command, probing on first use.
    pub fn select(&self) -> Result<Vec<String>> {
        let mut selected = self.selected.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(command) = selected.as_ref() {
            return Ok(command.clone());
        }

        let command = self.chain().into_iter().next().ok_or_else(|| {
            Error::PlayerNotFound("set PLAYER_COMMAND or install pw-play/paplay/aplay".into())
        })?;
        info!("Selected audio player: {}", command.join(" "));
        *selected = Some(command.clone());
        Ok(command)
    }

    /// Replace a player that failed with the next candidate after it.
    pub fn fallback(&self, failed: &[String]) -> Result<Vec<String>> {
        let chain = self.chain();
        let next = match chain.iter().position(|c| c.as_slice() == failed) {
            Some(i) => chain.get(i + 1).cloned(),
            None => chain.into_iter().find(|c| c.as_slice() != failed),
        }
        .ok_or_else(|| {
            Error::PlayerNotFound(format!("no fallback player after {}", failed.join(" ")))
        })?;

        info!("Switching audio player: {} → {}", failed.join(" "), next.join(" "));
        *self.selected.lock().unwrap_or_else(PoisonError::into_inner) = Some(next.clone());
        Ok(next)
    }
}
