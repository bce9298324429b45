//! In-memory collaborators for unit tests.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::reply::LanguageModel;
use crate::speaker_box::SpeakerBox;
use crate::speech::player::{AudioSink, PlayerSelector};
use crate::speech::voicevox::{SpeechEngine, Speaker, SpeakerStyle};

pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.queue.lock_path = dir.join("vv-speaker-test.lock");
    config
}

/// A speaker box over fakes, with only `pw-play` installed.
pub fn test_box(
    config: Config,
    engine: &Arc<FakeEngine>,
    llm: &Arc<FakeLlm>,
    sink: &Arc<FakeSink>,
) -> Arc<SpeakerBox> {
    let players = PlayerSelector::with_probe(Vec::new(), |program: &str| program == "pw-play");
    Arc::new(SpeakerBox::with_parts(
        Arc::new(config),
        engine.clone(),
        llm.clone(),
        sink.clone(),
        Arc::new(players),
    ))
}

fn speaker(name: &str, ids: &[u32]) -> Speaker {
    Speaker {
        name: name.into(),
        styles: ids
            .iter()
            .map(|&id| SpeakerStyle {
                name: "ノーマル".into(),
                id,
            })
            .collect(),
    }
}

/// VOICEVOX stand-in; synthesized "audio" is the segment text itself.
pub struct FakeEngine {
    speakers: Vec<Speaker>,
    pub directory_calls: AtomicUsize,
    pub synthesized: Mutex<Vec<String>>,
    fail_directory: bool,
    fail_segment: Option<String>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            speakers: vec![
                speaker("四国めたん", &[2, 0]),
                speaker("冥鳴ひまり", &[14]),
                speaker("無口", &[]),
            ],
            directory_calls: AtomicUsize::new(0),
            synthesized: Mutex::new(Vec::new()),
            fail_directory: false,
            fail_segment: None,
        }
    }

    pub fn unreachable() -> Self {
        Self {
            fail_directory: true,
            ..Self::new()
        }
    }

    pub fn failing_on(segment: &str) -> Self {
        Self {
            fail_segment: Some(segment.into()),
            ..Self::new()
        }
    }

    pub fn directory_calls(&self) -> usize {
        self.directory_calls.load(Ordering::SeqCst)
    }

    pub fn synthesized(&self) -> Vec<String> {
        self.synthesized.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechEngine for FakeEngine {
    async fn speakers(&self) -> Result<Vec<Speaker>> {
        self.directory_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_directory {
            return Err(Error::Upstream("connection refused".into()));
        }
        Ok(self.speakers.clone())
    }

    async fn synthesize(&self, text: &str, _speaker_id: u32) -> Result<Vec<u8>> {
        if self.fail_segment.as_deref() == Some(text) {
            return Err(Error::Upstream(format!("synthesis failed for {text}")));
        }
        self.synthesized.lock().unwrap().push(text.to_string());
        Ok(text.as_bytes().to_vec())
    }
}

/// Scripted LLM: pops one response per call, `None` meaning failure.
/// Fails once the script runs out. An optional gate holds every call until
/// the test adds permits.
pub struct FakeLlm {
    script: Mutex<VecDeque<Option<String>>>,
    pub prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl FakeLlm {
    pub fn scripted(script: Vec<Option<&str>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().map(|s| s.map(String::from)).collect()),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            gate: None,
        }
    }

    pub fn failing() -> Self {
        Self::scripted(Vec::new())
    }

    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::failing()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for FakeLlm {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        match self.script.lock().unwrap().pop_front() {
            Some(Some(reply)) => Ok(reply),
            _ => Err(Error::Upstream("LLM command failed".into())),
        }
    }
}

/// Player stand-in recording every attempt; fails for listed programs.
/// An optional gate holds every playback until the test adds permits.
pub struct FakeSink {
    failing_programs: Vec<String>,
    pub attempts: Mutex<Vec<(String, Vec<u8>)>>,
    gate: Option<Arc<Semaphore>>,
}

impl FakeSink {
    pub fn new() -> Self {
        Self::failing_for(&[])
    }

    pub fn failing_for(programs: &[&str]) -> Self {
        Self {
            failing_programs: programs.iter().map(|p| (*p).to_string()).collect(),
            attempts: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new()
        }
    }

    pub fn attempts(&self) -> Vec<(String, Vec<u8>)> {
        self.attempts.lock().unwrap().clone()
    }

    /// Payloads that played successfully, as text.
    pub fn played(&self) -> Vec<String> {
        self.attempts()
            .into_iter()
            .filter(|(program, _)| !self.failing_programs.contains(program))
            .map(|(_, wav)| String::from_utf8(wav).unwrap())
            .collect()
    }
}

#[async_trait]
impl AudioSink for FakeSink {
    async fn play(&self, command: &[String], wav: &[u8]) -> Result<()> {
        let program = command[0].clone();
        self.attempts
            .lock()
            .unwrap()
            .push((program.clone(), wav.to_vec()));
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if self.failing_programs.contains(&program) {
            return Err(Error::Player(format!("{program} exited with status 1")));
        }
        Ok(())
    }
}
