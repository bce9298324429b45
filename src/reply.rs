//! Reply generation for spoken output.
//!
//! `direct` mode only cleans the caller's text. `llm` mode asks an external
//! command-line LLM for a persona reply, retries once when the output misses
//! the length policy, and falls back to a fixed reply. A reply is always
//! produced; LLM failures never propagate.

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::text::{normalize, normalize_direct};

pub const FALLBACK_REPLY: &str = "今は情報が少ないから、私の方で要点を先にまとめるわ。\
まず優先順位を一つに絞って、短い手順から試すのが確実よ。";

const SYSTEM_PROMPT: &str = "あなたは冥鳴ひまりとして話す。\
落ち着き・知的・少し余裕のある女性の口調で、一人称は私。\
返答は80〜160文字、2〜3文、結論→理由→軽い補足の順。\
箇条書きとMarkdownを禁止し、返答本文のみを出力。\
情報不足でも質問返しせず、仮定して短く答える。";

const LLM_ATTEMPTS: usize = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Direct,
    #[default]
    Llm,
}

/// Which pathway produced the spoken text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplySource {
    Direct,
    Llm,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct Reply {
    pub text: String,
    pub llm_ms: u64,
    pub source: ReplySource,
}

/// External text generator.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// LLM invoked as a subprocess: `<argv...> <prompt>`, reply on stdout.
pub struct CommandLlm {
    argv: Vec<String>,
    timeout: Duration,
}

impl CommandLlm {
    pub fn new(argv: Vec<String>, timeout: Duration) -> Self {
        Self { argv, timeout }
    }
}

#[async_trait]
impl LanguageModel for CommandLlm {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| Error::Config("LLM command is empty".into()))?;

        let mut command = Command::new(program);
        command
            .args(args)
            .arg(prompt)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(output) => output
                .map_err(|e| Error::Upstream(format!("failed to run LLM command '{program}': {e}")))?,
            Err(_) => {
                return Err(Error::Upstream(format!(
                    "LLM command timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(Error::Upstream(if stderr.is_empty() {
                "LLM command failed".into()
            } else {
                stderr
            }));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if stdout.is_empty() {
            return Err(Error::Upstream("LLM returned empty response".into()));
        }
        Ok(stdout)
    }
}

pub struct ReplyGenerator {
    llm: Arc<dyn LanguageModel>,
    min_chars: usize,
    max_chars: usize,
}

impl ReplyGenerator {
    pub fn new(llm: Arc<dyn LanguageModel>, min_chars: usize, max_chars: usize) -> Self {
        Self {
            llm,
            min_chars,
            max_chars,
        }
    }

    /// Produce the text to speak. Never returns an empty reply.
    pub async fn generate(&self, text: &str, mode: Mode) -> Reply {
        if mode == Mode::Direct {
            return Reply {
                text: normalize_direct(text).unwrap_or_else(|| FALLBACK_REPLY.to_string()),
                llm_ms: 0,
                source: ReplySource::Direct,
            };
        }

        let prompt = build_prompt(text);
        let mut llm_ms = 0;

        for attempt in 1..=LLM_ATTEMPTS {
            let started = Instant::now();
            let raw = match self.llm.generate(&prompt).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("LLM attempt {attempt}/{LLM_ATTEMPTS} failed: {e}");
                    FALLBACK_REPLY.to_string()
                }
            };
            llm_ms += elapsed_ms(started);

            if let Some(reply) = normalize(&raw, self.min_chars, self.max_chars) {
                return Reply {
                    text: reply,
                    llm_ms,
                    source: ReplySource::Llm,
                };
            }
            debug!(
                "LLM attempt {attempt}/{LLM_ATTEMPTS} rejected by reply policy ({} chars)",
                raw.chars().count()
            );
        }

        Reply {
            text: normalize(FALLBACK_REPLY, self.min_chars, self.max_chars)
                .unwrap_or_else(|| FALLBACK_REPLY.to_string()),
            llm_ms,
            source: ReplySource::Fallback,
        }
    }
}

fn build_prompt(text: &str) -> String {
    format!("{SYSTEM_PROMPT}\n\nユーザー入力: {text}\n\n返答:")
}

pub fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
