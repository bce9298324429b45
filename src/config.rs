//! Configuration management for vv-speaker.
//!
//! Loads config from a YAML file in standard locations, then layers a `.env`
//! file and process environment variables on top. The result is validated
//! once and treated as immutable for the lifetime of the process.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{Error, Result};

const LOG_LEVELS: &[&str] = &["debug", "info", "warn", "error"];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VoicevoxConfig {
    pub url: String,
    pub speaker_name: String,
}

impl Default for VoicevoxConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:50021".into(),
            speaker_name: "冥鳴ひまり".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub command: String,
    pub timeout_sec: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            command: "gemini -p".into(),
            timeout_sec: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReplyConfig {
    pub min_chars: usize,
    pub max_chars: usize,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            min_chars: 80,
            max_chars: 160,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max: usize,
    pub lock_path: PathBuf,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max: 10,
            lock_path: PathBuf::from("/tmp/vv-speaker.lock"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Empty means probe for an installed player.
    pub player_command: String,
    pub stream: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            player_command: String::new(),
            stream: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8766,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub voicevox: VoicevoxConfig,
    pub llm: LlmConfig,
    pub reply: ReplyConfig,
    pub queue: QueueConfig,
    pub playback: PlaybackConfig,
    pub api: ApiConfig,
    pub mcp: McpConfig,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            voicevox: VoicevoxConfig::default(),
            llm: LlmConfig::default(),
            reply: ReplyConfig::default(),
            queue: QueueConfig::default(),
            playback: PlaybackConfig::default(),
            api: ApiConfig::default(),
            mcp: McpConfig::default(),
            log_level: "info".into(),
        }
    }
}

impl Config {
    /// Load configuration from YAML, `.env` and the process environment.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./config.yaml
    /// 2. ~/.config/vv-speaker/config.yaml
    /// 3. /etc/vv-speaker/config.yaml
    ///
    /// A missing file means defaults; a broken file or a malformed
    /// environment value is a fatal [`Error::Config`].
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.log_level = config.log_level.trim().to_lowercase();
        load_dotenv();
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: Option<&Path>) -> Result<Self> {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config/vv-speaker/config.yaml")),
                Some(PathBuf::from("/etc/vv-speaker/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Ok(Self::default());
        };

        let contents = std::fs::read_to_string(&config_path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", config_path.display()))
        })?;
        let config = serde_yml::from_str(&contents).map_err(|e| {
            Error::Config(format!("failed to parse {}: {e}", config_path.display()))
        })?;
        info!("Loaded config from {}", config_path.display());
        Ok(config)
    }

    /// Override fields from environment variables looked up through `var`.
    fn apply_env<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = var("VOICEVOX_URL") {
            self.voicevox.url = v;
        }
        if let Some(v) = var("SPEAKER_NAME") {
            self.voicevox.speaker_name = v;
        }
        if let Some(v) = var("LLM_TIMEOUT_SEC") {
            self.llm.timeout_sec = parse_env("LLM_TIMEOUT_SEC", &v)?;
        }
        if let Some(v) = var("LLM_COMMAND") {
            self.llm.command = v;
        }
        if let Some(v) = var("MIN_CHARS") {
            self.reply.min_chars = parse_env("MIN_CHARS", &v)?;
        }
        if let Some(v) = var("MAX_CHARS") {
            self.reply.max_chars = parse_env("MAX_CHARS", &v)?;
        }
        if let Some(v) = var("QUEUE_MAX") {
            self.queue.max = parse_env("QUEUE_MAX", &v)?;
        }
        if let Some(v) = var("LOCK_PATH") {
            self.queue.lock_path = PathBuf::from(v);
        }
        if let Some(v) = var("PLAYER_COMMAND") {
            self.playback.player_command = v;
        }
        if let Some(v) = var("STREAM_PLAYBACK") {
            self.playback.stream = parse_bool(&v);
        }
        if let Some(v) = var("LOG_LEVEL") {
            self.log_level = v.trim().to_lowercase();
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.reply.min_chars > self.reply.max_chars {
            return Err(Error::Config(format!(
                "MIN_CHARS ({}) must not exceed MAX_CHARS ({})",
                self.reply.min_chars, self.reply.max_chars
            )));
        }
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(Error::Config(format!(
                "LOG_LEVEL must be one of {}, got {:?}",
                LOG_LEVELS.join("/"),
                self.log_level
            )));
        }
        if self.queue.max == 0 {
            return Err(Error::Config("QUEUE_MAX must be at least 1".into()));
        }
        if self.llm_argv()?.is_empty() {
            return Err(Error::Config("LLM_COMMAND is empty".into()));
        }
        self.player_argv()?;
        Ok(())
    }

    /// The LLM command line split into argv.
    pub fn llm_argv(&self) -> Result<Vec<String>> {
        split_command(&self.llm.command)
    }

    /// The preferred player command split into argv; empty when unset.
    pub fn player_argv(&self) -> Result<Vec<String>> {
        split_command(&self.playback.player_command)
    }
}

/// Load `.env` from the working directory without overriding set variables.
fn load_dotenv() {
    let Ok(cwd) = std::env::current_dir() else {
        return;
    };
    for candidate in [cwd.join(".env"), cwd.join("vv-speaker-box-logic/.env")] {
        if !candidate.exists() {
            continue;
        }
        match dotenvy::from_path(&candidate) {
            Ok(()) => info!("Loaded environment from {}", candidate.display()),
            Err(e) => warn!("Failed to load {}: {e}", candidate.display()),
        }
        break;
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("{key}={value:?}: {e}")))
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Split a command line into words, honouring quotes and backslash escapes.
pub fn split_command(line: &str) -> Result<Vec<String>> {
    let unbalanced = || Error::Config(format!("unbalanced quote in command: {line}"));

    let mut words = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => word.push(ch),
                        None => return Err(unbalanced()),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(ch @ ('"' | '\\' | '$' | '`')) => word.push(ch),
                            Some(ch) => {
                                word.push('\\');
                                word.push(ch);
                            }
                            None => return Err(unbalanced()),
                        },
                        Some(ch) => word.push(ch),
                        None => return Err(unbalanced()),
                    }
                }
            }
            '\\' => {
                in_word = true;
                if let Some(ch) = chars.next() {
                    word.push(ch);
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                word.push(c);
            }
        }
    }
    if in_word {
        words.push(word);
    }

    Ok(words)
}
