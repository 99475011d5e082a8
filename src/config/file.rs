//! TOML configuration file loading
//!
//! Supports `~/.config/robovoice/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::device::DeviceMode;
use crate::motion::MotionMode;
use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RobovoiceConfigFile {
    /// Conversation backend configuration
    #[serde(default)]
    pub assistant: AssistantFileConfig,

    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Device addressing and simulation
    #[serde(default)]
    pub devices: DevicesFileConfig,

    /// Phrase tables for the intent gate
    #[serde(default)]
    pub intents: IntentsFileConfig,

    /// Retry policies per call-site class
    #[serde(default)]
    pub retry: RetryFileConfig,

    /// Robot body
    #[serde(default)]
    pub motion: MotionFileConfig,
}

/// Assistant/backend configuration
#[derive(Debug, Default, Deserialize)]
pub struct AssistantFileConfig {
    /// Name the assistant answers to in its prompt
    pub name: Option<String>,
    /// System prompt for the conversation backend
    pub system_prompt: Option<String>,
    /// Chat model identifier (e.g. "gpt-4o")
    pub chat_model: Option<String>,
    /// Vision model identifier
    pub vision_model: Option<String>,
    /// Instruction sent with captured frames
    pub vision_prompt: Option<String>,
    /// Max tokens per reply
    pub max_tokens: Option<u32>,
    /// Messages of history kept behind the system prompt
    pub history_limit: Option<usize>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Wake phrase (e.g. "hey robot")
    pub wake_phrase: Option<String>,
    /// Require the wake phrase while idle
    pub wake_word_enabled: Option<bool>,
    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,
    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,
    /// TTS voice identifier (e.g. "alloy")
    pub tts_voice: Option<String>,
    /// TTS speed multiplier
    pub tts_speed: Option<f32>,
    /// Voice passed to the local synthesizer
    pub local_voice: Option<String>,
    /// Seconds recorded per capture
    pub capture_seconds: Option<u64>,
    /// Spoken at session start
    pub greeting: Option<String>,
    /// Spoken when the session stops
    pub farewell: Option<String>,
}

/// Device addressing configuration
#[derive(Debug, Default, Deserialize)]
pub struct DevicesFileConfig {
    /// "auto", "simulated" or "hardware"
    pub mode: Option<DeviceMode>,
    /// Microphone address pattern (e.g. "plughw:3,0" or "USB PnP")
    pub microphone: Option<String>,
    /// Speaker address pattern
    pub speaker: Option<String>,
    /// Camera address pattern (e.g. "/dev/video0")
    pub camera: Option<String>,
    /// Extra camera nodes to consider (e.g. "/dev/usb_cam")
    pub camera_paths: Option<Vec<String>>,
    /// Capture sample rate
    pub sample_rate: Option<u32>,
    /// Frame width
    pub frame_width: Option<u32>,
    /// Frame height
    pub frame_height: Option<u32>,
    /// Seed for simulated devices
    pub seed: Option<u64>,
    /// Scripted simulated utterances, consumed in order
    pub simulated_utterances: Option<Vec<String>>,
    /// Phrases drawn at random once the script runs out
    pub simulated_phrases: Option<Vec<String>>,
    /// File polled for simulated input
    pub simulated_inbox: Option<String>,
}

/// Intent phrase tables
#[derive(Debug, Default, Deserialize)]
pub struct IntentsFileConfig {
    pub stop: Option<Vec<String>>,
    pub vision: Option<Vec<String>>,
    pub wake_word_on: Option<Vec<String>>,
    pub wake_word_off: Option<Vec<String>>,
    pub change_voice: Option<Vec<String>>,
    pub faster: Option<Vec<String>>,
    pub slower: Option<Vec<String>>,
    pub normal_rate: Option<Vec<String>>,
    pub reset_conversation: Option<Vec<String>>,
    pub movement: Option<Vec<String>>,
    pub wave: Option<Vec<String>>,
    pub kick_ball: Option<Vec<String>>,
    pub track_object: Option<Vec<String>>,
    pub halt: Option<Vec<String>>,
    /// Seconds of inactivity before the gate returns to idle (0 = never)
    pub active_window_secs: Option<u64>,
}

/// Robot body configuration
#[derive(Debug, Default, Deserialize)]
pub struct MotionFileConfig {
    /// "auto", "ros", "simulated" or "off"
    pub mode: Option<MotionMode>,
    /// ROS topic namespace (e.g. "/ainex")
    pub topic_prefix: Option<String>,
}

/// Retry policy overrides
#[derive(Debug, Default, Deserialize)]
pub struct RetryFileConfig {
    #[serde(default)]
    pub hardware: RetryPolicyFileConfig,
    #[serde(default)]
    pub network: RetryPolicyFileConfig,
    #[serde(default)]
    pub local: RetryPolicyFileConfig,
    /// Consecutive failures before a subsystem is rescanned
    pub failure_threshold: Option<u32>,
}

/// One retry policy, all fields optional
#[derive(Debug, Default, Deserialize)]
pub struct RetryPolicyFileConfig {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub multiplier: Option<f64>,
    pub max_delay_ms: Option<u64>,
    pub jitter: Option<bool>,
    pub timeout_ms: Option<u64>,
}

/// Load the TOML config file
///
/// `path` overrides the standard location. A missing file yields defaults.
///
/// # Errors
///
/// Returns `ConfigurationInvalid` if the file exists but cannot be read or parsed
pub fn load_config_file(path: Option<&Path>) -> Result<RobovoiceConfigFile> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match config_file_path() {
            Some(p) => p,
            None => return Ok(RobovoiceConfigFile::default()),
        },
    };

    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(RobovoiceConfigFile::default());
    }

    let content = std::fs::read_to_string(&path).map_err(|e| {
        Error::ConfigurationInvalid(format!("cannot read {}: {e}", path.display()))
    })?;

    let config = parse_config(&content)
        .map_err(|e| Error::ConfigurationInvalid(format!("{}: {e}", path.display())))?;

    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the TOML is malformed or has unknown sections
pub fn parse_config(content: &str) -> Result<RobovoiceConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Return the config file path: `~/.config/robovoice/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("robovoice").join("config.toml"))
}
