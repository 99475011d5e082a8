//! Configuration management for the robot voice front end

pub mod file;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;

use crate::device::{DeviceMode, DeviceRole, RegistryConfig};
use crate::motion::MotionMode;
use crate::resilience::RetryPolicy;
use crate::{Error, Result};
use file::{RetryPolicyFileConfig, RobovoiceConfigFile};

/// Credential for the conversation, vision, transcription and speech backend
pub const API_KEY_VAR: &str = "OPENAI_API_KEY";

/// Robot voice front end configuration
#[derive(Debug)]
pub struct Config {
    /// Backend credential
    pub api_key: SecretString,

    /// Conversation backend settings
    pub assistant: AssistantConfig,

    /// Voice settings
    pub voice: VoiceConfig,

    /// Device addressing and simulation
    pub devices: DevicesConfig,

    /// Phrase tables for the intent gate
    pub intents: IntentConfig,

    /// Retry policies per call-site class
    pub retry: RetryConfig,

    /// Robot body
    pub motion: MotionConfig,

    /// Path to data directory (stop marker)
    pub data_dir: PathBuf,
}

/// Conversation backend settings
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub name: String,
    pub system_prompt: String,
    pub chat_model: String,
    pub vision_model: String,
    pub vision_prompt: String,
    pub max_tokens: u32,
    /// Messages kept behind the system prompt
    pub history_limit: usize,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            name: "Beta".to_string(),
            system_prompt: "You are Beta, a friendly robot assistant. Keep replies short \
                            enough to be spoken aloud in a few sentences."
                .to_string(),
            chat_model: "gpt-4o".to_string(),
            vision_model: "gpt-4o".to_string(),
            vision_prompt: "Describe what you see in one or two short sentences.".to_string(),
            max_tokens: 150,
            history_limit: 10,
        }
    }
}

/// Voice configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Phrase that activates the gate
    pub wake_phrase: String,
    /// Initial wake-word requirement
    pub wake_word_enabled: bool,
    /// STT model (e.g., "whisper-1")
    pub stt_model: String,
    /// TTS model (e.g., "tts-1")
    pub tts_model: String,
    /// TTS voice (e.g., "alloy")
    pub tts_voice: String,
    /// TTS speed multiplier
    pub tts_speed: f32,
    /// Voice passed to espeak
    pub local_voice: String,
    /// Recording length per capture
    pub capture_duration: Duration,
    pub greeting: String,
    pub farewell: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            wake_phrase: "hey robot".to_string(),
            wake_word_enabled: true,
            stt_model: "whisper-1".to_string(),
            tts_model: "tts-1".to_string(),
            tts_voice: "alloy".to_string(),
            tts_speed: 1.0,
            local_voice: "en".to_string(),
            capture_duration: Duration::from_secs(5),
            greeting: "Hello, I'm ready to talk".to_string(),
            farewell: "Goodbye".to_string(),
        }
    }
}

/// Device addressing and simulation
#[derive(Debug, Clone)]
pub struct DevicesConfig {
    pub mode: DeviceMode,
    pub microphone: String,
    pub speaker: String,
    pub camera: String,
    /// Camera nodes outside `/dev/video*`
    pub camera_paths: Vec<String>,
    pub sample_rate: u32,
    pub resolution: (u32, u32),
    pub seed: Option<u64>,
    /// Consumed in order by the simulated microphone
    pub simulated_utterances: Vec<String>,
    /// Drawn at random once the script runs out
    pub simulated_phrases: Vec<String>,
    /// Polled and consumed by the simulated microphone
    pub simulated_inbox: PathBuf,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            mode: DeviceMode::Auto,
            microphone: String::new(),
            speaker: String::new(),
            camera: String::new(),
            camera_paths: vec!["/dev/usb_cam".to_string()],
            sample_rate: 16_000,
            resolution: (640, 480),
            seed: None,
            simulated_utterances: Vec::new(),
            simulated_phrases: Vec::new(),
            simulated_inbox: std::env::temp_dir().join("robovoice_sim_input.txt"),
        }
    }
}

/// Phrase tables for the intent gate
#[derive(Debug, Clone)]
pub struct IntentConfig {
    pub stop: Vec<String>,
    pub vision: Vec<String>,
    pub wake_word_on: Vec<String>,
    pub wake_word_off: Vec<String>,
    /// Prefixes followed by a voice name
    pub change_voice: Vec<String>,
    pub faster: Vec<String>,
    pub slower: Vec<String>,
    pub normal_rate: Vec<String>,
    pub reset_conversation: Vec<String>,
    /// Walk or turn; direction and step count are read from the utterance
    pub movement: Vec<String>,
    pub wave: Vec<String>,
    pub kick_ball: Vec<String>,
    pub track_object: Vec<String>,
    /// Stop whatever the body is doing (not the session)
    pub halt: Vec<String>,
    /// Inactivity before `Active` falls back to `Idle`; `None` stays active
    pub active_window: Option<Duration>,
}

fn phrases(list: &[&str]) -> Vec<String> {
    list.iter().map(ToString::to_string).collect()
}

impl Default for IntentConfig {
    fn default() -> Self {
        Self {
            stop: phrases(&["stop session", "goodbye robot", "shut down now", "exit session"]),
            vision: phrases(&[
                "what do you see",
                "what is this",
                "identify this",
                "what object",
                "recognize this",
                "look at this",
                "what's in front of you",
                "can you see",
                "what am i holding",
            ]),
            wake_word_on: phrases(&["enable wake word", "turn on wake word"]),
            wake_word_off: phrases(&["disable wake word", "turn off wake word"]),
            change_voice: phrases(&["change voice to", "switch voice to", "use voice"]),
            faster: phrases(&["speak faster", "talk faster"]),
            slower: phrases(&["speak slower", "talk slower"]),
            normal_rate: phrases(&["normal speed", "reset speech rate"]),
            reset_conversation: phrases(&["reset conversation", "forget everything"]),
            movement: phrases(&["move", "walk", "step"]),
            wave: phrases(&["wave"]),
            kick_ball: phrases(&["kick the ball", "kick ball"]),
            track_object: phrases(&["track object", "track the object", "track target"]),
            halt: phrases(&["stop moving", "stop tracking", "stop waving", "freeze"]),
            active_window: Some(Duration::from_secs(30)),
        }
    }
}

/// Robot body settings
#[derive(Debug, Clone)]
pub struct MotionConfig {
    pub mode: MotionMode,
    /// Namespace of the robot's ROS topics
    pub topic_prefix: String,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            mode: MotionMode::Auto,
            topic_prefix: "/ainex".to_string(),
        }
    }
}

/// Retry policies per call-site class
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Recording, playback, frame capture, scanning
    pub hardware: RetryPolicy,
    /// Backend HTTP calls
    pub network: RetryPolicy,
    /// Local synthesizer
    pub local: RetryPolicy,
    /// Consecutive audio failures before the microphone is rescanned
    pub failure_threshold: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            hardware: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(500),
                multiplier: 2.0,
                max_delay: Duration::from_secs(5),
                jitter: true,
                timeout: Some(Duration::from_secs(15)),
            },
            network: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_secs(1),
                multiplier: 2.0,
                max_delay: Duration::from_secs(30),
                jitter: true,
                timeout: Some(Duration::from_secs(30)),
            },
            local: RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(250),
                multiplier: 2.0,
                max_delay: Duration::from_secs(2),
                jitter: false,
                timeout: Some(Duration::from_secs(20)),
            },
            failure_threshold: 3,
        }
    }
}

/// Command-line overrides applied on top of env and file
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file instead of the standard location
    pub config_path: Option<PathBuf>,
    /// Disable simulation fallback
    pub hardware_only: bool,
    /// Simulate every device
    pub simulate: bool,
    /// Seed for simulated devices
    pub seed: Option<u64>,
    /// Leave the robot body alone
    pub no_motion: bool,
}

impl Config {
    /// Load configuration from the process environment and config file
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationInvalid` if the credential is missing or the
    /// config file is malformed
    pub fn load(options: &LoadOptions) -> Result<Self> {
        // Credential first: nothing else is worth reading without it
        let env = |key: &str| std::env::var(key).ok();
        require_api_key(&env)?;

        let fc = file::load_config_file(options.config_path.as_deref())?;
        let config = Self::from_sources(fc, options, env)?;

        std::fs::create_dir_all(&config.data_dir).ok();
        Ok(config)
    }

    /// Merge env > file > default
    ///
    /// `env` looks up environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationInvalid` on a missing credential, conflicting
    /// flags, an unparseable override, or an invalid retry policy
    pub fn from_sources(
        fc: RobovoiceConfigFile,
        options: &LoadOptions,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let api_key = require_api_key(&env)?;

        if options.hardware_only && options.simulate {
            return Err(Error::ConfigurationInvalid(
                "--hardware-only and --simulate are mutually exclusive".to_string(),
            ));
        }

        let assistant = {
            let d = AssistantConfig::default();
            let a = fc.assistant;
            AssistantConfig {
                name: a.name.unwrap_or(d.name),
                system_prompt: a.system_prompt.unwrap_or(d.system_prompt),
                chat_model: env("ROBOVOICE_CHAT_MODEL")
                    .or(a.chat_model)
                    .unwrap_or(d.chat_model),
                vision_model: a.vision_model.unwrap_or(d.vision_model),
                vision_prompt: a.vision_prompt.unwrap_or(d.vision_prompt),
                max_tokens: a.max_tokens.unwrap_or(d.max_tokens),
                history_limit: a.history_limit.unwrap_or(d.history_limit),
            }
        };

        let voice = {
            let d = VoiceConfig::default();
            let v = fc.voice;
            VoiceConfig {
                wake_phrase: env("ROBOVOICE_WAKE_PHRASE")
                    .or(v.wake_phrase)
                    .unwrap_or(d.wake_phrase),
                wake_word_enabled: v.wake_word_enabled.unwrap_or(d.wake_word_enabled),
                stt_model: env("ROBOVOICE_STT_MODEL")
                    .or(v.stt_model)
                    .unwrap_or(d.stt_model),
                tts_model: env("ROBOVOICE_TTS_MODEL")
                    .or(v.tts_model)
                    .unwrap_or(d.tts_model),
                tts_voice: v.tts_voice.unwrap_or(d.tts_voice),
                tts_speed: v.tts_speed.unwrap_or(d.tts_speed),
                local_voice: v.local_voice.unwrap_or(d.local_voice),
                capture_duration: v
                    .capture_seconds
                    .map_or(d.capture_duration, Duration::from_secs),
                greeting: v.greeting.unwrap_or(d.greeting),
                farewell: v.farewell.unwrap_or(d.farewell),
            }
        };
        if voice.capture_duration.is_zero() {
            return Err(Error::ConfigurationInvalid(
                "voice.capture_seconds must be at least 1".to_string(),
            ));
        }

        let devices = {
            let d = DevicesConfig::default();
            let dv = fc.devices;
            let seed = match env("ROBOVOICE_SEED") {
                Some(raw) => Some(raw.trim().parse::<u64>().map_err(|e| {
                    Error::ConfigurationInvalid(format!("ROBOVOICE_SEED {raw:?}: {e}"))
                })?),
                None => dv.seed,
            };
            let mode = if options.hardware_only {
                DeviceMode::Hardware
            } else if options.simulate {
                DeviceMode::Simulated
            } else {
                dv.mode.unwrap_or(d.mode)
            };
            DevicesConfig {
                mode,
                microphone: env("ROBOVOICE_MICROPHONE")
                    .or(dv.microphone)
                    .unwrap_or(d.microphone),
                speaker: env("ROBOVOICE_SPEAKER")
                    .or(dv.speaker)
                    .unwrap_or(d.speaker),
                camera: env("ROBOVOICE_CAMERA").or(dv.camera).unwrap_or(d.camera),
                camera_paths: dv.camera_paths.unwrap_or(d.camera_paths),
                sample_rate: dv.sample_rate.unwrap_or(d.sample_rate),
                resolution: (
                    dv.frame_width.unwrap_or(d.resolution.0),
                    dv.frame_height.unwrap_or(d.resolution.1),
                ),
                seed: options.seed.or(seed),
                simulated_utterances: dv.simulated_utterances.unwrap_or(d.simulated_utterances),
                simulated_phrases: dv.simulated_phrases.unwrap_or(d.simulated_phrases),
                simulated_inbox: dv.simulated_inbox.map_or(d.simulated_inbox, PathBuf::from),
            }
        };

        let intents = {
            let d = IntentConfig::default();
            let i = fc.intents;
            IntentConfig {
                stop: i.stop.unwrap_or(d.stop),
                vision: i.vision.unwrap_or(d.vision),
                wake_word_on: i.wake_word_on.unwrap_or(d.wake_word_on),
                wake_word_off: i.wake_word_off.unwrap_or(d.wake_word_off),
                change_voice: i.change_voice.unwrap_or(d.change_voice),
                faster: i.faster.unwrap_or(d.faster),
                slower: i.slower.unwrap_or(d.slower),
                normal_rate: i.normal_rate.unwrap_or(d.normal_rate),
                reset_conversation: i.reset_conversation.unwrap_or(d.reset_conversation),
                movement: i.movement.unwrap_or(d.movement),
                wave: i.wave.unwrap_or(d.wave),
                kick_ball: i.kick_ball.unwrap_or(d.kick_ball),
                track_object: i.track_object.unwrap_or(d.track_object),
                halt: i.halt.unwrap_or(d.halt),
                active_window: match i.active_window_secs {
                    Some(0) => None,
                    Some(secs) => Some(Duration::from_secs(secs)),
                    None => d.active_window,
                },
            }
        };

        let retry = {
            let d = RetryConfig::default();
            let r = fc.retry;
            RetryConfig {
                hardware: overlay_policy(d.hardware, &r.hardware, "hardware")?,
                network: overlay_policy(d.network, &r.network, "network")?,
                local: overlay_policy(d.local, &r.local, "local")?,
                failure_threshold: r.failure_threshold.unwrap_or(d.failure_threshold).max(1),
            }
        };

        let motion = {
            let d = MotionConfig::default();
            let m = fc.motion;
            MotionConfig {
                mode: if options.no_motion {
                    MotionMode::Off
                } else {
                    m.mode.unwrap_or(d.mode)
                },
                topic_prefix: env("ROBOVOICE_TOPIC_PREFIX")
                    .or(m.topic_prefix)
                    .unwrap_or(d.topic_prefix),
            }
        };

        // Data directory (~/.local/share/robovoice on Linux)
        let data_dir = env("ROBOVOICE_DATA_DIR").map_or_else(default_data_dir, PathBuf::from);

        Ok(Self {
            api_key,
            assistant,
            voice,
            devices,
            intents,
            retry,
            motion,
            data_dir,
        })
    }

    /// Registry settings derived from the device section
    #[must_use]
    pub fn registry_config(&self) -> RegistryConfig {
        let patterns = HashMap::from([
            (DeviceRole::Microphone, self.devices.microphone.clone()),
            (DeviceRole::Speaker, self.devices.speaker.clone()),
            (DeviceRole::Camera, self.devices.camera.clone()),
        ]);

        RegistryConfig {
            mode: self.devices.mode,
            patterns,
            sample_rate: self.devices.sample_rate,
            resolution: self.devices.resolution,
            seed: self.devices.seed,
            scan_policy: self.retry.hardware.clone(),
            ..RegistryConfig::default()
        }
    }

    /// File whose presence asks a running session to stop
    #[must_use]
    pub fn stop_marker(&self) -> PathBuf {
        stop_marker_in(&self.data_dir)
    }
}

/// Stop marker location inside `data_dir`
#[must_use]
pub fn stop_marker_in(data_dir: &Path) -> PathBuf {
    data_dir.join("stop.request")
}

/// Default data directory: `~/.local/share/robovoice`
#[must_use]
pub fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map_or_else(|| PathBuf::from(".robovoice"), |d| d.data_dir().join("robovoice"))
}

fn require_api_key(env: &impl Fn(&str) -> Option<String>) -> Result<SecretString> {
    env(API_KEY_VAR)
        .filter(|key| !key.trim().is_empty())
        .map(SecretString::from)
        .ok_or_else(|| Error::ConfigurationInvalid(format!("{API_KEY_VAR} is not set")))
}

fn overlay_policy(
    base: RetryPolicy,
    file: &RetryPolicyFileConfig,
    name: &str,
) -> Result<RetryPolicy> {
    let policy = RetryPolicy {
        max_attempts: file.max_attempts.unwrap_or(base.max_attempts),
        base_delay: file
            .base_delay_ms
            .map_or(base.base_delay, Duration::from_millis),
        multiplier: file.multiplier.unwrap_or(base.multiplier),
        max_delay: file.max_delay_ms.map_or(base.max_delay, Duration::from_millis),
        jitter: file.jitter.unwrap_or(base.jitter),
        timeout: match file.timeout_ms {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => base.timeout,
        },
    };

    policy
        .validate()
        .map_err(|e| Error::ConfigurationInvalid(format!("retry.{name}: {e}")))?;
    Ok(policy)
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    fn env_with(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_credential_is_fatal() {
        let err = Config::from_sources(
            RobovoiceConfigFile::default(),
            &LoadOptions::default(),
            env_with(&[]),
        )
        .unwrap_err();
        assert!(matches!(err, Error::ConfigurationInvalid(msg) if msg.contains(API_KEY_VAR)));
    }

    #[test]
    fn env_overrides_file() {
        let fc = file::parse_config("[voice]\nwake_phrase = \"hello robot\"\n").unwrap();
        let config = Config::from_sources(
            fc,
            &LoadOptions::default(),
            env_with(&[(API_KEY_VAR, "sk-test"), ("ROBOVOICE_WAKE_PHRASE", "Beta")]),
        )
        .unwrap();

        assert_eq!(config.voice.wake_phrase, "Beta");
        assert_eq!(config.api_key.expose_secret(), "sk-test");
    }

    #[test]
    fn hardware_only_flag_wins() {
        let fc = file::parse_config("[devices]\nmode = \"simulated\"\n").unwrap();
        let options = LoadOptions {
            hardware_only: true,
            ..LoadOptions::default()
        };
        let config = Config::from_sources(fc, &options, env_with(&[(API_KEY_VAR, "k")])).unwrap();
        assert_eq!(config.devices.mode, DeviceMode::Hardware);
        assert_eq!(config.registry_config().mode, DeviceMode::Hardware);
    }

    #[test]
    fn conflicting_flags_rejected() {
        let options = LoadOptions {
            hardware_only: true,
            simulate: true,
            ..LoadOptions::default()
        };
        assert!(
            Config::from_sources(
                RobovoiceConfigFile::default(),
                &options,
                env_with(&[(API_KEY_VAR, "k")])
            )
            .is_err()
        );
    }

    #[test]
    fn invalid_retry_policy_rejected() {
        let fc = file::parse_config("[retry.network]\nmultiplier = 0.5\n").unwrap();
        let err = Config::from_sources(fc, &LoadOptions::default(), env_with(&[(API_KEY_VAR, "k")]))
            .unwrap_err();
        assert!(matches!(err, Error::ConfigurationInvalid(msg) if msg.contains("retry.network")));
    }

    #[test]
    fn zero_active_window_stays_active() {
        let fc = file::parse_config("[intents]\nactive_window_secs = 0\n").unwrap();
        let config =
            Config::from_sources(fc, &LoadOptions::default(), env_with(&[(API_KEY_VAR, "k")]))
                .unwrap();
        assert!(config.intents.active_window.is_none());
    }

    #[test]
    fn no_motion_flag_turns_body_off() {
        let fc = file::parse_config("[motion]\nmode = \"ros\"\ntopic_prefix = \"/beta\"\n").unwrap();
        let options = LoadOptions {
            no_motion: true,
            ..LoadOptions::default()
        };
        let config = Config::from_sources(fc, &options, env_with(&[(API_KEY_VAR, "k")])).unwrap();
        assert_eq!(config.motion.mode, MotionMode::Off);
        assert_eq!(config.motion.topic_prefix, "/beta");
    }

    #[test]
    fn seed_from_cli_beats_env() {
        let options = LoadOptions {
            seed: Some(9),
            ..LoadOptions::default()
        };
        let config = Config::from_sources(
            RobovoiceConfigFile::default(),
            &options,
            env_with(&[(API_KEY_VAR, "k"), ("ROBOVOICE_SEED", "4")]),
        )
        .unwrap();
        assert_eq!(config.devices.seed, Some(9));

        let bad = Config::from_sources(
            RobovoiceConfigFile::default(),
            &LoadOptions::default(),
            env_with(&[(API_KEY_VAR, "k"), ("ROBOVOICE_SEED", "soon")]),
        );
        assert!(bad.is_err());
    }
}
