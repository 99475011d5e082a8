//! Speech synthesis with a provider fallback chain
//!
//! Providers are tried in order; each one runs under its own retry policy.
//! The networked provider comes first and the local synthesizer last.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::audio::{AudioChannel, SpokenAudio};
use super::wav::mp3_to_wav;
use crate::device::DeviceRole;
use crate::platform::CommandRunner;
use crate::resilience::{ResilientExecutor, RetryPolicy};
use crate::session::SessionState;
use crate::{Error, Result};

const OPENAI_SPEECH_URL: &str = "https://api.openai.com/v1/audio/speech";

/// Voices the `OpenAI` speech endpoint accepts
pub const OPENAI_VOICES: &[&str] = &["alloy", "echo", "fable", "onyx", "nova", "shimmer"];

/// espeak words per minute at rate 1.0
const ESPEAK_BASE_WPM: f32 = 175.0;

/// One speech synthesis backend
#[async_trait]
pub trait SpeechProvider: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Whether `voice` is a voice identity this provider can use
    fn supports_voice(&self, voice: &str) -> bool;

    /// Synthesize `text` to WAV bytes
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    async fn synthesize(&self, text: &str, voice: &str, rate: f32) -> Result<Vec<u8>>;
}

/// `OpenAI` text-to-speech
pub struct OpenAiSpeech {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
}

impl OpenAiSpeech {
    #[must_use]
    pub fn new(client: reqwest::Client, api_key: SecretString, model: String) -> Self {
        Self {
            client,
            api_key,
            model,
        }
    }
}

#[async_trait]
impl SpeechProvider for OpenAiSpeech {
    fn name(&self) -> &str {
        "openai"
    }

    fn supports_voice(&self, voice: &str) -> bool {
        OPENAI_VOICES.contains(&voice)
    }

    async fn synthesize(&self, text: &str, voice: &str, rate: f32) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
            response_format: &'a str,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice,
            speed: rate,
            response_format: "mp3",
        };

        let response = self
            .client
            .post(OPENAI_SPEECH_URL)
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "OpenAI TTS error");
            return Err(Error::from_status("openai tts", status.as_u16(), &body));
        }

        let mp3 = response.bytes().await?;
        tracing::debug!(bytes = mp3.len(), "received speech");

        // A body that is not audio is a provider fault, not a reason to stop
        mp3_to_wav(&mp3).map_err(|e| Error::SynthesisFailed(format!("openai tts: {e}")))
    }
}

/// Local espeak synthesizer, no network dependency
pub struct EspeakSpeech {
    runner: Arc<dyn CommandRunner>,
    voice: String,
}

impl EspeakSpeech {
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, voice: String) -> Self {
        Self { runner, voice }
    }
}

#[async_trait]
impl SpeechProvider for EspeakSpeech {
    fn name(&self) -> &str {
        "espeak"
    }

    // espeak keeps its own configured voice
    fn supports_voice(&self, _voice: &str) -> bool {
        false
    }

    async fn synthesize(&self, text: &str, _voice: &str, rate: f32) -> Result<Vec<u8>> {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let wpm = (ESPEAK_BASE_WPM * rate).clamp(80.0, 450.0) as u32;
        let args = vec![
            "-v".to_string(),
            self.voice.clone(),
            "-s".to_string(),
            wpm.to_string(),
            "--stdout".to_string(),
            text.to_string(),
        ];

        let output = self
            .runner
            .run("espeak", &args)
            .await?
            .check_device(DeviceRole::Speaker, "espeak")?;

        if output.stdout.is_empty() {
            return Err(Error::SynthesisFailed("espeak produced no audio".to_string()));
        }
        Ok(output.stdout)
    }
}

struct Link {
    provider: Arc<dyn SpeechProvider>,
    policy: RetryPolicy,
}

/// Turns reply text into played audio through the provider chain
pub struct SpeechSynthesizer {
    chain: Vec<Link>,
    audio: Arc<AudioChannel>,
    executor: ResilientExecutor,
}

impl SpeechSynthesizer {
    /// Synthesizer with an empty chain
    #[must_use]
    pub fn new(audio: Arc<AudioChannel>) -> Self {
        Self {
            chain: Vec::new(),
            audio,
            executor: ResilientExecutor::new(),
        }
    }

    /// Append a provider, tried after the ones already added
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn SpeechProvider>, policy: RetryPolicy) -> Self {
        self.chain.push(Link { provider, policy });
        self
    }

    /// Names of the providers in chain order
    #[must_use]
    pub fn providers(&self) -> Vec<&str> {
        self.chain.iter().map(|l| l.provider.name()).collect()
    }

    /// Whether any provider in the chain knows `voice`
    #[must_use]
    pub fn is_known_voice(&self, voice: &str) -> bool {
        self.chain.iter().any(|l| l.provider.supports_voice(voice))
    }

    /// Switch the session to `voice`
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` and leaves the session untouched if no
    /// provider knows the voice
    pub fn select_voice(&self, session: &mut SessionState, voice: &str) -> Result<()> {
        let voice = voice.trim().to_lowercase();
        if !self.is_known_voice(&voice) {
            tracing::warn!(voice = %voice, "unknown voice requested");
            return Err(Error::InvalidArgument(format!("unknown voice {voice:?}")));
        }
        session.set_voice(voice);
        Ok(())
    }

    /// Synthesize `text` with the session's voice and rate, then play it
    ///
    /// The first provider that produces audio wins; playback errors are
    /// not retried through the chain.
    ///
    /// # Errors
    ///
    /// Returns `SynthesisFailed` if every provider fails, or the playback error
    pub async fn speak(&self, text: &str, session: &SessionState) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        let wav = self.synthesize(text, session).await?;
        self.audio
            .play(&SpokenAudio {
                wav,
                text: text.to_string(),
            })
            .await
    }

    async fn synthesize(&self, text: &str, session: &SessionState) -> Result<Vec<u8>> {
        let (voice, rate) = (session.voice(), session.speech_rate());
        let mut failures = Vec::new();

        for link in &self.chain {
            let name = link.provider.name();
            let provider = &link.provider;
            let label = format!("synthesize ({name})");

            match self
                .executor
                .run(&label, &link.policy, || provider.synthesize(text, voice, rate))
                .await
            {
                Ok(wav) => {
                    if !failures.is_empty() {
                        tracing::info!(provider = name, "synthesized with fallback provider");
                    }
                    return Ok(wav);
                }
                Err(e) => {
                    tracing::warn!(provider = name, error = %e, "speech provider failed");
                    failures.push(format!("{name}: {e}"));
                }
            }
        }

        if failures.is_empty() {
            return Err(Error::SynthesisFailed("no speech provider configured".to_string()));
        }
        Err(Error::SynthesisFailed(failures.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_voice_table() {
        assert!(OPENAI_VOICES.contains(&"nova"));
        assert!(!OPENAI_VOICES.contains(&"robot"));
    }
}
