//! Audio channel: utterance capture and audio playback
//!
//! The channel branches on the resolved profile once per operation.
//! Hardware profiles go through the platform recorder/player and the
//! transcriber; simulated profiles never block.

use std::collections::VecDeque;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::stt::Transcriber;
use super::wav::wav_duration_secs;
use crate::device::{ActiveProfile, DeviceProfile, DeviceRegistry, DeviceRole, SimulatedProfile};
use crate::platform::CommandRunner;
use crate::resilience::{ResilientExecutor, RetryPolicy};
use crate::{Error, Result};

/// Headroom added to recorder and player timeouts
const TOOL_MARGIN: Duration = Duration::from_secs(5);

/// Smallest WAV that could hold any samples
const WAV_HEADER_LEN: usize = 44;

/// Where an utterance came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtteranceOrigin {
    Hardware,
    Simulated,
}

/// One recognized utterance
///
/// An empty utterance means "nothing understood" and is not a failure.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub text: String,
    pub captured_at: DateTime<Utc>,
    /// 1.0 when text was recognized, 0.0 when nothing was
    pub confidence: f32,
    pub origin: UtteranceOrigin,
}

impl Utterance {
    /// Utterance captured now
    #[must_use]
    pub fn new(text: impl Into<String>, origin: UtteranceOrigin) -> Self {
        Self::at(text, origin, Utc::now())
    }

    /// Utterance with an explicit timestamp
    #[must_use]
    pub fn at(text: impl Into<String>, origin: UtteranceOrigin, captured_at: DateTime<Utc>) -> Self {
        let text = text.into().trim().to_string();
        let confidence = if text.is_empty() { 0.0 } else { 1.0 };
        Self {
            text,
            captured_at,
            confidence,
            origin,
        }
    }

    /// Whether nothing was understood
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Synthesized speech ready for playback
#[derive(Debug, Clone)]
pub struct SpokenAudio {
    /// WAV bytes for the platform player
    pub wav: Vec<u8>,
    /// Text equivalent, logged by simulated speakers
    pub text: String,
}

/// Text sources for the simulated microphone
///
/// Order: inbox file (consumed), scripted queue, random phrase, nothing.
pub struct SimulatedSpeech {
    inbox: Option<PathBuf>,
    script: Mutex<VecDeque<String>>,
    phrases: Vec<String>,
}

impl SimulatedSpeech {
    #[must_use]
    pub fn new(inbox: Option<PathBuf>, script: Vec<String>, phrases: Vec<String>) -> Self {
        Self {
            inbox,
            script: Mutex::new(script.into()),
            phrases,
        }
    }

    /// Only the given lines, in order
    #[must_use]
    pub fn scripted<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(None, lines.into_iter().map(Into::into).collect(), Vec::new())
    }

    async fn next(&self, profile: &SimulatedProfile) -> Option<String> {
        if let Some(text) = self.take_inbox().await {
            return Some(text);
        }

        if let Some(line) = self.script.lock().ok().and_then(|mut q| q.pop_front()) {
            return Some(line);
        }

        profile
            .pick(self.phrases.len())
            .and_then(|i| self.phrases.get(i).cloned())
    }

    async fn take_inbox(&self) -> Option<String> {
        let path = self.inbox.as_ref()?;
        let content = tokio::fs::read_to_string(path).await.ok()?;
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::warn!(path = %path.display(), error = %e, "failed to consume simulated input");
        }

        let text = content.trim().to_string();
        (!text.is_empty()).then_some(text)
    }
}

/// Captures utterances and plays audio through the resolved devices
pub struct AudioChannel {
    registry: Arc<DeviceRegistry>,
    runner: Arc<dyn CommandRunner>,
    transcriber: Arc<dyn Transcriber>,
    simulated: SimulatedSpeech,
    executor: ResilientExecutor,
    hardware_policy: RetryPolicy,
    network_policy: RetryPolicy,
}

impl AudioChannel {
    #[must_use]
    pub fn new(
        registry: Arc<DeviceRegistry>,
        runner: Arc<dyn CommandRunner>,
        transcriber: Arc<dyn Transcriber>,
        simulated: SimulatedSpeech,
        hardware_policy: RetryPolicy,
        network_policy: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            runner,
            transcriber,
            simulated,
            executor: ResilientExecutor::new(),
            hardware_policy,
            network_policy,
        }
    }

    /// Capture one utterance, recording for up to `duration` on hardware
    ///
    /// A busy microphone triggers one re-resolve before the error surfaces.
    ///
    /// # Errors
    ///
    /// Returns error if the microphone cannot be resolved, recording fails,
    /// or transcription fails after retries
    pub async fn capture(&self, duration: Duration) -> Result<Utterance> {
        let profile = self.registry.resolve(DeviceRole::Microphone).await?;

        let wav = match self.capture_from(&profile, duration).await {
            Err(e) if e.is_device_busy() => {
                tracing::warn!(address = %profile.address(), "microphone busy, rescanning");
                let profile = self.registry.rescan(DeviceRole::Microphone).await?;
                self.capture_from(&profile, duration).await?
            }
            other => other?,
        };

        let wav = match wav {
            Captured::Text(utterance) => return Ok(utterance),
            Captured::Wav(wav) => wav,
        };

        if wav.len() <= WAV_HEADER_LEN {
            tracing::debug!("recording was empty");
            return Ok(Utterance::new("", UtteranceOrigin::Hardware));
        }

        let text = self
            .executor
            .run("transcribe", &self.network_policy, || {
                self.transcriber.transcribe(&wav)
            })
            .await?;

        Ok(Utterance::new(text, UtteranceOrigin::Hardware))
    }

    async fn capture_from(&self, profile: &ActiveProfile, duration: Duration) -> Result<Captured> {
        match profile {
            ActiveProfile::Simulated(sim) => {
                let text = self.simulated.next(sim).await.unwrap_or_default();
                if !text.is_empty() {
                    tracing::info!(text = %text, "simulated capture");
                }
                Ok(Captured::Text(Utterance::new(text, UtteranceOrigin::Simulated)))
            }
            ActiveProfile::Hardware(hw) => self.record(hw, duration).await.map(Captured::Wav),
        }
    }

    async fn record(&self, profile: &DeviceProfile, duration: Duration) -> Result<Vec<u8>> {
        let secs = duration.as_secs().max(1);
        let rate = profile.capabilities.sample_rate.unwrap_or(16_000);
        let args = vec![
            "-q".to_string(),
            "-D".to_string(),
            profile.address.clone(),
            "-d".to_string(),
            secs.to_string(),
            "-f".to_string(),
            "S16_LE".to_string(),
            "-r".to_string(),
            rate.to_string(),
            "-c".to_string(),
            "1".to_string(),
            "-t".to_string(),
            "wav".to_string(),
            "-".to_string(),
        ];

        let policy = self
            .hardware_policy
            .clone()
            .with_timeout(Duration::from_secs(secs) + TOOL_MARGIN);

        tracing::debug!(address = %profile.address, secs, "recording");
        let (runner, args) = (&self.runner, &args);
        let output = self
            .executor
            .run("record", &policy, || async move {
                runner
                    .run("arecord", args)
                    .await?
                    .check_device(DeviceRole::Microphone, "arecord")
            })
            .await?;

        Ok(output.stdout)
    }

    /// Play synthesized audio on the speaker
    ///
    /// A busy speaker is not backed off: its holder gets exactly one forced
    /// release followed by one more attempt. Other transient failures are
    /// retried under the hardware policy.
    ///
    /// # Errors
    ///
    /// Returns error if the speaker cannot be resolved or playback fails;
    /// a speaker still busy after the release reports `DeviceBusy`
    pub async fn play(&self, audio: &SpokenAudio) -> Result<()> {
        let profile = self.registry.resolve(DeviceRole::Speaker).await?;

        let hw = match profile {
            ActiveProfile::Simulated(_) => {
                tracing::info!(text = %audio.text, "simulated speaker");
                return Ok(());
            }
            ActiveProfile::Hardware(hw) => hw,
        };

        let clip = write_clip(&audio.wav)?;
        let timeout = wav_duration_secs(&audio.wav)
            .map_or(Duration::ZERO, Duration::from_secs_f64)
            + TOOL_MARGIN;
        let policy = self.hardware_policy.clone().with_timeout(timeout);

        match self.play_on(&hw, &clip, &policy).await {
            Err(e) if e.is_device_busy() => {
                tracing::warn!(address = %hw.address, "speaker busy, releasing holder");
                if let Err(release_err) = self.registry.release(&hw).await {
                    tracing::warn!(error = %release_err, "forced release failed");
                }
                self.play_on(&hw, &clip, &RetryPolicy::once().with_timeout(timeout))
                    .await
            }
            other => other,
        }
    }

    async fn play_on(
        &self,
        profile: &DeviceProfile,
        clip: &tempfile::NamedTempFile,
        policy: &RetryPolicy,
    ) -> Result<()> {
        let args = vec![
            "-q".to_string(),
            "-D".to_string(),
            profile.address.clone(),
            clip.path().to_string_lossy().into_owned(),
        ];

        let (runner, args) = (&self.runner, &args);
        self.executor
            .run_retrying(
                "playback",
                policy,
                |e| e.is_transient() && !e.is_device_busy(),
                || async move {
                    runner
                        .run("aplay", args)
                        .await?
                        .check_device(DeviceRole::Speaker, "aplay")
                },
            )
            .await?;
        Ok(())
    }
}

enum Captured {
    Text(Utterance),
    Wav(Vec<u8>),
}

fn write_clip(wav: &[u8]) -> Result<tempfile::NamedTempFile> {
    if wav.is_empty() {
        return Err(Error::Audio("nothing to play".to_string()));
    }
    let mut clip = tempfile::Builder::new()
        .prefix("robovoice-")
        .suffix(".wav")
        .tempfile()?;
    clip.write_all(wav)?;
    clip.flush()?;
    Ok(clip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Capabilities;

    fn sim() -> SimulatedProfile {
        SimulatedProfile::new(DeviceRole::Microphone, Capabilities::audio(16_000), Some(3))
    }

    #[test]
    fn empty_utterance_has_zero_confidence() {
        let u = Utterance::new("   ", UtteranceOrigin::Hardware);
        assert!(u.is_empty());
        assert!(u.confidence.abs() < f32::EPSILON);

        let u = Utterance::new(" hello ", UtteranceOrigin::Simulated);
        assert_eq!(u.text, "hello");
        assert!((u.confidence - 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn inbox_then_script_then_phrases() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = dir.path().join("inbox.txt");
        std::fs::write(&inbox, "  from the inbox \n").unwrap();

        let speech = SimulatedSpeech::new(
            Some(inbox.clone()),
            vec!["scripted".to_string()],
            vec!["random".to_string()],
        );
        let profile = sim();

        assert_eq!(speech.next(&profile).await.as_deref(), Some("from the inbox"));
        assert!(!inbox.exists());
        assert_eq!(speech.next(&profile).await.as_deref(), Some("scripted"));
        assert_eq!(speech.next(&profile).await.as_deref(), Some("random"));
        assert_eq!(speech.next(&profile).await.as_deref(), Some("random"));
    }

    #[tokio::test]
    async fn exhausted_sources_yield_nothing() {
        let speech = SimulatedSpeech::scripted(["only line"]);
        let profile = sim();
        assert_eq!(speech.next(&profile).await.as_deref(), Some("only line"));
        assert_eq!(speech.next(&profile).await, None);
    }

    #[test]
    fn empty_clip_rejected() {
        assert!(write_clip(&[]).is_err());
        let clip = write_clip(b"RIFF").unwrap();
        assert!(clip.path().exists());
    }
}
