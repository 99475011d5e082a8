//! Conversation controller: the capture, classify, dispatch, speak loop
//!
//! The loop is sequential. Every blocking step is awaited before the next
//! begins, and the stop signal is checked between iterations and before
//! each blocking call. Failures are handled locally (retry, fallback,
//! simulation) and only configuration errors or a missing microphone in
//! hardware-only mode end the session with an error.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::Instrument;

use crate::backend::ConversationBackend;
use crate::config::Config;
use crate::device::{DeviceMode, DeviceRegistry, DeviceRole};
use crate::feedback::{ErrorContext, ErrorTranslator};
use crate::motion::{RobotAction, RobotActions};
use crate::resilience::{ResilientExecutor, RetryPolicy};
use crate::session::{SessionState, Subsystem};
use crate::vision::{VisionChannel, VisionDescriber};
use crate::voice::{
    AudioChannel, ControlCommand, Intent, IntentGate, SpeechSynthesizer, UtteranceOrigin,
};
use crate::{Error, Result};

/// Cooperative stop flag, optionally fed by a marker file
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
    marker: Option<PathBuf>,
}

impl StopSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Also treat the appearance of `marker` as a stop request
    #[must_use]
    pub fn with_marker(mut self, marker: PathBuf) -> Self {
        self.marker = Some(marker);
        self
    }

    /// Ask the session to stop after the current step
    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested; consumes the marker file if present
    #[must_use]
    pub fn is_requested(&self) -> bool {
        if self.flag.load(Ordering::SeqCst) {
            return true;
        }

        match &self.marker {
            Some(marker) if marker.exists() => {
                tracing::info!(marker = %marker.display(), "stop requested externally");
                if let Err(e) = std::fs::remove_file(marker) {
                    tracing::warn!(error = %e, "failed to remove stop marker");
                }
                self.request();
                true
            }
            _ => false,
        }
    }

    /// Remove a marker left behind by an earlier run
    pub fn clear_stale(&self) {
        if let Some(marker) = self.marker.as_ref().filter(|m| m.exists()) {
            tracing::debug!(marker = %marker.display(), "removing stale stop marker");
            std::fs::remove_file(marker).ok();
        }
    }

    /// Ask the session watching `marker` to stop
    ///
    /// # Errors
    ///
    /// Returns error if the marker cannot be written
    pub fn request_via_marker(marker: &std::path::Path) -> Result<()> {
        if let Some(dir) = marker.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(marker, chrono::Utc::now().to_rfc3339())?;
        Ok(())
    }
}

/// Loop settings
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub greeting: String,
    pub farewell: String,
    /// Recording length per capture
    pub capture_duration: Duration,
    /// Consecutive audio failures before the microphone is rescanned
    pub failure_threshold: u32,
    /// Delay formula applied between failed captures
    pub failure_backoff: RetryPolicy,
    /// Pause after an empty simulated capture
    pub idle_pause: Duration,
    /// Policy for conversation and vision calls
    pub network_policy: RetryPolicy,
}

impl ControllerOptions {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            greeting: config.voice.greeting.clone(),
            farewell: config.voice.farewell.clone(),
            capture_duration: config.voice.capture_duration,
            failure_threshold: config.retry.failure_threshold,
            failure_backoff: config.retry.hardware.clone(),
            idle_pause: Duration::from_secs(1),
            network_policy: config.retry.network.clone(),
        }
    }
}

/// Collaborators the controller drives
pub struct ControllerParts {
    pub registry: Arc<DeviceRegistry>,
    pub audio: Arc<AudioChannel>,
    pub vision: VisionChannel,
    pub synthesizer: SpeechSynthesizer,
    pub backend: Arc<dyn ConversationBackend>,
    pub describer: Arc<dyn VisionDescriber>,
    pub gate: IntentGate,
    pub session: SessionState,
    /// Robot body; `None` sends action phrases to the conversation backend
    pub actions: Option<Arc<dyn RobotActions>>,
}

/// What the loop should do after a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    Stop,
}

/// Top-level session loop
pub struct ConversationController {
    registry: Arc<DeviceRegistry>,
    audio: Arc<AudioChannel>,
    vision: VisionChannel,
    synthesizer: SpeechSynthesizer,
    backend: Arc<dyn ConversationBackend>,
    describer: Arc<dyn VisionDescriber>,
    actions: Option<Arc<dyn RobotActions>>,
    gate: IntentGate,
    session: SessionState,
    translator: ErrorTranslator,
    executor: ResilientExecutor,
    options: ControllerOptions,
    stop: StopSignal,
}

impl ConversationController {
    #[must_use]
    pub fn new(parts: ControllerParts, options: ControllerOptions, stop: StopSignal) -> Self {
        Self {
            registry: parts.registry,
            audio: parts.audio,
            vision: parts.vision,
            synthesizer: parts.synthesizer,
            backend: parts.backend,
            describer: parts.describer,
            actions: parts.actions,
            gate: parts.gate,
            session: parts.session,
            translator: ErrorTranslator::new(),
            executor: ResilientExecutor::new(),
            options,
            stop,
        }
    }

    /// Current session state
    #[must_use]
    pub const fn session(&self) -> &SessionState {
        &self.session
    }

    /// Current intent gate
    #[must_use]
    pub const fn gate(&self) -> &IntentGate {
        &self.gate
    }

    /// Handle for stopping the loop from elsewhere
    #[must_use]
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Run until a stop phrase, a stop request, or a fatal error
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if the microphone is missing in
    /// hardware-only mode
    pub async fn run(&mut self) -> Result<()> {
        let span = tracing::info_span!("session", id = %self.session.id());
        async {
            self.stop.clear_stale();
            self.resolve_devices().await?;

            tracing::info!(
                mode = ?self.registry.mode(),
                providers = ?self.synthesizer.providers(),
                body = self.actions.as_ref().map_or("none", |a| a.name()),
                "session started"
            );
            let greeting = self.options.greeting.clone();
            self.say(&greeting).await;

            while !self.stop.is_requested() {
                if self.step().await? == StepOutcome::Stop {
                    break;
                }
            }

            self.halt_body().await;
            let farewell = self.options.farewell.clone();
            self.say(&farewell).await;
            tracing::info!("session ended");
            Ok::<(), Error>(())
        }
        .instrument(span)
        .await
    }

    async fn resolve_devices(&self) -> Result<()> {
        for role in DeviceRole::ALL {
            match self.registry.resolve(role).await {
                Ok(profile) => tracing::info!(%profile, "device ready"),
                Err(e @ Error::DeviceUnavailable { .. }) if role == DeviceRole::Microphone => {
                    return Err(e);
                }
                Err(e) => tracing::warn!(%role, error = %e, "continuing without device"),
            }
        }
        Ok(())
    }

    /// One loop iteration: capture, classify, dispatch
    ///
    /// The stop signal is checked again before every blocking call, so a
    /// stop that arrives mid-step skips whatever has not started yet.
    ///
    /// # Errors
    ///
    /// Returns error only for failures that must end the session
    pub async fn step(&mut self) -> Result<StepOutcome> {
        if self.stop_pending("capture") {
            return Ok(StepOutcome::Stop);
        }

        if let Some(actions) = &self.actions {
            if let Err(e) = actions.check_timeouts().await {
                tracing::warn!(error = %e, "could not halt expired action");
            }
        }

        let utterance = match self.audio.capture(self.options.capture_duration).await {
            Ok(utterance) => {
                self.session.record_success(Subsystem::Audio);
                utterance
            }
            Err(e) => return self.audio_failure(e).await,
        };

        if utterance.is_empty() {
            if utterance.origin == UtteranceOrigin::Simulated {
                tokio::time::sleep(self.options.idle_pause).await;
            }
            return Ok(StepOutcome::Continue);
        }

        if self.stop_pending("classify") {
            return Ok(StepOutcome::Stop);
        }

        tracing::info!(text = %utterance.text, origin = ?utterance.origin, "heard");
        let intent = self.gate.classify(&utterance, &self.session);
        tracing::debug!(?intent, state = ?self.gate.state(), "classified");

        Ok(self.dispatch(intent).await)
    }

    async fn dispatch(&mut self, intent: Intent) -> StepOutcome {
        match intent {
            Intent::Ignored => StepOutcome::Continue,
            Intent::Stop => StepOutcome::Stop,
            Intent::WakeOnly => self.respond("Yes?").await,
            Intent::Control(command) => self.apply(command).await,
            Intent::Vision { prompt } => self.look(&prompt).await,
            Intent::Action { action, text } => self.act(action, &text).await,
            Intent::Conversation { text } => self.converse(&text).await,
        }
    }

    async fn apply(&mut self, command: ControlCommand) -> StepOutcome {
        let reply = match command {
            ControlCommand::WakeWord(true) => {
                self.session.set_wake_word(true);
                "Okay, I'll wait for my wake word.".to_string()
            }
            ControlCommand::WakeWord(false) => {
                self.session.set_wake_word(false);
                "Okay, I'm listening without a wake word.".to_string()
            }
            ControlCommand::SetVoice(voice) if voice.is_empty() => {
                "Which voice would you like?".to_string()
            }
            ControlCommand::SetVoice(voice) => {
                match self.synthesizer.select_voice(&mut self.session, &voice) {
                    Ok(()) => format!("Voice changed to {voice}."),
                    Err(_) => format!("I don't have a voice called {voice}."),
                }
            }
            ControlCommand::SpeakFaster => {
                self.session.speak_faster();
                "Okay, speaking faster.".to_string()
            }
            ControlCommand::SpeakSlower => {
                self.session.speak_slower();
                "Okay, speaking slower.".to_string()
            }
            ControlCommand::NormalRate => {
                self.session.normal_rate();
                "Back to normal speed.".to_string()
            }
            ControlCommand::ResetConversation => {
                self.backend.reset();
                "Okay, let's start over.".to_string()
            }
        };
        self.respond(&reply).await
    }

    async fn look(&mut self, prompt: &str) -> StepOutcome {
        if self.stop_pending("frame capture") {
            return StepOutcome::Stop;
        }

        let frame = match self.vision.capture_frame().await {
            Ok(frame) => {
                self.session.record_success(Subsystem::Vision);
                frame
            }
            Err(e) => {
                self.session.record_failure(Subsystem::Vision);
                tracing::error!(error = %e, "frame capture failed");
                let explanation = self.translator.explain(&e, ErrorContext::Camera);
                return self
                    .respond(&format!("Sorry, I can't see right now. {explanation}"))
                    .await;
            }
        };

        if self.stop_pending("frame description") {
            return StepOutcome::Stop;
        }

        let describer = &self.describer;
        let frame_ref = &frame;
        let described = self
            .executor
            .run("describe frame", &self.options.network_policy, || {
                describer.describe(frame_ref, prompt)
            })
            .await;
        drop(frame);

        match described {
            Ok(description) => {
                self.session.record_success(Subsystem::Backend);
                self.backend.remember(prompt, &description);
                self.respond(&description).await
            }
            Err(e) => {
                self.session.record_failure(Subsystem::Backend);
                tracing::error!(error = %e, "frame description failed");
                let explanation = self.translator.explain(&e, ErrorContext::Vision);
                self.respond(&format!("Sorry, I couldn't make sense of what I saw. {explanation}"))
                    .await
            }
        }
    }

    async fn act(&mut self, action: RobotAction, text: &str) -> StepOutcome {
        let Some(actions) = self.actions.clone() else {
            tracing::debug!(%action, "no robot body, treating as conversation");
            return self.converse(text).await;
        };

        if self.stop_pending("action") {
            return StepOutcome::Stop;
        }

        match actions.perform(action).await {
            Ok(()) => {
                self.session.record_success(Subsystem::Motion);
                let confirmation = action.confirmation();
                self.backend.remember(text, &confirmation);
                self.respond(&confirmation).await
            }
            Err(e) => {
                self.session.record_failure(Subsystem::Motion);
                tracing::error!(error = %e, %action, "action failed");
                let explanation = self.translator.explain(&e, ErrorContext::Motion);
                self.respond(&format!("Sorry, I can't do that right now. {explanation}"))
                    .await
            }
        }
    }

    /// Leave the body at rest when the session ends
    async fn halt_body(&self) {
        let Some(actions) = &self.actions else {
            return;
        };
        if let Err(e) = actions.perform(RobotAction::Halt).await {
            tracing::warn!(error = %e, body = actions.name(), "could not halt body");
        }
    }

    async fn converse(&mut self, text: &str) -> StepOutcome {
        if self.stop_pending("conversation") {
            return StepOutcome::Stop;
        }

        let backend = &self.backend;
        let reply = self
            .executor
            .run("conversation", &self.options.network_policy, || {
                backend.reply(text)
            })
            .await;

        match reply {
            Ok(reply) => {
                self.session.record_success(Subsystem::Backend);
                self.respond(&reply).await
            }
            Err(e) => {
                self.session.record_failure(Subsystem::Backend);
                tracing::error!(error = %e, "conversation call failed");
                let explanation = self.translator.explain(&e, backend_context(&e));
                self.respond(&format!("Sorry, I couldn't come up with an answer. {explanation}"))
                    .await
            }
        }
    }

    async fn audio_failure(&mut self, error: Error) -> Result<StepOutcome> {
        if self.registry.mode() == DeviceMode::Hardware
            && matches!(
                error.root(),
                Error::DeviceUnavailable {
                    role: DeviceRole::Microphone,
                    ..
                }
            )
        {
            tracing::error!(error = %error, "microphone unavailable in hardware-only mode");
            return Err(error);
        }

        let failures = self.session.record_failure(Subsystem::Audio);
        if failures == 1 {
            tracing::error!(error = %error, "capture failed");
            let explanation = self.translator.explain(&error, ErrorContext::Microphone);
            if self.respond(explanation).await == StepOutcome::Stop {
                return Ok(StepOutcome::Stop);
            }
        } else {
            tracing::warn!(error = %error, failures, "capture failed again");
        }

        if failures >= self.options.failure_threshold {
            tracing::warn!(failures, "rescanning microphone on next capture");
            self.registry.invalidate(DeviceRole::Microphone);
        }

        tokio::time::sleep(self.options.failure_backoff.delay_for_retry(failures)).await;
        Ok(StepOutcome::Continue)
    }

    /// Speak a reply unless a stop arrived while it was being prepared
    async fn respond(&mut self, text: &str) -> StepOutcome {
        if self.stop_pending("reply") {
            return StepOutcome::Stop;
        }
        self.say(text).await;
        StepOutcome::Continue
    }

    fn stop_pending(&self, before: &str) -> bool {
        let requested = self.stop.is_requested();
        if requested {
            tracing::info!(before, "stop requested, skipping");
        }
        requested
    }

    /// Speak through the synthesizer; failures are logged, never raised
    async fn say(&mut self, text: &str) {
        match self.synthesizer.speak(text, &self.session).await {
            Ok(()) => self.session.record_success(Subsystem::Synthesis),
            Err(e) => {
                let failures = self.session.record_failure(Subsystem::Synthesis);
                if failures == 1 {
                    tracing::error!(error = %e, text, "could not speak");
                } else {
                    tracing::warn!(error = %e, failures, text, "could not speak");
                }
            }
        }
    }
}

fn backend_context(error: &Error) -> ErrorContext {
    match error.root() {
        Error::Http(_) | Error::Timeout(_) => ErrorContext::Network,
        _ => ErrorContext::Api,
    }
}
