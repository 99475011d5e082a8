//! Process-local session state
//!
//! Mutated only by control commands from the intent gate and by the
//! controller's failure accounting. Lost on restart.

use std::fmt;

use uuid::Uuid;

/// Slowest speech rate accepted
pub const MIN_SPEECH_RATE: f32 = 0.25;
/// Fastest speech rate accepted
pub const MAX_SPEECH_RATE: f32 = 4.0;
/// Factor applied by one faster/slower command
pub const SPEECH_RATE_STEP: f32 = 1.25;

/// Subsystems with their own failure counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subsystem {
    Audio,
    Vision,
    Synthesis,
    Backend,
    Motion,
}

impl Subsystem {
    const fn index(self) -> usize {
        match self {
            Self::Audio => 0,
            Self::Vision => 1,
            Self::Synthesis => 2,
            Self::Backend => 3,
            Self::Motion => 4,
        }
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Audio => "audio",
            Self::Vision => "vision",
            Self::Synthesis => "synthesis",
            Self::Backend => "backend",
            Self::Motion => "motion",
        })
    }
}

/// Mutable state of one conversation session
#[derive(Debug, Clone)]
pub struct SessionState {
    id: Uuid,
    wake_word_enabled: bool,
    voice: String,
    speech_rate: f32,
    failures: [u32; 5],
}

impl SessionState {
    /// Fresh session with the configured voice
    #[must_use]
    pub fn new(wake_word_enabled: bool, voice: impl Into<String>, speech_rate: f32) -> Self {
        Self {
            id: Uuid::new_v4(),
            wake_word_enabled,
            voice: voice.into(),
            speech_rate: clamp_rate(speech_rate),
            failures: [0; 5],
        }
    }

    /// Identifier attached to log spans
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub const fn wake_word_enabled(&self) -> bool {
        self.wake_word_enabled
    }

    pub fn set_wake_word(&mut self, enabled: bool) {
        tracing::info!(enabled, "wake word requirement changed");
        self.wake_word_enabled = enabled;
    }

    /// Voice identity applied to every synthesis call
    #[must_use]
    pub fn voice(&self) -> &str {
        &self.voice
    }

    /// Replace the voice; callers validate the name first
    pub fn set_voice(&mut self, voice: impl Into<String>) {
        self.voice = voice.into();
        tracing::info!(voice = %self.voice, "voice changed");
    }

    /// Speech-rate multiplier, 1.0 is normal
    #[must_use]
    pub const fn speech_rate(&self) -> f32 {
        self.speech_rate
    }

    pub fn speak_faster(&mut self) {
        self.set_rate(self.speech_rate * SPEECH_RATE_STEP);
    }

    pub fn speak_slower(&mut self) {
        self.set_rate(self.speech_rate / SPEECH_RATE_STEP);
    }

    pub fn normal_rate(&mut self) {
        self.set_rate(1.0);
    }

    fn set_rate(&mut self, rate: f32) {
        self.speech_rate = clamp_rate(rate);
        tracing::info!(rate = self.speech_rate, "speech rate changed");
    }

    /// Count a failure, returning the consecutive count
    pub fn record_failure(&mut self, subsystem: Subsystem) -> u32 {
        let count = &mut self.failures[subsystem.index()];
        *count = count.saturating_add(1);
        *count
    }

    /// Reset the consecutive count after a success
    pub fn record_success(&mut self, subsystem: Subsystem) {
        let count = &mut self.failures[subsystem.index()];
        if *count > 0 {
            tracing::debug!(%subsystem, failures = *count, "subsystem recovered");
        }
        *count = 0;
    }

    /// Consecutive failures so far
    #[must_use]
    pub const fn failures(&self, subsystem: Subsystem) -> u32 {
        self.failures[subsystem.index()]
    }
}

fn clamp_rate(rate: f32) -> f32 {
    if rate.is_finite() {
        rate.clamp(MIN_SPEECH_RATE, MAX_SPEECH_RATE)
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_steps_and_clamps() {
        let mut s = SessionState::new(true, "alloy", 1.0);
        s.speak_faster();
        assert!((s.speech_rate() - 1.25).abs() < f32::EPSILON);

        for _ in 0..20 {
            s.speak_faster();
        }
        assert!((s.speech_rate() - MAX_SPEECH_RATE).abs() < f32::EPSILON);

        for _ in 0..40 {
            s.speak_slower();
        }
        assert!((s.speech_rate() - MIN_SPEECH_RATE).abs() < f32::EPSILON);

        s.normal_rate();
        assert!((s.speech_rate() - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn failure_counters_are_independent() {
        let mut s = SessionState::new(true, "alloy", 1.0);
        assert_eq!(s.record_failure(Subsystem::Audio), 1);
        assert_eq!(s.record_failure(Subsystem::Audio), 2);
        assert_eq!(s.record_failure(Subsystem::Vision), 1);

        s.record_success(Subsystem::Audio);
        assert_eq!(s.failures(Subsystem::Audio), 0);
        assert_eq!(s.failures(Subsystem::Vision), 1);
    }

    #[test]
    fn nonsense_rate_falls_back_to_normal() {
        let s = SessionState::new(false, "nova", f32::NAN);
        assert!((s.speech_rate() - 1.0).abs() < f32::EPSILON);
        assert!(!s.wake_word_enabled());
    }
}
