//! Intent gate: decides what each recognized utterance means
//!
//! Two states. `Idle` needs the wake phrase before acting (unless the
//! session has switched the wake word off); `Active` takes commands and
//! conversation directly and falls back to `Idle` after the active window.
//!
//! Precedence: stop > wake handling > control phrase > vision trigger >
//! robot action > conversation. Matching is case-insensitive substring,
//! first match wins.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::audio::Utterance;
use crate::config::IntentConfig;
use crate::motion::RobotAction;
use crate::session::SessionState;
use crate::{Error, Result};

/// Gate state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    Active,
}

/// Local command that mutates the session instead of reaching the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Require (`true`) or stop requiring (`false`) the wake phrase
    WakeWord(bool),
    /// Switch voice identity; may name an unknown voice
    SetVoice(String),
    SpeakFaster,
    SpeakSlower,
    NormalRate,
    ResetConversation,
}

/// What an utterance means
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Nothing to act on
    Ignored,
    /// Wake phrase with nothing after it
    WakeOnly,
    Control(ControlCommand),
    /// Look and describe; `prompt` is what was asked
    Vision { prompt: String },
    /// Move the robot body; `text` is the command as heard
    Action { action: RobotAction, text: String },
    /// Forward verbatim to the conversation backend
    Conversation { text: String },
    /// End the session
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlKind {
    WakeOn,
    WakeOff,
    Voice,
    Faster,
    Slower,
    Normal,
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActionKind {
    Halt,
    Movement,
    Wave,
    KickBall,
    TrackObject,
}

/// Validated, lower-cased phrase table
#[derive(Debug, Clone)]
pub struct PhraseTable {
    wake: String,
    stop: Vec<String>,
    controls: Vec<(String, ControlKind)>,
    vision: Vec<String>,
    actions: Vec<(String, ActionKind)>,
}

impl PhraseTable {
    /// Build and validate the table
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationInvalid` for an empty phrase, a duplicate
    /// phrase, or a phrase that contains (or is contained in) a phrase of
    /// another category, which precedence would otherwise shadow
    pub fn new(wake_phrase: &str, config: &IntentConfig) -> Result<Self> {
        let wake = normalize(wake_phrase);
        if wake.is_empty() {
            return Err(Error::ConfigurationInvalid("wake phrase is empty".to_string()));
        }

        let mut seen: Vec<(String, &'static str)> = vec![(wake.clone(), "wake phrase")];

        let mut category = |name: &'static str, phrases: &[String]| -> Result<Vec<String>> {
            phrases
                .iter()
                .map(|p| {
                    let phrase = normalize(p);
                    if phrase.is_empty() {
                        return Err(Error::ConfigurationInvalid(format!(
                            "empty phrase in intents.{name}"
                        )));
                    }
                    let clash = seen.iter().find(|(other, other_name)| {
                        *other == phrase || (*other_name != name && overlaps(other, &phrase))
                    });
                    if let Some((other, other_name)) = clash {
                        return Err(Error::ConfigurationInvalid(format!(
                            "phrase {phrase:?} in {name} overlaps {other:?} in {other_name}"
                        )));
                    }
                    seen.push((phrase.clone(), name));
                    Ok(phrase)
                })
                .collect()
        };

        let stop = category("stop", &config.stop)?;
        let vision = category("vision", &config.vision)?;

        let mut controls = Vec::new();
        for (name, phrases, kind) in [
            ("wake_word_on", &config.wake_word_on, ControlKind::WakeOn),
            ("wake_word_off", &config.wake_word_off, ControlKind::WakeOff),
            ("change_voice", &config.change_voice, ControlKind::Voice),
            ("faster", &config.faster, ControlKind::Faster),
            ("slower", &config.slower, ControlKind::Slower),
            ("normal_rate", &config.normal_rate, ControlKind::Normal),
            ("reset_conversation", &config.reset_conversation, ControlKind::Reset),
        ] {
            controls.extend(category(name, phrases)?.into_iter().map(|p| (p, kind)));
        }

        // Halt first so "stop moving" never reads as a movement
        let mut actions = Vec::new();
        for (name, phrases, kind) in [
            ("halt", &config.halt, ActionKind::Halt),
            ("movement", &config.movement, ActionKind::Movement),
            ("wave", &config.wave, ActionKind::Wave),
            ("kick_ball", &config.kick_ball, ActionKind::KickBall),
            ("track_object", &config.track_object, ActionKind::TrackObject),
        ] {
            actions.extend(category(name, phrases)?.into_iter().map(|p| (p, kind)));
        }

        Ok(Self {
            wake,
            stop,
            controls,
            vision,
            actions,
        })
    }

    fn control(&self, text: &str) -> Option<ControlCommand> {
        let lower = text.to_lowercase();
        let (phrase, kind) = self.controls.iter().find(|(p, _)| lower.contains(p.as_str()))?;

        Some(match kind {
            ControlKind::WakeOn => ControlCommand::WakeWord(true),
            ControlKind::WakeOff => ControlCommand::WakeWord(false),
            ControlKind::Voice => {
                let name = after_phrase(text, phrase)
                    .split_whitespace()
                    .next()
                    .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
                    .unwrap_or_default();
                ControlCommand::SetVoice(name)
            }
            ControlKind::Faster => ControlCommand::SpeakFaster,
            ControlKind::Slower => ControlCommand::SpeakSlower,
            ControlKind::Normal => ControlCommand::NormalRate,
            ControlKind::Reset => ControlCommand::ResetConversation,
        })
    }

    fn is_stop(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.stop.iter().any(|p| lower.contains(p.as_str()))
    }

    fn is_vision(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.vision.iter().any(|p| lower.contains(p.as_str()))
    }

    fn action(&self, text: &str) -> Option<RobotAction> {
        let lower = text.to_lowercase();
        let (_, kind) = self.actions.iter().find(|(p, _)| lower.contains(p.as_str()))?;

        Some(match kind {
            ActionKind::Halt => RobotAction::Halt,
            ActionKind::Movement => RobotAction::movement(text),
            ActionKind::Wave => RobotAction::Wave,
            ActionKind::KickBall => RobotAction::KickBall,
            ActionKind::TrackObject => RobotAction::TrackObject,
        })
    }
}

/// Classifies utterances and tracks the Idle/Active state
#[derive(Debug, Clone)]
pub struct IntentGate {
    table: PhraseTable,
    state: GateState,
    active_window: Option<chrono::Duration>,
    last_activity: Option<DateTime<Utc>>,
}

impl IntentGate {
    /// Create an idle gate
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationInvalid` if the phrase table is malformed
    pub fn new(wake_phrase: &str, config: &IntentConfig) -> Result<Self> {
        let table = PhraseTable::new(wake_phrase, config)?;
        let active_window = config
            .active_window
            .map(|w| chrono::Duration::from_std(w).unwrap_or(chrono::Duration::MAX));

        Ok(Self {
            table,
            state: GateState::Idle,
            active_window,
            last_activity: None,
        })
    }

    #[must_use]
    pub const fn state(&self) -> GateState {
        self.state
    }

    /// Inactivity before `Active` returns to `Idle`
    #[must_use]
    pub fn active_window(&self) -> Option<Duration> {
        self.active_window.and_then(|w| w.to_std().ok())
    }

    /// Drop back to `Idle`
    pub fn deactivate(&mut self) {
        self.state = GateState::Idle;
        self.last_activity = None;
    }

    /// Classify one utterance
    ///
    /// The utterance is consumed here; nothing about it is kept beyond its
    /// timestamp.
    pub fn classify(&mut self, utterance: &Utterance, session: &SessionState) -> Intent {
        let now = utterance.captured_at;
        self.expire(now);

        let text = utterance.text.trim();
        if text.is_empty() {
            return Intent::Ignored;
        }

        if self.table.is_stop(text) {
            tracing::info!(text, "stop phrase");
            return Intent::Stop;
        }

        let command = if let Some(range) = find_ignore_case(text, &self.table.wake) {
            if self.state == GateState::Idle {
                tracing::info!(wake_phrase = %self.table.wake, "wake phrase detected");
            }
            self.state = GateState::Active;
            self.last_activity = Some(now);

            let rest = text[range.1..]
                .trim_start_matches(|c: char| c.is_whitespace() || c == ',' || c == '.');
            if rest.is_empty() {
                return Intent::WakeOnly;
            }
            rest
        } else if self.state == GateState::Idle && session.wake_word_enabled() {
            tracing::debug!(text, "no wake phrase, ignoring");
            return Intent::Ignored;
        } else {
            self.last_activity = Some(now);
            text
        };

        if let Some(control) = self.table.control(command) {
            tracing::info!(?control, "control phrase");
            return Intent::Control(control);
        }

        if self.table.is_vision(command) {
            return Intent::Vision {
                prompt: command.to_string(),
            };
        }

        if let Some(action) = self.table.action(command) {
            tracing::info!(%action, "action phrase");
            return Intent::Action {
                action,
                text: command.to_string(),
            };
        }

        Intent::Conversation {
            text: command.to_string(),
        }
    }

    fn expire(&mut self, now: DateTime<Utc>) {
        if self.state != GateState::Active {
            return;
        }
        let (Some(window), Some(last)) = (self.active_window, self.last_activity) else {
            return;
        };
        if now.signed_duration_since(last) > window {
            tracing::debug!("active window elapsed, returning to idle");
            self.deactivate();
        }
    }
}

fn normalize(phrase: &str) -> String {
    phrase.trim().to_lowercase()
}

/// Whether either phrase would also match wherever the other does
fn overlaps(a: &str, b: &str) -> bool {
    a.contains(b) || b.contains(a)
}

/// Byte range of `needle` (already lower-case) in `haystack`, ignoring case
fn find_ignore_case(haystack: &str, needle: &str) -> Option<(usize, usize)> {
    let lower = haystack.to_lowercase();
    let (start, end) = if lower.len() == haystack.len() {
        let start = lower.find(needle)?;
        (start, start + needle.len())
    } else {
        // Case folding changed byte lengths; fall back to ASCII folding
        let start = haystack.to_ascii_lowercase().find(needle)?;
        (start, start + needle.len())
    };

    (haystack.is_char_boundary(start) && haystack.is_char_boundary(end)).then_some((start, end))
}

/// Text following `phrase` in `text`, or empty
fn after_phrase<'a>(text: &'a str, phrase: &str) -> &'a str {
    find_ignore_case(text, phrase).map_or("", |(_, end)| &text[end..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::UtteranceOrigin;

    fn gate() -> IntentGate {
        IntentGate::new("Beta", &IntentConfig::default()).unwrap()
    }

    fn heard(text: &str) -> Utterance {
        Utterance::new(text, UtteranceOrigin::Simulated)
    }

    fn session() -> SessionState {
        SessionState::new(true, "alloy", 1.0)
    }

    #[test]
    fn finds_phrase_regardless_of_case() {
        assert_eq!(find_ignore_case("Hey BETA, hi", "beta"), Some((4, 8)));
        assert_eq!(find_ignore_case("nothing here", "beta"), None);
    }

    #[test]
    fn voice_name_follows_phrase() {
        let mut g = gate();
        let intent = g.classify(&heard("Beta, change voice to Nova."), &session());
        assert_eq!(intent, Intent::Control(ControlCommand::SetVoice("nova".to_string())));
    }

    #[test]
    fn duplicate_phrase_rejected() {
        let mut config = IntentConfig::default();
        config.faster.push("What do you see".to_string());
        let err = IntentGate::new("Beta", &config).unwrap_err();
        assert!(matches!(err, Error::ConfigurationInvalid(_)));
    }

    #[test]
    fn empty_wake_phrase_rejected() {
        assert!(IntentGate::new("  ", &IntentConfig::default()).is_err());
    }

    #[test]
    fn halt_wins_over_movement() {
        let mut g = gate();
        let intent = g.classify(&heard("Beta, stop moving and walk away"), &session());
        assert!(matches!(
            intent,
            Intent::Action {
                action: RobotAction::Halt,
                ..
            }
        ));
    }

    #[test]
    fn wake_only_activates() {
        let mut g = gate();
        assert_eq!(g.classify(&heard("beta."), &session()), Intent::WakeOnly);
        assert_eq!(g.state(), GateState::Active);
    }
}
