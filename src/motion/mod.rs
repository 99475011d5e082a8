//! Robot body actions: walking, gestures and object tracking
//!
//! The gate recognizes an action phrase, [`RobotAction`] carries what to do,
//! and a [`RobotActions`] implementation carries it out. [`RosTopicActions`]
//! publishes to the robot's ROS topics; [`SimulatedActions`] only logs and
//! keeps the timing so a session without a robot body behaves the same.

mod ros;
mod simulated;

pub use ros::RosTopicActions;
pub use simulated::SimulatedActions;

use std::fmt;
use std::sync::{LazyLock, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tokio::time::Instant;

use crate::Result;

/// Steps a single movement command may ask for
pub const MAX_STEPS: u32 = 10;

/// Time allowed per step before the body is halted
pub const STEP_DURATION: Duration = Duration::from_millis(1500);

/// How long a wave lasts
pub const WAVE_DURATION: Duration = Duration::from_secs(5);

static STEP_COUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d+|one|two|three|four|five|six|seven|eight|nine|ten)\s*(?:steps?|paces?)\b")
        .expect("valid regex")
});

/// Which way to move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
    Left,
    Right,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Forward => "forward",
            Self::Backward => "backward",
            Self::Left => "left",
            Self::Right => "right",
        })
    }
}

/// Something the robot body can do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotAction {
    /// Walk or turn for a number of steps (1..=10)
    Move { direction: Direction, steps: u32 },
    /// Wave the right hand
    Wave,
    /// Look for a ball and kick it
    KickBall,
    /// Follow whatever is in front of the camera until halted
    TrackObject,
    /// Stop every movement, gesture and tracking
    Halt,
}

impl RobotAction {
    /// Parse direction and step count out of a movement command
    ///
    /// Direction defaults to forward and steps to one; the count is
    /// clamped to `1..=MAX_STEPS`.
    #[must_use]
    pub fn movement(command: &str) -> Self {
        let lower = command.to_lowercase();
        let direction = if lower.contains("back") {
            Direction::Backward
        } else if lower.contains("left") {
            Direction::Left
        } else if lower.contains("right") {
            Direction::Right
        } else {
            Direction::Forward
        };

        let steps = STEP_COUNT
            .captures(&lower)
            .and_then(|c| c.get(1))
            .and_then(|m| parse_count(m.as_str()))
            .unwrap_or(1)
            .clamp(1, MAX_STEPS);

        Self::Move { direction, steps }
    }

    /// How long the action runs before the body is halted; `None` runs
    /// until an explicit halt
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::Move { steps, .. } => Some(STEP_DURATION * *steps),
            Self::Wave => Some(WAVE_DURATION),
            Self::KickBall | Self::TrackObject | Self::Halt => None,
        }
    }

    /// Spoken once the action has been started
    #[must_use]
    pub fn confirmation(&self) -> String {
        match self {
            Self::Move { direction, steps: 1 } => format!("Moving {direction} one step."),
            Self::Move { direction, steps } => format!("Moving {direction} for {steps} steps."),
            Self::Wave => "I'm waving my right hand.".to_string(),
            Self::KickBall => "I'm looking for the ball and will kick it when I find it.".to_string(),
            Self::TrackObject => {
                "I'm tracking what's in front of me. Say stop tracking when you want me to stop."
                    .to_string()
            }
            Self::Halt => "I've stopped all movements.".to_string(),
        }
    }
}

impl fmt::Display for RobotAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Move { direction, steps } => write!(f, "move {direction} {steps}"),
            Self::Wave => f.write_str("wave"),
            Self::KickBall => f.write_str("kick ball"),
            Self::TrackObject => f.write_str("track object"),
            Self::Halt => f.write_str("halt"),
        }
    }
}

fn parse_count(word: &str) -> Option<u32> {
    const WORDS: [&str; 10] = [
        "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten",
    ];
    word.parse().ok().or_else(|| {
        WORDS
            .iter()
            .position(|w| *w == word)
            .and_then(|i| u32::try_from(i + 1).ok())
    })
}

/// The action in progress and when it must be halted
#[derive(Debug, Default)]
struct Running {
    current: Mutex<Option<(RobotAction, Option<Instant>)>>,
}

impl Running {
    fn start(&self, action: RobotAction) {
        let next = match action {
            RobotAction::Halt => None,
            other => Some((other, other.duration().map(|d| Instant::now() + d))),
        };
        if let Ok(mut current) = self.current.lock() {
            *current = next;
        }
    }

    fn current(&self) -> Option<RobotAction> {
        self.current.lock().ok().and_then(|c| c.map(|(action, _)| action))
    }

    /// Take the action if its deadline has passed
    fn take_expired(&self) -> Option<RobotAction> {
        let mut current = self.current.lock().ok()?;
        match *current {
            Some((action, Some(deadline))) if Instant::now() >= deadline => {
                *current = None;
                Some(action)
            }
            _ => None,
        }
    }
}

/// Which body implementation a session uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionMode {
    /// ROS when `rostopic` is installed, otherwise simulated
    #[default]
    Auto,
    /// Always publish to ROS
    Ros,
    /// Never move, only log
    Simulated,
    /// No body: action phrases go to the conversation backend
    Off,
}

/// Carries out body actions
#[async_trait]
pub trait RobotActions: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Start `action`; returns once it has been issued, not when it ends
    ///
    /// # Errors
    ///
    /// Returns error if the body cannot be reached
    async fn perform(&self, action: RobotAction) -> Result<()>;

    /// Halt an action that has outlived its duration
    ///
    /// Called once per loop iteration.
    ///
    /// # Errors
    ///
    /// Returns error if the halt could not be issued
    async fn check_timeouts(&self) -> Result<()>;
}
