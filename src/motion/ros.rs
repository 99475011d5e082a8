//! ROS topic publisher for the humanoid body
//!
//! Each action becomes one or two `rostopic pub -1` calls on the robot's
//! topics under a configurable prefix (`/ainex` by default).

use std::sync::Arc;

use async_trait::async_trait;

use super::{Direction, RobotAction, RobotActions, Running};
use crate::platform::CommandRunner;
use crate::resilience::{ResilientExecutor, RetryPolicy};
use crate::{Error, Result};

const ROSTOPIC: &str = "rostopic";

/// Linear speed per requested step, m/s
const STEP_SPEED: f64 = 0.2;

/// Turning rate for left/right, rad/s
const TURN_RATE: f64 = 0.5;

/// One message for one topic
#[derive(Debug, Clone, PartialEq)]
struct Publication {
    topic: &'static str,
    msg_type: &'static str,
    payload: String,
}

impl Publication {
    fn twist(linear_x: f64, angular_z: f64) -> Self {
        Self {
            topic: "cmd_vel",
            msg_type: "geometry_msgs/Twist",
            payload: format!(
                "{{linear: {{x: {linear_x:.1}, y: 0.0, z: 0.0}}, angular: {{x: 0.0, y: 0.0, z: {angular_z:.1}}}}}"
            ),
        }
    }

    fn string(topic: &'static str, data: &str) -> Self {
        Self {
            topic,
            msg_type: "std_msgs/String",
            payload: format!("data: '{data}'"),
        }
    }
}

fn publications(action: RobotAction) -> Vec<Publication> {
    match action {
        RobotAction::Move { direction, steps } => {
            let speed = STEP_SPEED * f64::from(steps);
            vec![match direction {
                Direction::Forward => Publication::twist(speed, 0.0),
                Direction::Backward => Publication::twist(-speed, 0.0),
                Direction::Left => Publication::twist(0.0, TURN_RATE),
                Direction::Right => Publication::twist(0.0, -TURN_RATE),
            }]
        }
        RobotAction::Wave => vec![Publication::string("arm_movement", "wave_right_arm")],
        RobotAction::KickBall => vec![Publication::string("execute_action", "find_and_kick_ball")],
        RobotAction::TrackObject => vec![Publication::string("execute_action", "start_tracking")],
        RobotAction::Halt => vec![
            Publication {
                topic: "stop_all",
                msg_type: "std_msgs/Bool",
                payload: "data: true".to_string(),
            },
            Publication::twist(0.0, 0.0),
        ],
    }
}

/// Drives the body through ROS topics
pub struct RosTopicActions {
    runner: Arc<dyn CommandRunner>,
    prefix: String,
    policy: RetryPolicy,
    executor: ResilientExecutor,
    running: Running,
}

impl RosTopicActions {
    /// Publish under `prefix` (e.g. "/ainex")
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, prefix: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            runner,
            prefix: prefix.into().trim_end_matches('/').to_string(),
            policy,
            executor: ResilientExecutor::new(),
            running: Running::default(),
        }
    }

    /// Whether `rostopic` can be run here
    #[must_use]
    pub fn is_available(runner: &dyn CommandRunner) -> bool {
        runner.is_available(ROSTOPIC)
    }

    async fn publish(&self, publication: &Publication) -> Result<()> {
        let topic = format!("{}/{}", self.prefix, publication.topic);
        let args = vec![
            "pub".to_string(),
            "-1".to_string(),
            topic.clone(),
            publication.msg_type.to_string(),
            publication.payload.clone(),
        ];

        tracing::debug!(%topic, payload = %publication.payload, "publishing");
        let (runner, args) = (&self.runner, &args);
        let output = self
            .executor
            .run("publish", &self.policy, || async move { runner.run(ROSTOPIC, args).await })
            .await?;

        if output.success() {
            Ok(())
        } else {
            Err(Error::Motion(format!("{topic}: {}", output.stderr.trim())))
        }
    }

    async fn issue(&self, action: RobotAction) -> Result<()> {
        if !Self::is_available(self.runner.as_ref()) {
            return Err(Error::MotionUnavailable(format!("{ROSTOPIC} is not installed")));
        }
        for publication in publications(action) {
            self.publish(&publication).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl RobotActions for RosTopicActions {
    fn name(&self) -> &str {
        "ros"
    }

    async fn perform(&self, action: RobotAction) -> Result<()> {
        tracing::info!(%action, "robot action");
        self.issue(action).await?;
        self.running.start(action);
        Ok(())
    }

    async fn check_timeouts(&self) -> Result<()> {
        let Some(action) = self.running.take_expired() else {
            return Ok(());
        };
        tracing::info!(%action, "action duration elapsed, halting");
        self.issue(RobotAction::Halt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_speed_scales_with_steps() {
        let action = RobotAction::Move {
            direction: Direction::Forward,
            steps: 2,
        };
        assert_eq!(
            publications(action),
            vec![Publication::twist(0.4, 0.0)]
        );
        assert!(publications(action)[0].payload.contains("x: 0.4"));
    }

    #[test]
    fn turning_uses_angular_velocity() {
        let pubs = publications(RobotAction::Move {
            direction: Direction::Right,
            steps: 5,
        });
        assert!(pubs[0].payload.contains("z: -0.5"));
        assert!(pubs[0].payload.contains("x: 0.0"));
    }

    #[test]
    fn halt_stops_everything_then_zeroes_velocity() {
        let pubs = publications(RobotAction::Halt);
        assert_eq!(pubs.len(), 2);
        assert_eq!(pubs[0].topic, "stop_all");
        assert_eq!(pubs[1], Publication::twist(0.0, 0.0));
    }
}
