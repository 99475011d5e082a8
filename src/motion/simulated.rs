//! Body stand-in for sessions without a robot attached

use async_trait::async_trait;

use super::{RobotAction, RobotActions, Running};
use crate::Result;

/// Logs actions instead of moving, keeping the same timing as a real body
#[derive(Debug, Default)]
pub struct SimulatedActions {
    running: Running,
}

impl SimulatedActions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Action still in progress, if any
    #[must_use]
    pub fn current(&self) -> Option<RobotAction> {
        self.running.current()
    }
}

#[async_trait]
impl RobotActions for SimulatedActions {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn perform(&self, action: RobotAction) -> Result<()> {
        tracing::info!(%action, duration = ?action.duration(), "simulated action");
        self.running.start(action);
        Ok(())
    }

    async fn check_timeouts(&self) -> Result<()> {
        if let Some(action) = self.running.take_expired() {
            tracing::info!(%action, "simulated action finished");
        }
        Ok(())
    }
}
