//! Vision channel: single-shot still frames from the active camera

mod describe;

pub use describe::{OpenAiVision, VisionDescriber};

use std::sync::Arc;

use base64::Engine;
use chrono::{DateTime, Utc};

use crate::device::{ActiveProfile, DeviceProfile, DeviceRegistry, DeviceRole};
use crate::platform::CommandRunner;
use crate::resilience::{ResilientExecutor, RetryPolicy};
use crate::{Error, Result};

/// 1x1 grey PNG handed out by simulated cameras
const PLACEHOLDER_PNG: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=";

/// One captured still frame
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    /// Encoded image bytes
    pub data: Vec<u8>,
    pub mime_type: String,
    /// Camera address or simulated marker
    pub device: String,
    pub resolution: (u32, u32),
    pub captured_at: DateTime<Utc>,
    pub simulated: bool,
}

/// Captures frames through the resolved camera
pub struct VisionChannel {
    registry: Arc<DeviceRegistry>,
    runner: Arc<dyn CommandRunner>,
    executor: ResilientExecutor,
    policy: RetryPolicy,
}

impl VisionChannel {
    #[must_use]
    pub fn new(
        registry: Arc<DeviceRegistry>,
        runner: Arc<dyn CommandRunner>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            runner,
            executor: ResilientExecutor::new(),
            policy,
        }
    }

    /// Capture one still frame
    ///
    /// # Errors
    ///
    /// Returns `CameraUnavailable` if no camera resolves in hardware-only
    /// mode or the camera disappears, or the capture error otherwise
    pub async fn capture_frame(&self) -> Result<FrameBuffer> {
        self.try_capture().await.map_err(|e| match e {
            Error::DeviceUnavailable { reason, .. } => Error::CameraUnavailable(reason),
            other => other,
        })
    }

    async fn try_capture(&self) -> Result<FrameBuffer> {
        let profile = self.registry.resolve(DeviceRole::Camera).await?;

        match self.capture_from(&profile).await {
            Err(e) if e.is_device_busy() => {
                tracing::warn!(address = %profile.address(), "camera busy, rescanning");
                let profile = self.registry.rescan(DeviceRole::Camera).await?;
                self.capture_from(&profile).await
            }
            other => other,
        }
    }

    async fn capture_from(&self, profile: &ActiveProfile) -> Result<FrameBuffer> {
        match profile {
            ActiveProfile::Simulated(sim) => {
                let data = base64::engine::general_purpose::STANDARD
                    .decode(PLACEHOLDER_PNG)
                    .map_err(|e| Error::Vision(format!("placeholder frame: {e}")))?;
                tracing::info!(device = %sim.address(), "simulated frame");

                Ok(FrameBuffer {
                    data,
                    mime_type: "image/png".to_string(),
                    device: sim.address(),
                    resolution: (1, 1),
                    captured_at: Utc::now(),
                    simulated: true,
                })
            }
            ActiveProfile::Hardware(hw) => self.grab(hw).await,
        }
    }

    async fn grab(&self, profile: &DeviceProfile) -> Result<FrameBuffer> {
        let (width, height) = profile.capabilities.resolution.unwrap_or((640, 480));
        let args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-f".to_string(),
            "v4l2".to_string(),
            "-video_size".to_string(),
            format!("{width}x{height}"),
            "-i".to_string(),
            profile.node.clone(),
            "-frames:v".to_string(),
            "1".to_string(),
            "-f".to_string(),
            "image2".to_string(),
            "-c:v".to_string(),
            "mjpeg".to_string(),
            "-".to_string(),
        ];

        tracing::debug!(node = %profile.node, width, height, "capturing frame");
        let (runner, args) = (&self.runner, &args);
        let output = self
            .executor
            .run("frame capture", &self.policy, || async move {
                runner
                    .run("ffmpeg", args)
                    .await?
                    .check_device(DeviceRole::Camera, "ffmpeg")
            })
            .await?;

        if output.stdout.is_empty() {
            return Err(Error::Vision(format!("{} produced an empty frame", profile.node)));
        }

        Ok(FrameBuffer {
            data: output.stdout,
            mime_type: "image/jpeg".to_string(),
            device: profile.address.clone(),
            resolution: (width, height),
            captured_at: Utc::now(),
            simulated: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_is_png() {
        let data = base64::engine::general_purpose::STANDARD
            .decode(PLACEHOLDER_PNG)
            .unwrap();
        assert_eq!(&data[1..4], b"PNG");
    }
}
