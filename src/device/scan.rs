//! OS endpoint enumeration for ALSA and V4L2 devices

use std::path::Path;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use super::DeviceRole;
use super::registry::DeviceScanner;
use crate::Result;
use crate::platform::CommandRunner;

/// `card 3: Device [USB PnP Sound Device], device 0: USB Audio [USB Audio]`
static ALSA_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^card (\d+): ([^\s\[]+) \[([^\]]*)\], device (\d+): [^\[]*\[([^\]]*)\]")
        .expect("valid regex")
});

/// Time given to a killed holder to let go of the device
const RELEASE_SETTLE: Duration = Duration::from_millis(500);

/// An endpoint the OS reports for a role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Address handed to tools
    pub address: String,
    /// Device node used for holder checks
    pub node: String,
    /// Human-readable name
    pub name: String,
}

impl Endpoint {
    /// Whether `pattern` selects this endpoint
    ///
    /// Empty pattern matches anything; otherwise an exact address or node
    /// match, or a case-insensitive substring of the name.
    #[must_use]
    pub fn matches(&self, pattern: &str) -> bool {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return true;
        }
        self.address == pattern
            || self.node == pattern
            || self.name.to_lowercase().contains(&pattern.to_lowercase())
    }
}

/// Parse `arecord -l` / `aplay -l` output
///
/// `capture` selects the node suffix (`c` for capture, `p` for playback)
#[must_use]
pub fn parse_alsa_listing(listing: &str, capture: bool) -> Vec<Endpoint> {
    let suffix = if capture { 'c' } else { 'p' };

    listing
        .lines()
        .filter_map(|line| ALSA_LINE.captures(line.trim()))
        .map(|caps| {
            let card = &caps[1];
            let card_name = &caps[3];
            let device = &caps[4];
            let device_name = &caps[5];

            Endpoint {
                address: format!("plughw:{card},{device}"),
                node: format!("/dev/snd/pcmC{card}D{device}{suffix}"),
                name: format!("{card_name} / {device_name}"),
            }
        })
        .collect()
}

/// Scans ALSA and V4L2 endpoints through platform tools
pub struct SystemScanner {
    runner: Arc<dyn CommandRunner>,
    camera_paths: Vec<String>,
    dev_dir: String,
}

impl SystemScanner {
    /// Create a scanner
    ///
    /// `camera_paths` are extra nodes (e.g. `/dev/usb_cam`) checked in
    /// addition to `/dev/video*`
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, camera_paths: Vec<String>) -> Self {
        Self {
            runner,
            camera_paths,
            dev_dir: "/dev".to_string(),
        }
    }

    /// Look for video nodes somewhere other than `/dev`
    #[must_use]
    pub fn with_dev_dir(mut self, dir: impl Into<String>) -> Self {
        self.dev_dir = dir.into();
        self
    }

    async fn list_alsa(&self, tool: &str, capture: bool) -> Result<Vec<Endpoint>> {
        if !self.runner.is_available(tool) {
            tracing::debug!(tool, "not installed, no endpoints");
            return Ok(Vec::new());
        }

        let output = self.runner.run(tool, &["-l".to_string()]).await?;
        if !output.success() {
            // "no soundcards found" exits non-zero
            tracing::debug!(tool, stderr = %output.stderr.trim(), "listing failed");
            return Ok(Vec::new());
        }

        Ok(parse_alsa_listing(&output.stdout_text(), capture))
    }

    fn list_video(&self) -> Vec<Endpoint> {
        let mut nodes: Vec<String> = std::fs::read_dir(&self.dev_dir)
            .map(|entries| {
                entries
                    .filter_map(std::result::Result::ok)
                    .filter(|e| e.file_name().to_string_lossy().starts_with("video"))
                    .map(|e| e.path().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        nodes.sort();

        for path in &self.camera_paths {
            if Path::new(path).exists() && !nodes.contains(path) {
                nodes.push(path.clone());
            }
        }

        nodes
            .into_iter()
            .map(|node| Endpoint {
                address: node.clone(),
                name: node.rsplit('/').next().unwrap_or(&node).to_string(),
                node,
            })
            .collect()
    }
}

#[async_trait]
impl DeviceScanner for SystemScanner {
    async fn enumerate(&self, role: DeviceRole) -> Result<Vec<Endpoint>> {
        match role {
            DeviceRole::Microphone => self.list_alsa("arecord", true).await,
            DeviceRole::Speaker => self.list_alsa("aplay", false).await,
            DeviceRole::Camera => Ok(self.list_video()),
        }
    }

    async fn is_held(&self, endpoint: &Endpoint) -> Result<bool> {
        if !self.runner.is_available("fuser") {
            return Ok(false);
        }
        // fuser exits 0 only when some process has the node open
        let output = self.runner.run("fuser", &[endpoint.node.clone()]).await?;
        Ok(output.success())
    }

    async fn release(&self, endpoint: &Endpoint) -> Result<()> {
        tracing::info!(node = %endpoint.node, "terminating processes holding device");
        let output = self
            .runner
            .run("fuser", &["-k".to_string(), endpoint.node.clone()])
            .await?;
        if !output.success() {
            tracing::debug!(node = %endpoint.node, "no holder to terminate");
        }
        tokio::time::sleep(RELEASE_SETTLE).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARECORD_L: &str = "\
**** List of CAPTURE Hardware Devices ****
card 3: Device [USB PnP Sound Device], device 0: USB Audio [USB Audio]
  Subdevices: 1/1
  Subdevice #0: subdevice #0
";

    const APLAY_L: &str = "\
**** List of PLAYBACK Hardware Devices ****
card 0: Headphones [bcm2835 Headphones], device 0: bcm2835 Headphones [bcm2835 Headphones]
  Subdevices: 8/8
card 2: Audio [iStore Audio], device 0: USB Audio [USB Audio]
  Subdevices: 1/1
";

    #[test]
    fn parses_capture_listing() {
        let endpoints = parse_alsa_listing(ARECORD_L, true);
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].address, "plughw:3,0");
        assert_eq!(endpoints[0].node, "/dev/snd/pcmC3D0c");
        assert_eq!(endpoints[0].name, "USB PnP Sound Device / USB Audio");
    }

    #[test]
    fn parses_playback_listing() {
        let endpoints = parse_alsa_listing(APLAY_L, false);
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[1].address, "plughw:2,0");
        assert_eq!(endpoints[1].node, "/dev/snd/pcmC2D0p");
    }

    #[test]
    fn empty_listing() {
        assert!(parse_alsa_listing("aplay: device_list:274: no soundcards found...", false).is_empty());
    }

    #[test]
    fn pattern_matching() {
        let ep = &parse_alsa_listing(APLAY_L, false)[1];
        assert!(ep.matches(""));
        assert!(ep.matches("plughw:2,0"));
        assert!(ep.matches("/dev/snd/pcmC2D0p"));
        assert!(ep.matches("istore"));
        assert!(!ep.matches("plughw:3,0"));
    }

    #[test]
    fn lists_video_nodes_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("video2"), b"").unwrap();
        std::fs::write(dir.path().join("video0"), b"").unwrap();
        std::fs::write(dir.path().join("null"), b"").unwrap();

        let scanner = SystemScanner::new(Arc::new(crate::platform::SystemRunner), Vec::new())
            .with_dev_dir(dir.path().to_string_lossy());
        let nodes = scanner.list_video();

        assert_eq!(nodes.len(), 2);
        assert!(nodes[0].address.ends_with("video0"));
        assert_eq!(nodes[0].name, "video0");
    }
}
