//! Device discovery and substitution
//!
//! Each logical role (microphone, speaker, camera) is backed by exactly one
//! [`ActiveProfile`] at a time: either a scanned hardware endpoint or a
//! simulated stand-in. Channels branch on the profile variant once per
//! operation and never mutate it.

mod scan;
mod registry;
mod simulated;

pub use scan::{Endpoint, SystemScanner, parse_alsa_listing};
pub use registry::{DeviceMode, DeviceRegistry, DeviceScanner, RegistryConfig};
pub use simulated::SimulatedProfile;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical device role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceRole {
    /// Speech capture
    Microphone,
    /// Speech playback
    Speaker,
    /// Still frame capture
    Camera,
}

impl DeviceRole {
    /// Every role, in resolution order
    pub const ALL: [Self; 3] = [Self::Microphone, Self::Speaker, Self::Camera];

    /// Stable lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Microphone => "microphone",
            Self::Speaker => "speaker",
            Self::Camera => "camera",
        }
    }
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an endpoint can be used right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    /// Present and not held by another process
    Available,
    /// Present but held by another process
    Busy,
    /// Not reported by the OS
    Absent,
}

/// What an endpoint can do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Capabilities {
    /// Audio sample rate in Hz
    pub sample_rate: Option<u32>,
    /// Audio channel count
    pub channels: Option<u16>,
    /// Frame width and height
    pub resolution: Option<(u32, u32)>,
}

impl Capabilities {
    /// Mono speech audio at `sample_rate`
    #[must_use]
    pub const fn audio(sample_rate: u32) -> Self {
        Self {
            sample_rate: Some(sample_rate),
            channels: Some(1),
            resolution: None,
        }
    }

    /// Still frames at `width` x `height`
    #[must_use]
    pub const fn video(width: u32, height: u32) -> Self {
        Self {
            sample_rate: None,
            channels: None,
            resolution: Some((width, height)),
        }
    }
}

/// A scanned hardware endpoint bound to a role
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceProfile {
    /// Role this endpoint serves
    pub role: DeviceRole,
    /// Platform address passed to tools (`plughw:3,0`, `/dev/video0`)
    pub address: String,
    /// Device node used for holder checks and forced release
    pub node: String,
    /// Human-readable name from the OS
    pub name: String,
    /// Capture/playback parameters
    pub capabilities: Capabilities,
    /// Status at resolve time
    pub liveness: Liveness,
}

/// The profile backing a role
#[derive(Debug, Clone)]
pub enum ActiveProfile {
    /// Real endpoint
    Hardware(DeviceProfile),
    /// Deterministic or pseudo-random stand-in
    Simulated(SimulatedProfile),
}

impl ActiveProfile {
    /// Role served
    #[must_use]
    pub const fn role(&self) -> DeviceRole {
        match self {
            Self::Hardware(p) => p.role,
            Self::Simulated(p) => p.role(),
        }
    }

    /// Address string, or the simulated marker
    #[must_use]
    pub fn address(&self) -> String {
        match self {
            Self::Hardware(p) => p.address.clone(),
            Self::Simulated(p) => p.address(),
        }
    }

    /// Capture/playback parameters
    #[must_use]
    pub const fn capabilities(&self) -> Capabilities {
        match self {
            Self::Hardware(p) => p.capabilities,
            Self::Simulated(p) => p.capabilities(),
        }
    }

    /// Whether this is a simulated stand-in
    #[must_use]
    pub const fn is_simulated(&self) -> bool {
        matches!(self, Self::Simulated(_))
    }
}

impl fmt::Display for ActiveProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hardware(p) => write!(f, "{} -> {} ({}, {:?})", p.role, p.address, p.name, p.liveness),
            Self::Simulated(p) => match p.seed() {
                Some(seed) => write!(f, "{} -> {} (seed {seed})", p.role(), p.address()),
                None => write!(f, "{} -> {}", p.role(), p.address()),
            },
        }
    }
}
