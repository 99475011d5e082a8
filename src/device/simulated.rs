//! Simulated device stand-in

use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{Capabilities, DeviceRole};

/// Stand-in for a role with no usable hardware
///
/// Carries a pseudo-random generator: seeded runs replay the same sequence,
/// unseeded runs draw from entropy. Clones share the generator.
#[derive(Debug, Clone)]
pub struct SimulatedProfile {
    role: DeviceRole,
    capabilities: Capabilities,
    seed: Option<u64>,
    rng: Arc<Mutex<StdRng>>,
}

impl SimulatedProfile {
    /// Create a stand-in for `role`
    #[must_use]
    pub fn new(role: DeviceRole, capabilities: Capabilities, seed: Option<u64>) -> Self {
        let rng = seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);

        Self {
            role,
            capabilities,
            seed,
            rng: Arc::new(Mutex::new(rng)),
        }
    }

    /// Role served
    #[must_use]
    pub const fn role(&self) -> DeviceRole {
        self.role
    }

    /// Seed the generator was built from
    #[must_use]
    pub const fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Capture/playback parameters reported to channels
    #[must_use]
    pub const fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Marker used in place of a hardware address
    #[must_use]
    pub fn address(&self) -> String {
        format!("simulated:{}", self.role)
    }

    /// Draw an index below `len`, `None` when `len` is zero
    #[must_use]
    pub fn pick(&self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        self.rng.lock().ok().map(|mut rng| rng.gen_range(0..len))
    }

    /// Fill `buf` with generator output
    pub fn fill(&self, buf: &mut [u8]) {
        if let Ok(mut rng) = self.rng.lock() {
            rng.fill(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_profiles_replay() {
        let a = SimulatedProfile::new(DeviceRole::Microphone, Capabilities::audio(16000), Some(7));
        let b = SimulatedProfile::new(DeviceRole::Microphone, Capabilities::audio(16000), Some(7));

        let seq_a: Vec<_> = (0..16).map(|_| a.pick(100)).collect();
        let seq_b: Vec<_> = (0..16).map(|_| b.pick(100)).collect();
        assert_eq!(seq_a, seq_b);
    }

    #[test]
    fn clones_share_generator() {
        let a = SimulatedProfile::new(DeviceRole::Camera, Capabilities::video(640, 480), Some(1));
        let fresh = SimulatedProfile::new(DeviceRole::Camera, Capabilities::video(640, 480), Some(1));
        let b = a.clone();

        let first = a.pick(1000);
        let second = b.pick(1000);
        assert_eq!(first, fresh.pick(1000));
        assert_eq!(second, fresh.pick(1000));
    }

    #[test]
    fn pick_from_empty_is_none() {
        let p = SimulatedProfile::new(DeviceRole::Speaker, Capabilities::audio(24000), None);
        assert_eq!(p.pick(0), None);
        assert_eq!(p.address(), "simulated:speaker");
    }
}
