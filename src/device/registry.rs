//! Device registry: resolves each role to a hardware or simulated profile

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Deserialize;

use super::scan::Endpoint;
use super::{ActiveProfile, Capabilities, DeviceProfile, DeviceRole, Liveness, SimulatedProfile};
use crate::resilience::{ResilientExecutor, RetryPolicy};
use crate::{Error, Result};

/// Platform device layer consulted by the registry
#[async_trait]
pub trait DeviceScanner: Send + Sync {
    /// Endpoints the OS reports for `role`
    ///
    /// # Errors
    ///
    /// Returns error if enumeration tooling fails to run
    async fn enumerate(&self, role: DeviceRole) -> Result<Vec<Endpoint>>;

    /// Whether another process currently holds `endpoint`
    ///
    /// # Errors
    ///
    /// Returns error if the check cannot be performed
    async fn is_held(&self, endpoint: &Endpoint) -> Result<bool>;

    /// Terminate whatever holds `endpoint`
    ///
    /// # Errors
    ///
    /// Returns error if the release command cannot be run
    async fn release(&self, endpoint: &Endpoint) -> Result<()>;
}

/// How hardware and simulation are mixed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceMode {
    /// Scan hardware, substitute simulation when nothing usable is found
    #[default]
    Auto,
    /// Skip scanning, simulate every role
    Simulated,
    /// Scan hardware, fail with `DeviceUnavailable` when nothing is found
    Hardware,
}

/// Registry settings
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Hardware/simulation mix
    pub mode: DeviceMode,
    /// Address pattern per role; empty means "first endpoint"
    pub patterns: HashMap<DeviceRole, String>,
    /// Audio sample rate reported in profiles
    pub sample_rate: u32,
    /// Playback sample rate reported in speaker profiles
    pub playback_rate: u32,
    /// Camera resolution reported in profiles
    pub resolution: (u32, u32),
    /// Seed for simulated profiles; `None` is non-deterministic
    pub seed: Option<u64>,
    /// Policy for enumeration and holder checks
    pub scan_policy: RetryPolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            mode: DeviceMode::Auto,
            patterns: HashMap::new(),
            sample_rate: 16_000,
            playback_rate: 24_000,
            resolution: (640, 480),
            seed: None,
            scan_policy: RetryPolicy::default(),
        }
    }
}

impl RegistryConfig {
    fn capabilities(&self, role: DeviceRole) -> Capabilities {
        match role {
            DeviceRole::Microphone => Capabilities::audio(self.sample_rate),
            DeviceRole::Speaker => Capabilities::audio(self.playback_rate),
            DeviceRole::Camera => Capabilities::video(self.resolution.0, self.resolution.1),
        }
    }

    fn pattern(&self, role: DeviceRole) -> &str {
        self.patterns.get(&role).map_or("", String::as_str)
    }
}

/// Outcome of scanning one role
enum ScanOutcome {
    Found(DeviceProfile),
    AllBusy(String),
    Missing(String),
}

/// Owns the active profile for every role
pub struct DeviceRegistry {
    config: RegistryConfig,
    scanner: Arc<dyn DeviceScanner>,
    executor: ResilientExecutor,
    profiles: Mutex<HashMap<DeviceRole, ActiveProfile>>,
    generation: Mutex<u64>,
}

impl DeviceRegistry {
    /// Create a registry; nothing is scanned until a role is resolved
    #[must_use]
    pub fn new(config: RegistryConfig, scanner: Arc<dyn DeviceScanner>) -> Self {
        Self {
            config,
            scanner,
            executor: ResilientExecutor::new(),
            profiles: Mutex::new(HashMap::new()),
            generation: Mutex::new(0),
        }
    }

    /// Configured hardware/simulation mix
    #[must_use]
    pub const fn mode(&self) -> DeviceMode {
        self.config.mode
    }

    /// Profile currently bound to `role`, resolving on first use
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` only in hardware mode when no matching
    /// endpoint exists, or `DeviceBusy` when every match is held
    pub async fn resolve(&self, role: DeviceRole) -> Result<ActiveProfile> {
        if let Some(profile) = self.current(role) {
            return Ok(profile);
        }

        let profile = self.scan_role(role).await?;
        tracing::info!(profile = %profile, "device resolved");

        if let Ok(mut profiles) = self.profiles.lock() {
            profiles.insert(role, profile.clone());
        }
        Ok(profile)
    }

    /// Drop the bound profile and resolve again
    ///
    /// # Errors
    ///
    /// Same as [`DeviceRegistry::resolve`]
    pub async fn rescan(&self, role: DeviceRole) -> Result<ActiveProfile> {
        tracing::info!(%role, "rescanning device");
        self.invalidate(role);
        self.resolve(role).await
    }

    /// Forget the bound profile so the next resolve scans again
    pub fn invalidate(&self, role: DeviceRole) {
        if let Ok(mut profiles) = self.profiles.lock() {
            profiles.remove(&role);
        }
    }

    /// Profile bound to `role` without scanning
    #[must_use]
    pub fn current(&self, role: DeviceRole) -> Option<ActiveProfile> {
        self.profiles
            .lock()
            .ok()
            .and_then(|profiles| profiles.get(&role).cloned())
    }

    /// Terminate whatever holds the hardware behind `profile`
    ///
    /// # Errors
    ///
    /// Returns error if the release command fails to run
    pub async fn release(&self, profile: &DeviceProfile) -> Result<()> {
        let endpoint = Endpoint {
            address: profile.address.clone(),
            node: profile.node.clone(),
            name: profile.name.clone(),
        };
        self.executor
            .run("release device", &RetryPolicy::once(), || self.scanner.release(&endpoint))
            .await
    }

    async fn scan_role(&self, role: DeviceRole) -> Result<ActiveProfile> {
        if self.config.mode == DeviceMode::Simulated {
            return Ok(ActiveProfile::Simulated(self.simulated(role)));
        }

        let outcome = match self.find_hardware(role).await {
            Ok(outcome) => outcome,
            Err(e) => ScanOutcome::Missing(format!("scan failed: {e}")),
        };

        match (outcome, self.config.mode) {
            (ScanOutcome::Found(profile), _) => Ok(ActiveProfile::Hardware(profile)),
            (ScanOutcome::AllBusy(detail), DeviceMode::Hardware) => {
                Err(Error::DeviceBusy { role, detail })
            }
            (ScanOutcome::Missing(reason), DeviceMode::Hardware) => {
                Err(Error::DeviceUnavailable { role, reason })
            }
            (ScanOutcome::AllBusy(reason) | ScanOutcome::Missing(reason), _) => {
                tracing::warn!(%role, reason, "no usable hardware, substituting simulation");
                Ok(ActiveProfile::Simulated(self.simulated(role)))
            }
        }
    }

    async fn find_hardware(&self, role: DeviceRole) -> Result<ScanOutcome> {
        let policy = &self.config.scan_policy;
        let label = format!("enumerate {role}");
        let endpoints = self
            .executor
            .run(&label, policy, || self.scanner.enumerate(role))
            .await?;

        let pattern = self.config.pattern(role);
        let candidates: Vec<&Endpoint> = endpoints.iter().filter(|e| e.matches(pattern)).collect();

        tracing::debug!(
            %role,
            pattern,
            found = endpoints.len(),
            matching = candidates.len(),
            "enumerated endpoints"
        );

        if candidates.is_empty() {
            let reason = if endpoints.is_empty() {
                "no endpoints reported".to_string()
            } else {
                format!("no endpoint matches {pattern:?}")
            };
            return Ok(ScanOutcome::Missing(reason));
        }

        let mut busy = Vec::new();
        for endpoint in candidates {
            let held = match self
                .executor
                .run("holder check", policy, || self.scanner.is_held(endpoint))
                .await
            {
                Ok(held) => held,
                Err(e) => {
                    tracing::debug!(
                        %role,
                        address = %endpoint.address,
                        error = %e,
                        "holder check failed, assuming free"
                    );
                    false
                }
            };

            if held {
                tracing::debug!(%role, address = %endpoint.address, "endpoint held by another process");
                busy.push(endpoint.address.clone());
                continue;
            }

            return Ok(ScanOutcome::Found(DeviceProfile {
                role,
                address: endpoint.address.clone(),
                node: endpoint.node.clone(),
                name: endpoint.name.clone(),
                capabilities: self.config.capabilities(role),
                liveness: Liveness::Available,
            }));
        }

        Ok(ScanOutcome::AllBusy(format!("held by another process: {}", busy.join(", "))))
    }

    fn simulated(&self, role: DeviceRole) -> SimulatedProfile {
        // Every substitution gets its own stream, still reproducible from the seed
        let generation = self
            .generation
            .lock()
            .map(|mut g| {
                *g += 1;
                *g
            })
            .unwrap_or(0);

        let seed = self.config.seed.map(|seed| {
            seed.wrapping_add(role_salt(role))
                .wrapping_add(generation.wrapping_mul(0x9E37_79B9_7F4A_7C15))
        });

        SimulatedProfile::new(role, self.config.capabilities(role), seed)
    }
}

const fn role_salt(role: DeviceRole) -> u64 {
    match role {
        DeviceRole::Microphone => 0x6D69_6300,
        DeviceRole::Speaker => 0x7370_6B00,
        DeviceRole::Camera => 0x6361_6D00,
    }
}
