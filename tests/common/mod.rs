//! Shared test utilities
//!
//! Stand-ins for the platform, device layer and remote services. Every
//! mock appends to a shared [`EventLog`] so tests can assert call order.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use robovoice::device::Endpoint;
use robovoice::motion::{RobotAction, RobotActions};
use robovoice::voice::{SimulatedSpeech, samples_to_wav};
use robovoice::{
    AudioChannel, CommandOutput, CommandRunner, ConversationBackend, DeviceMode, DeviceScanner,
    DeviceRegistry, DeviceRole, Error, FrameBuffer, RegistryConfig, Result, RetryPolicy,
    SpeechProvider, StopSignal, Transcriber, VisionDescriber,
};

/// Ordered record of calls across every mock
pub type EventLog = Arc<Mutex<Vec<String>>>;

#[must_use]
pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Snapshot of the log
#[must_use]
pub fn events(log: &EventLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Position of the first event starting with `prefix`
#[must_use]
pub fn position(log: &EventLog, prefix: &str) -> Option<usize> {
    events(log).iter().position(|e| e.starts_with(prefix))
}

fn record(log: &EventLog, event: String) {
    log.lock().unwrap().push(event);
}

/// Two quick attempts, no jitter
#[must_use]
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy::new(2, Duration::from_millis(1), 1.0, Duration::from_millis(1), false).unwrap()
}

/// Audio stderr that means the device is held elsewhere
pub const BUSY_STDERR: &str = "aplay: main:831: audio open error: Device or resource busy";

/// Runner that replays scripted outputs per program
#[derive(Default)]
pub struct ScriptedRunner {
    queued: Mutex<HashMap<String, VecDeque<CommandOutput>>>,
    fallback: Mutex<HashMap<String, CommandOutput>>,
    calls: Mutex<Vec<(String, Vec<String>)>>,
    missing: Mutex<HashSet<String>>,
    log: Option<EventLog>,
}

impl ScriptedRunner {
    #[must_use]
    pub fn new(log: &EventLog) -> Self {
        Self {
            log: Some(log.clone()),
            ..Self::default()
        }
    }

    /// Queue one output for the next run of `program`
    pub fn push(&self, program: &str, output: CommandOutput) {
        self.queued
            .lock()
            .unwrap()
            .entry(program.to_string())
            .or_default()
            .push_back(output);
    }

    /// Output for `program` once its queue is empty
    pub fn always(&self, program: &str, output: CommandOutput) {
        self.fallback
            .lock()
            .unwrap()
            .insert(program.to_string(), output);
    }

    /// Report `program` as not installed
    pub fn uninstall(&self, program: &str) {
        self.missing.lock().unwrap().insert(program.to_string());
    }

    /// How often `program` ran
    #[must_use]
    pub fn calls_to(&self, program: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == program)
            .count()
    }

    /// Arguments of every run of `program`
    #[must_use]
    pub fn args_for(&self, program: &str) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == program)
            .map(|(_, a)| a.clone())
            .collect()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        self.calls
            .lock()
            .unwrap()
            .push((program.to_string(), args.to_vec()));
        if let Some(log) = &self.log {
            record(log, format!("run {program}"));
        }

        let queued = self
            .queued
            .lock()
            .unwrap()
            .get_mut(program)
            .and_then(VecDeque::pop_front);
        Ok(queued
            .or_else(|| self.fallback.lock().unwrap().get(program).cloned())
            .unwrap_or_else(|| CommandOutput::ok(Vec::new())))
    }

    fn is_available(&self, program: &str) -> bool {
        !self.missing.lock().unwrap().contains(program)
    }
}

/// Device layer with fixed endpoints per role
pub struct MockScanner {
    endpoints: HashMap<DeviceRole, Vec<Endpoint>>,
    held: Mutex<HashSet<String>>,
    broken_holder_check: AtomicBool,
    holder_checks: AtomicUsize,
    releases: AtomicUsize,
    log: EventLog,
}

impl MockScanner {
    #[must_use]
    pub fn new(log: &EventLog) -> Self {
        Self {
            endpoints: HashMap::new(),
            held: Mutex::new(HashSet::new()),
            broken_holder_check: AtomicBool::new(false),
            holder_checks: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            log: log.clone(),
        }
    }

    /// Report an endpoint for `role`
    #[must_use]
    pub fn with_endpoint(mut self, role: DeviceRole, address: &str, name: &str) -> Self {
        self.endpoints.entry(role).or_default().push(Endpoint {
            address: address.to_string(),
            node: format!("/dev/mock/{}", address.replace([':', ','], "_")),
            name: name.to_string(),
        });
        self
    }

    /// Mark `address` as held by another process
    pub fn hold(&self, address: &str) {
        self.held.lock().unwrap().insert(address.to_string());
    }

    /// Let go of `address`
    pub fn free(&self, address: &str) {
        self.held.lock().unwrap().remove(address);
    }

    /// Make every holder check fail as if `fuser` were missing
    pub fn break_holder_check(&self) {
        self.broken_holder_check.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn holder_checks(&self) -> usize {
        self.holder_checks.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceScanner for MockScanner {
    async fn enumerate(&self, role: DeviceRole) -> Result<Vec<Endpoint>> {
        record(&self.log, format!("enumerate {role}"));
        Ok(self.endpoints.get(&role).cloned().unwrap_or_default())
    }

    async fn is_held(&self, endpoint: &Endpoint) -> Result<bool> {
        self.holder_checks.fetch_add(1, Ordering::SeqCst);
        if self.broken_holder_check.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "fuser: command not found",
            )));
        }
        Ok(self.held.lock().unwrap().contains(&endpoint.address))
    }

    async fn release(&self, endpoint: &Endpoint) -> Result<()> {
        record(&self.log, format!("release {}", endpoint.address));
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Transcriber that always hears the same thing
pub struct FixedTranscriber(pub String);

#[async_trait]
impl Transcriber for FixedTranscriber {
    async fn transcribe(&self, _wav: &[u8]) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Speech provider that either always fails or returns a short tone
pub struct MockSpeech {
    name: String,
    fails: bool,
    voices: Vec<String>,
    calls: AtomicUsize,
    log: EventLog,
}

impl MockSpeech {
    #[must_use]
    pub fn working(name: &str, log: &EventLog) -> Self {
        Self::build(name, false, log)
    }

    #[must_use]
    pub fn failing(name: &str, log: &EventLog) -> Self {
        Self::build(name, true, log)
    }

    fn build(name: &str, fails: bool, log: &EventLog) -> Self {
        Self {
            name: name.to_string(),
            fails,
            voices: vec!["alloy".to_string(), "nova".to_string()],
            calls: AtomicUsize::new(0),
            log: log.clone(),
        }
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechProvider for MockSpeech {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_voice(&self, voice: &str) -> bool {
        self.voices.iter().any(|v| v == voice)
    }

    async fn synthesize(&self, text: &str, voice: &str, _rate: f32) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        record(&self.log, format!("synthesize {} {voice}: {text}", self.name));
        if self.fails {
            return Err(Error::SynthesisFailed(format!("{} is down", self.name)));
        }
        samples_to_wav(&[0.0; 1600], 16_000)
    }
}

/// Conversation backend that records turns
pub struct MockBackend {
    fails: bool,
    remembered: Mutex<Vec<(String, String)>>,
    stop_during_reply: Mutex<Option<StopSignal>>,
    log: EventLog,
}

impl MockBackend {
    #[must_use]
    pub fn new(log: &EventLog) -> Self {
        Self {
            fails: false,
            remembered: Mutex::new(Vec::new()),
            stop_during_reply: Mutex::new(None),
            log: log.clone(),
        }
    }

    #[must_use]
    pub fn failing(log: &EventLog) -> Self {
        Self {
            fails: true,
            ..Self::new(log)
        }
    }

    #[must_use]
    pub fn remembered(&self) -> Vec<(String, String)> {
        self.remembered.lock().unwrap().clone()
    }

    /// Request `signal` while the next reply is being produced
    pub fn stop_during_reply(&self, signal: StopSignal) {
        *self.stop_during_reply.lock().unwrap() = Some(signal);
    }
}

#[async_trait]
impl ConversationBackend for MockBackend {
    async fn reply(&self, text: &str) -> Result<String> {
        record(&self.log, format!("reply {text}"));
        if let Some(signal) = self.stop_during_reply.lock().unwrap().take() {
            signal.request();
        }
        if self.fails {
            return Err(Error::PermissionDenied(
                "openai chat returned 401: invalid api key".to_string(),
            ));
        }
        Ok(format!("You said {text}"))
    }

    fn remember(&self, user: &str, assistant: &str) {
        record(&self.log, format!("remember {user}"));
        self.remembered
            .lock()
            .unwrap()
            .push((user.to_string(), assistant.to_string()));
    }

    fn reset(&self) {
        record(&self.log, "reset".to_string());
        self.remembered.lock().unwrap().clear();
    }
}

/// Describer that sees a red cup
pub struct MockDescriber {
    log: EventLog,
}

impl MockDescriber {
    #[must_use]
    pub fn new(log: &EventLog) -> Self {
        Self { log: log.clone() }
    }
}

#[async_trait]
impl VisionDescriber for MockDescriber {
    async fn describe(&self, frame: &FrameBuffer, prompt: &str) -> Result<String> {
        record(
            &self.log,
            format!("describe {} {} bytes: {prompt}", frame.device, frame.data.len()),
        );
        Ok("I see a red cup on the table.".to_string())
    }
}

/// Robot body that records actions, or refuses them when disconnected
pub struct MockActions {
    connected: bool,
    performed: Mutex<Vec<RobotAction>>,
    timeout_checks: AtomicUsize,
    log: EventLog,
}

impl MockActions {
    #[must_use]
    pub fn new(log: &EventLog) -> Self {
        Self {
            connected: true,
            performed: Mutex::new(Vec::new()),
            timeout_checks: AtomicUsize::new(0),
            log: log.clone(),
        }
    }

    #[must_use]
    pub fn disconnected(log: &EventLog) -> Self {
        Self {
            connected: false,
            ..Self::new(log)
        }
    }

    #[must_use]
    pub fn performed(&self) -> Vec<RobotAction> {
        self.performed.lock().unwrap().clone()
    }

    #[must_use]
    pub fn timeout_checks(&self) -> usize {
        self.timeout_checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RobotActions for MockActions {
    fn name(&self) -> &str {
        "mock"
    }

    async fn perform(&self, action: RobotAction) -> Result<()> {
        record(&self.log, format!("action {action}"));
        if !self.connected {
            return Err(Error::MotionUnavailable("rostopic is not installed".to_string()));
        }
        self.performed.lock().unwrap().push(action);
        Ok(())
    }

    async fn check_timeouts(&self) -> Result<()> {
        self.timeout_checks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Registry over `scanner` with a fixed seed and fast policies
#[must_use]
pub fn registry(mode: DeviceMode, scanner: Arc<MockScanner>) -> Arc<DeviceRegistry> {
    let config = RegistryConfig {
        mode,
        seed: Some(42),
        scan_policy: fast_policy(),
        ..RegistryConfig::default()
    };
    Arc::new(DeviceRegistry::new(config, scanner))
}

/// Audio channel with fast policies
#[must_use]
pub fn audio_channel(
    registry: Arc<DeviceRegistry>,
    runner: Arc<ScriptedRunner>,
    speech: SimulatedSpeech,
) -> Arc<AudioChannel> {
    Arc::new(AudioChannel::new(
        registry,
        runner,
        Arc::new(FixedTranscriber("hello robot".to_string())),
        speech,
        fast_policy(),
        fast_policy(),
    ))
}
