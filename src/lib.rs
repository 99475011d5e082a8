//! Robovoice - conversational front end for a small robot
//!
//! This library provides the pieces of a spoken assistant that runs on
//! whatever hardware it finds:
//! - Device discovery with simulated stand-ins (microphone, speaker, camera)
//! - Retry with backoff around every hardware and network call
//! - Speech capture, transcription, synthesis with a fallback chain
//! - Wake-word gating and intent classification
//! - Robot body actions over ROS topics, or simulated
//! - The sequential capture, classify, dispatch, speak loop
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              ConversationController                  │
//! │   IntentGate  │  SessionState  │  ErrorTranslator    │
//! └────────┬───────────────┬───────────────┬────────────┘
//!          │               │               │
//! ┌────────▼──────┐ ┌──────▼───────┐ ┌─────▼───────────┐
//! │ AudioChannel  │ │ VisionChannel│ │ SpeechSynthesizer│
//! │ STT           │ │ describe     │ │ OpenAI → espeak  │
//! └────────┬──────┘ └──────┬───────┘ └─────┬───────────┘
//!          │               │     RobotActions (rostopic | simulated)
//!          │               │               │
//! ┌────────▼───────────────▼───────────────▼────────────┐
//! │   DeviceRegistry (hardware | simulated)              │
//! │   ResilientExecutor (retry, backoff, timeout)        │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod backend;
pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod feedback;
pub mod motion;
pub mod platform;
pub mod resilience;
pub mod session;
pub mod vision;
pub mod voice;

pub use backend::{ChatMessage, ConversationBackend, History, OpenAiChat};
pub use config::{Config, LoadOptions};
pub use controller::{
    ControllerOptions, ControllerParts, ConversationController, StepOutcome, StopSignal,
};
pub use device::{
    ActiveProfile, DeviceMode, DeviceProfile, DeviceRegistry, DeviceRole, DeviceScanner,
    RegistryConfig, SystemScanner,
};
pub use error::{Error, Result};
pub use feedback::{ErrorContext, ErrorTranslator};
pub use motion::{MotionMode, RobotAction, RobotActions, RosTopicActions, SimulatedActions};
pub use platform::{CommandOutput, CommandRunner, SystemRunner};
pub use resilience::{ResilientExecutor, RetryPolicy};
pub use session::{SessionState, Subsystem};
pub use vision::{FrameBuffer, OpenAiVision, VisionChannel, VisionDescriber};
pub use voice::{
    AudioChannel, Intent, IntentGate, SpeechProvider, SpeechSynthesizer, Transcriber, Utterance,
};
