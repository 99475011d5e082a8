//! Voice processing module
//!
//! Utterance capture and playback, transcription, intent classification,
//! and speech synthesis with provider fallback.

mod audio;
mod intent;
mod stt;
mod tts;
mod wav;

pub use audio::{AudioChannel, SimulatedSpeech, SpokenAudio, Utterance, UtteranceOrigin};
pub use intent::{ControlCommand, GateState, Intent, IntentGate, PhraseTable};
pub use stt::{Transcriber, WhisperTranscriber};
pub use tts::{EspeakSpeech, OPENAI_VOICES, OpenAiSpeech, SpeechProvider, SpeechSynthesizer};
pub use wav::{DecodedAudio, decode_mp3, mp3_to_wav, samples_to_wav, wav_duration_secs};
