//! Spoken explanations for technical failures
//!
//! Failure text is matched against ordered regex rules for the context the
//! failure happened in, then against the general rules, then a generic
//! sentence. Results are cached per context and normalized message.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{LazyLock, Mutex};

use lru::LruCache;
use regex::Regex;

/// Distinct failure texts remembered per translator
pub const CACHE_CAPACITY: usize = 64;

/// Said when no rule matches
pub const GENERIC_EXPLANATION: &str =
    "I ran into a technical problem and couldn't finish that.";

/// Where a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorContext {
    General,
    Camera,
    Microphone,
    Speaker,
    Network,
    Api,
    Vision,
    Speech,
    Motion,
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::General => "general",
            Self::Camera => "camera",
            Self::Microphone => "microphone",
            Self::Speaker => "speaker",
            Self::Network => "network",
            Self::Api => "api",
            Self::Vision => "vision",
            Self::Speech => "speech",
            Self::Motion => "motion",
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Severity {
    Info,
    Warning,
    Error,
}

struct Rule {
    pattern: Regex,
    explanation: &'static str,
    severity: Severity,
}

fn rules(table: &[(&str, &'static str, Severity)]) -> Vec<Rule> {
    table
        .iter()
        .map(|&(pattern, explanation, severity)| Rule {
            pattern: Regex::new(pattern).expect("valid regex"),
            explanation,
            severity,
        })
        .collect()
}

static RULES: LazyLock<HashMap<ErrorContext, Vec<Rule>>> = LazyLock::new(|| {
    use Severity::{Error, Info, Warning};

    HashMap::from([
        (
            ErrorContext::General,
            rules(&[
                (r"permission denied|access denied", "I'm not allowed to use something I need. A file or device may need different permissions.", Error),
                (r"not found|not installed|no such file|no such device", "Something I need is missing. A file, device or program couldn't be found.", Error),
                (r"timed? ?out|timeout", "That took too long, so I gave up. Something may be slow or not responding.", Warning),
                (r"out of memory|allocation failed", "I'm running low on memory.", Error),
                (r"disk.*full|no space", "The storage is full.", Error),
                (r"invalid|illegal|bad argument", "I got an input I couldn't work with.", Warning),
                (r"unsupported|not supported", "That isn't supported on this system.", Warning),
                (r"busy", "A device I need is being used by another program.", Warning),
            ]),
        ),
        (
            ErrorContext::Camera,
            rules(&[
                (r"camera.*?(not|cannot|unavailable).*|can't open camera", "I can't reach the camera. It may be unplugged or used by another program.", Error),
                (r"video device.*?busy|camera.*?busy", "Another program is using the camera right now.", Warning),
                (r"(no|cannot|empty).*?frame|failed to capture", "I couldn't take a picture. The camera may be disconnected.", Error),
                (r"v4l2|video4linux", "The camera driver is having trouble.", Warning),
                (r"ffmpeg", "The camera capture tool failed.", Error),
            ]),
        ),
        (
            ErrorContext::Microphone,
            rules(&[
                (r"microphone.*?(not|cannot|unavailable)", "I can't reach the microphone. It may be unplugged or used by another program.", Error),
                (r"microphone.*?busy|audio device.*?busy", "Another program is using the microphone right now.", Warning),
                (r"no .*?input devices|no.*?audio.*?input", "I can't find a microphone.", Error),
                (r"alsa|pulse|audio subsystem", "The audio system is having trouble.", Warning),
                (r"sample rate|audio format", "The microphone doesn't support the audio format I asked for.", Warning),
                (r"arecord|recording", "Recording from the microphone failed.", Error),
                (r"whisper|transcri", "I had trouble understanding what was said.", Warning),
                (r"too (quiet|silent)|no audio detected", "I couldn't hear anything. Please speak up.", Info),
            ]),
        ),
        (
            ErrorContext::Speaker,
            rules(&[
                (r"speaker.*?(not|cannot|unavailable)", "I can't reach the speaker.", Error),
                (r"speaker.*?busy", "Another program is using the speaker.", Warning),
                (r"playback|failed to play|aplay", "I couldn't play sound through the speaker.", Error),
            ]),
        ),
        (
            ErrorContext::Network,
            rules(&[
                (r"connection (refused|failed|error|reset|timed? ?out)|error sending request", "I couldn't connect to the network service.", Error),
                (r"network (unreachable|unavailable)", "The network is unreachable. Please check the internet connection.", Error),
                (r"dns|name resolution|resolve host", "I couldn't look up the server's address.", Warning),
                (r"ssl|certificate|tls", "There's a problem with the secure connection.", Warning),
            ]),
        ),
        (
            ErrorContext::Api,
            rules(&[
                (r"api key|authentication|unauthorized|permission denied|401|403", "My access key for the online service was rejected.", Error),
                (r"rate limit|too many requests|429", "I'm talking to the online service too often. Let's wait a moment.", Warning),
                (r"quota|usage limit|insufficient_quota", "The online service quota has run out.", Error),
                (r"invalid request|bad request|400", "The online service didn't accept my request.", Warning),
                (r"parse|deserializ|decod|no content", "I couldn't understand the online service's answer.", Warning),
                (r"50[0-9]|server error|backend call failed", "The online service is having problems right now.", Error),
            ]),
        ),
        (
            ErrorContext::Vision,
            rules(&[
                (r"rate limit|429", "I'm looking at things too often. Give me a moment.", Warning),
                (r"vision|image|frame", "I had trouble understanding the picture.", Warning),
            ]),
        ),
        (
            ErrorContext::Motion,
            rules(&[
                (r"motion unavailable|rostopic", "I'm not connected to my movement system.", Error),
                (r"master|roscore|unable to communicate", "My movement controller isn't running.", Error),
            ]),
        ),
        (
            ErrorContext::Speech,
            rules(&[
                (r"espeak", "My backup voice isn't working.", Error),
                (r"tts|synthesis|speech", "I had trouble turning my answer into speech.", Error),
            ]),
        ),
    ])
});

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
static PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(error|warning|fatal|exception|critical):\s*").expect("valid regex")
});
static BRACKETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\d{4}-\d{2}-\d{2}[^\]]*\]|\[\w+\]").expect("valid regex"));
static FILE_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(/[\w.-]+)+/[\w-]+\.\w+").expect("valid regex"));
static LINE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"line \d+").expect("valid regex"));

/// Normalize failure text for matching and caching
#[must_use]
pub fn normalize_message(message: &str) -> String {
    let lower = message.to_lowercase();
    let collapsed = WHITESPACE.replace_all(&lower, " ");
    let unprefixed = PREFIX.replace(collapsed.trim(), "");
    let unbracketed = BRACKETED.replace_all(&unprefixed, "");
    let no_paths = FILE_PATH.replace_all(&unbracketed, "FILE");
    LINE_NUMBER.replace_all(&no_paths, "LINE").trim().to_string()
}

/// Turns technical failure text into something worth saying out loud
#[derive(Debug)]
pub struct ErrorTranslator {
    cache: Mutex<LruCache<(ErrorContext, String), &'static str>>,
}

impl Default for ErrorTranslator {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorTranslator {
    #[must_use]
    pub fn new() -> Self {
        let capacity = NonZeroUsize::new(CACHE_CAPACITY).expect("capacity is non-zero");
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Explain `message` from `context`
    #[must_use]
    pub fn translate(&self, message: &str, context: ErrorContext) -> &'static str {
        let normalized = normalize_message(message);
        if normalized.is_empty() {
            return GENERIC_EXPLANATION;
        }

        let key = (context, normalized);
        if let Some(hit) = self.cache.lock().ok().and_then(|mut c| c.get(&key).copied()) {
            return hit;
        }

        let explanation = lookup(context, &key.1)
            .or_else(|| match context {
                ErrorContext::General => None,
                _ => lookup(ErrorContext::General, &key.1),
            })
            .unwrap_or(GENERIC_EXPLANATION);

        if let Ok(mut cache) = self.cache.lock() {
            cache.put(key, explanation);
        }
        explanation
    }

    /// Explain an error from `context`
    #[must_use]
    pub fn explain(&self, error: &crate::Error, context: ErrorContext) -> &'static str {
        self.translate(&error.to_string(), context)
    }

    /// Number of cached translations
    #[must_use]
    pub fn cached(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }
}

fn lookup(context: ErrorContext, normalized: &str) -> Option<&'static str> {
    let rule = RULES
        .get(&context)?
        .iter()
        .find(|rule| rule.pattern.is_match(normalized))?;

    match rule.severity {
        Severity::Info => tracing::debug!(%context, pattern = %rule.pattern, "translated failure"),
        Severity::Warning | Severity::Error => {
            tracing::info!(%context, pattern = %rule.pattern, severity = ?rule.severity, "translated failure");
        }
    }
    Some(rule.explanation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_noise() {
        assert_eq!(
            normalize_message("ERROR:   Failed  at /usr/lib/foo/bar.so line 42"),
            "failed at FILE LINE"
        );
        assert_eq!(normalize_message("[2024-01-01 10:00] [mic] busy"), "busy");
    }

    #[test]
    fn context_rule_wins_over_general() {
        let t = ErrorTranslator::new();
        let msg = t.translate("speaker busy: aplay: Device or resource busy", ErrorContext::Speaker);
        assert_eq!(msg, "Another program is using the speaker.");
    }

    #[test]
    fn falls_back_to_general_then_generic() {
        let t = ErrorTranslator::new();
        assert_eq!(
            t.translate("operation timed out", ErrorContext::Camera),
            "That took too long, so I gave up. Something may be slow or not responding."
        );
        assert_eq!(t.translate("flux capacitor drained", ErrorContext::Api), GENERIC_EXPLANATION);
        assert_eq!(t.translate("", ErrorContext::Api), GENERIC_EXPLANATION);
    }

    #[test]
    fn caches_per_context() {
        let t = ErrorTranslator::new();
        let _ = t.translate("rate limited: 429", ErrorContext::Api);
        let _ = t.translate("Rate   limited: 429", ErrorContext::Api);
        let _ = t.translate("rate limited: 429", ErrorContext::Vision);
        assert_eq!(t.cached(), 2);
    }

    #[test]
    fn cache_stays_bounded() {
        let t = ErrorTranslator::new();
        for attempt in 0..CACHE_CAPACITY * 3 {
            let message = format!("aplay exited with status {attempt}: device or resource busy");
            assert_eq!(
                t.translate(&message, ErrorContext::Speaker),
                t.translate(&message, ErrorContext::Speaker)
            );
        }
        assert_eq!(t.cached(), CACHE_CAPACITY);
    }

    #[test]
    fn explains_motion_failures() {
        let t = ErrorTranslator::new();
        let err = crate::Error::MotionUnavailable("rostopic is not installed".to_string());
        assert_eq!(
            t.explain(&err, ErrorContext::Motion),
            "I'm not connected to my movement system."
        );
    }

    #[test]
    fn explains_typed_errors() {
        let t = ErrorTranslator::new();
        let err = crate::Error::RateLimited("openai chat returned 429".to_string());
        assert_eq!(
            t.explain(&err, ErrorContext::Api),
            "I'm talking to the online service too often. Let's wait a moment."
        );
    }
}
