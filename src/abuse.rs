//! Admission filter for automated submissions.
//!
//! Four independent checks run in order (honeypot, fill time, rate limit,
//! content heuristics). A rejection never reaches the submitter as an
//! error; see `handlers::silent_abuse_acknowledgement`.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::validation::LeadDraft;

/// Hidden form field a human never fills.
pub const HONEYPOT_FIELD: &str = "_company";
/// Client-side render timestamp (ms since epoch).
pub const RENDERED_AT_FIELD: &str = "_rendered";
/// How often expired rate-limit buckets are dropped.
pub const PRUNE_INTERVAL: Duration = Duration::from_secs(5 * 60);

const MAX_MESSAGE_CHARS: usize = 2000;
const REPEATED_RUN: usize = 8;

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)https?://|www\.").expect("valid url regex"));
static MARKUP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<[^>]+>|\[url|\{.*\}").expect("valid markup regex"));
static DIGITS_IN_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[0-9]{3,}").expect("valid digits regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbuseSettings {
    pub window: Duration,
    pub max_per_window: u32,
    pub min_fill_ms: i64,
}

impl Default for AbuseSettings {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(15 * 60),
            max_per_window: 5,
            min_fill_ms: 3_000,
        }
    }
}

/// Why a submission was treated as automated. Logged, never returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    Honeypot,
    TooFast,
    RateLimited,
    UrlInField,
    MarkupInField,
    RepeatedChars,
    NumbersInName,
    GibberishName,
    IdenticalNames,
    MessageTooLong,
}

impl RejectionReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectionReason::Honeypot => "honeypot",
            RejectionReason::TooFast => "too_fast",
            RejectionReason::RateLimited => "rate_limited",
            RejectionReason::UrlInField => "url_in_field",
            RejectionReason::MarkupInField => "markup_in_field",
            RejectionReason::RepeatedChars => "repeated_chars",
            RejectionReason::NumbersInName => "numbers_in_name",
            RejectionReason::GibberishName => "gibberish_name",
            RejectionReason::IdenticalNames => "identical_names",
            RejectionReason::MessageTooLong => "message_too_long",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Fixed-window submission counter keyed by IP hash.
pub trait RateLimiter: Send + Sync {
    /// Counts one attempt for `key` and reports whether it is still allowed.
    fn check_and_increment(&self, key: &str) -> bool;

    /// Drops expired buckets, returning how many were removed.
    fn prune_expired(&self) -> usize;
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    count: u32,
    reset_at: Instant,
}

/// Process-local limiter. Buckets are lost on restart.
#[derive(Debug)]
pub struct InMemoryRateLimiter {
    window: Duration,
    max_per_window: u32,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl InMemoryRateLimiter {
    pub fn new(window: Duration, max_per_window: u32) -> Self {
        Self {
            window,
            max_per_window,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn check_and_increment_at(&self, key: &str, now: Instant) -> bool {
        // increment and compare under one lock
        let mut buckets = self.buckets.lock();
        match buckets.get_mut(key) {
            Some(bucket) if now <= bucket.reset_at => {
                bucket.count = bucket.count.saturating_add(1);
                bucket.count <= self.max_per_window
            }
            _ => {
                buckets.insert(
                    key.to_string(),
                    Bucket {
                        count: 1,
                        reset_at: now + self.window,
                    },
                );
                true
            }
        }
    }

    pub fn prune_expired_at(&self, now: Instant) -> usize {
        let mut buckets = self.buckets.lock();
        let before = buckets.len();
        buckets.retain(|_, bucket| now <= bucket.reset_at);
        before - buckets.len()
    }

    pub fn tracked_keys(&self) -> usize {
        self.buckets.lock().len()
    }
}

impl RateLimiter for InMemoryRateLimiter {
    fn check_and_increment(&self, key: &str) -> bool {
        self.check_and_increment_at(key, Instant::now())
    }

    fn prune_expired(&self) -> usize {
        self.prune_expired_at(Instant::now())
    }
}

/// Spawns the periodic bucket pruner.
pub fn spawn_pruner(
    limiter: Arc<dyn RateLimiter>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = limiter.prune_expired();
            if removed > 0 {
                tracing::debug!("Pruned {} expired rate-limit buckets", removed);
            }
        }
    })
}

pub fn is_honeypot_filled(raw: &Value) -> bool {
    raw.get(HONEYPOT_FIELD)
        .and_then(Value::as_str)
        .is_some_and(|v| !v.is_empty())
}

/// A missing or non-numeric render timestamp counts as too fast.
pub fn is_submitted_too_fast(raw: &Value, now_ms: i64, min_fill_ms: i64) -> bool {
    match raw.get(RENDERED_AT_FIELD).and_then(Value::as_f64) {
        Some(rendered) => (now_ms as f64) - rendered < min_fill_ms as f64,
        None => true,
    }
}

fn has_repeated_run(text: &str) -> bool {
    let mut previous = None;
    let mut run = 0;
    for c in text.chars() {
        if Some(c) == previous {
            run += 1;
        } else {
            previous = Some(c);
            run = 1;
        }
        if run >= REPEATED_RUN {
            return true;
        }
    }
    false
}

/// Consonant density above 85% with more than 8 consonants.
pub fn is_gibberish(text: &str) -> bool {
    let len = text.chars().count();
    if len < 2 {
        return false;
    }
    let consonants = text
        .chars()
        .filter(|c| "bcdfghjklmnpqrstvwxyz".contains(c.to_ascii_lowercase()))
        .count();
    consonants > 8 && consonants as f64 / len as f64 > 0.85
}

/// Content heuristics over the sanitized draft, first match wins.
pub fn check_content(draft: &LeadDraft) -> Option<RejectionReason> {
    let names = [draft.first_name.as_str(), draft.last_name.as_str()];
    let texts = [
        draft.first_name.as_str(),
        draft.last_name.as_str(),
        draft.city.as_str(),
        draft.message.as_deref().unwrap_or(""),
    ];

    if texts.iter().any(|t| URL_RE.is_match(t)) {
        return Some(RejectionReason::UrlInField);
    }
    if texts.iter().any(|t| MARKUP_RE.is_match(t)) {
        return Some(RejectionReason::MarkupInField);
    }
    if texts.iter().any(|t| has_repeated_run(t)) {
        return Some(RejectionReason::RepeatedChars);
    }
    if names.iter().any(|n| DIGITS_IN_NAME_RE.is_match(n)) {
        return Some(RejectionReason::NumbersInName);
    }
    if names.iter().any(|n| is_gibberish(n)) {
        return Some(RejectionReason::GibberishName);
    }
    if draft.first_name.chars().count() > 1
        && draft.first_name.to_lowercase() == draft.last_name.to_lowercase()
    {
        return Some(RejectionReason::IdenticalNames);
    }
    if draft.message_len > MAX_MESSAGE_CHARS {
        return Some(RejectionReason::MessageTooLong);
    }
    None
}

/// The composite admission gate.
pub struct AbuseGate {
    settings: AbuseSettings,
    limiter: Arc<dyn RateLimiter>,
}

impl AbuseGate {
    pub fn new(settings: AbuseSettings, limiter: Arc<dyn RateLimiter>) -> Self {
        Self { settings, limiter }
    }

    /// Gate with the default in-memory limiter built from `settings`.
    pub fn in_memory(settings: AbuseSettings) -> Self {
        let limiter = Arc::new(InMemoryRateLimiter::new(
            settings.window,
            settings.max_per_window,
        ));
        Self::new(settings, limiter)
    }

    pub fn limiter(&self) -> Arc<dyn RateLimiter> {
        Arc::clone(&self.limiter)
    }

    /// Checks that need only the raw payload: honeypot, fill time, rate limit.
    ///
    /// Every request that reaches the rate limit counts against its bucket.
    pub fn screen_request(
        &self,
        raw: &Value,
        ip_hash: &str,
        now_ms: i64,
    ) -> Result<(), RejectionReason> {
        if is_honeypot_filled(raw) {
            return Err(RejectionReason::Honeypot);
        }
        if is_submitted_too_fast(raw, now_ms, self.settings.min_fill_ms) {
            return Err(RejectionReason::TooFast);
        }
        if !self.limiter.check_and_increment(ip_hash) {
            return Err(RejectionReason::RateLimited);
        }
        Ok(())
    }

    pub fn screen_content(&self, draft: &LeadDraft) -> Result<(), RejectionReason> {
        match check_content(draft) {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::validate_submission;
    use serde_json::json;

    fn draft_with(first: &str, last: &str, city: &str, message: Option<&str>) -> LeadDraft {
        let mut body = json!({
            "first_name": first,
            "last_name": last,
            "phone": "0722123456",
            "email": "ana@example.ro",
            "female_age_exact": 30,
            "tried_ivf": "Yes",
            "budget_range": "under-10k",
            "city": city,
            "gdpr_consent": true,
            "consent_to_share": true,
            "urgency_level": "SOON_1_3"
        });
        if let Some(m) = message {
            body["message"] = json!(m);
        }
        validate_submission(&body).unwrap()
    }

    #[test]
    fn limiter_admits_cap_then_rejects_until_window_elapses() {
        let limiter = InMemoryRateLimiter::new(Duration::from_secs(900), 5);
        let start = Instant::now();
        for _ in 0..5 {
            assert!(limiter.check_and_increment_at("ip", start));
        }
        assert!(!limiter.check_and_increment_at("ip", start));
        assert!(limiter.check_and_increment_at("other", start));

        let later = start + Duration::from_secs(901);
        assert!(limiter.check_and_increment_at("ip", later));
    }

    #[test]
    fn concurrent_requests_on_one_key_admit_exactly_the_cap() {
        let limiter = InMemoryRateLimiter::new(Duration::from_secs(900), 5);
        let start = Instant::now();
        let admitted = std::sync::atomic::AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..32 {
                scope.spawn(|| {
                    for _ in 0..4 {
                        if limiter.check_and_increment_at("ip", start) {
                            admitted.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        }
                    }
                });
            }
        });
        assert_eq!(admitted.into_inner(), 5);
    }

    #[test]
    fn prune_drops_only_expired_buckets() {
        let limiter = InMemoryRateLimiter::new(Duration::from_secs(60), 5);
        let start = Instant::now();
        limiter.check_and_increment_at("old", start);
        limiter.check_and_increment_at("fresh", start + Duration::from_secs(50));
        assert_eq!(limiter.prune_expired_at(start + Duration::from_secs(61)), 1);
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[test]
    fn honeypot_and_timing() {
        assert!(is_honeypot_filled(&json!({"_company": "Acme"})));
        assert!(!is_honeypot_filled(&json!({"_company": ""})));
        assert!(!is_honeypot_filled(&json!({})));

        assert!(is_submitted_too_fast(&json!({}), 10_000, 3_000));
        assert!(is_submitted_too_fast(&json!({"_rendered": "9000"}), 10_000, 3_000));
        assert!(is_submitted_too_fast(&json!({"_rendered": 8_000}), 10_000, 3_000));
        assert!(!is_submitted_too_fast(&json!({"_rendered": 7_000}), 10_000, 3_000));
    }

    #[test]
    fn gate_checks_in_order() {
        let gate = AbuseGate::in_memory(AbuseSettings::default());
        let raw = json!({"_company": "x"});
        assert_eq!(
            gate.screen_request(&raw, "k", 10_000),
            Err(RejectionReason::Honeypot)
        );
        let raw = json!({"_rendered": 9_999});
        assert_eq!(
            gate.screen_request(&raw, "k", 10_000),
            Err(RejectionReason::TooFast)
        );
        let raw = json!({"_rendered": 1_000});
        assert_eq!(gate.screen_request(&raw, "k", 10_000), Ok(()));
    }

    #[test]
    fn content_heuristics() {
        let check = |first, last, city, msg| check_content(&draft_with(first, last, city, msg));
        assert_eq!(check("Ana", "Pop", "Cluj", None), None);
        assert_eq!(
            check("Ana", "Pop", "Cluj", Some("see www.spam.com")),
            Some(RejectionReason::UrlInField)
        );
        assert_eq!(
            check("Ana", "Pop", "<b>Cluj</b>", None),
            Some(RejectionReason::MarkupInField)
        );
        assert_eq!(
            check("Ana", "Pop", "Cluj", Some("helloooooooo")),
            Some(RejectionReason::RepeatedChars)
        );
        assert_eq!(
            check("Ana123", "Pop", "Cluj", None),
            Some(RejectionReason::NumbersInName)
        );
        assert_eq!(
            check("Bxfthrmklq", "Pop", "Cluj", None),
            Some(RejectionReason::GibberishName)
        );
        assert_eq!(
            check("Ana", "ANA", "Cluj", None),
            Some(RejectionReason::IdenticalNames)
        );
        let long = "Lorem ipsum dolor sit amet. ".repeat(80);
        assert_eq!(
            check("Ana", "Pop", "Cluj", Some(long.as_str())),
            Some(RejectionReason::MessageTooLong)
        );
    }

    #[test]
    fn diacritic_names_are_not_gibberish() {
        assert!(!is_gibberish("Ștefănescu"));
        assert!(!is_gibberish("X"));
    }
}
