use crate::config::PiiFilterConfig;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Mutex;

/// Placeholder map capacity; on overflow the whole map is cleared.
const MAX_MAPPINGS: usize = 1000;

struct PiiFilter {
    pattern: Regex,
    prefix: &'static str,
}

#[derive(Default)]
struct MappingState {
    /// placeholder → original occurrence
    forward: HashMap<String, String>,
    /// original occurrence → placeholder (idempotent reuse)
    reverse: HashMap<String, String>,
    counters: HashMap<&'static str, u64>,
}

/// Reversible PII redaction. Each enabled pattern replaces matches with
/// `[<PREFIX>_<n>]` placeholders; `restore` maps them back. Repeated
/// literals reuse their placeholder within and across calls, until the
/// capacity clear resets the numbering.
pub struct Sanitizer {
    filters: Vec<PiiFilter>,
    state: Mutex<MappingState>,
    enabled: bool,
}

impl Sanitizer {
    pub fn new(cfg: &PiiFilterConfig) -> Self {
        // Fixed scan order: email, phone, card, ip, ssn
        let candidates: [(&str, bool, &'static str); 5] = [
            (
                r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}",
                cfg.filter_emails,
                "EMAIL",
            ),
            (
                r"(?:\+?\d{1,3}[-.\s]?)?\(?\d{2,4}\)?[-.\s]?\d{3,4}[-.\s]?\d{3,4}",
                cfg.filter_phones,
                "PHONE",
            ),
            (
                r"\b\d{4}[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{4}\b",
                cfg.filter_cards,
                "CARD",
            ),
            (r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b", cfg.filter_ips, "IP"),
            (r"\b\d{3}-\d{2}-\d{4}\b", cfg.filter_ssn, "SSN"),
        ];

        let filters = candidates
            .into_iter()
            .filter(|(_, on, _)| *on)
            .map(|(pattern, _, prefix)| PiiFilter {
                pattern: Regex::new(pattern).expect("invalid PII pattern"),
                prefix,
            })
            .collect();

        Self {
            filters,
            state: Mutex::new(MappingState::default()),
            enabled: cfg.enabled,
        }
    }

    /// Replace PII occurrences with placeholders.
    pub fn sanitize(&self, text: &str) -> String {
        if !self.enabled || self.filters.is_empty() {
            return text.to_string();
        }

        let mut state = self.state.lock().expect("sanitizer lock poisoned");

        if state.forward.len() >= MAX_MAPPINGS {
            *state = MappingState::default();
        }

        let mut result = text.to_string();
        for filter in &self.filters {
            result = filter
                .pattern
                .replace_all(&result, |caps: &regex::Captures<'_>| {
                    let original = caps.get(0).map_or("", |m| m.as_str());
                    if let Some(existing) = state.reverse.get(original) {
                        return existing.clone();
                    }
                    let counter = state.counters.entry(filter.prefix).or_insert(0);
                    *counter += 1;
                    let placeholder = format!("[{}_{}]", filter.prefix, counter);
                    state
                        .forward
                        .insert(placeholder.clone(), original.to_string());
                    state
                        .reverse
                        .insert(original.to_string(), placeholder.clone());
                    placeholder
                })
                .into_owned();
        }
        result
    }

    /// Replace every known placeholder with its original occurrence.
    pub fn restore(&self, text: &str) -> String {
        if !self.enabled {
            return text.to_string();
        }

        let state = self.state.lock().expect("sanitizer lock poisoned");
        let mut result = text.to_string();
        for (placeholder, original) in &state.forward {
            result = result.replace(placeholder.as_str(), original);
        }
        result
    }

    /// Drop all stored mappings (e.g. between conversations).
    pub fn reset(&self) {
        *self.state.lock().expect("sanitizer lock poisoned") = MappingState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_on() -> PiiFilterConfig {
        PiiFilterConfig {
            enabled: true,
            filter_emails: true,
            filter_phones: true,
            filter_cards: true,
            filter_ips: true,
            filter_ssn: true,
        }
    }

    fn email_only() -> PiiFilterConfig {
        PiiFilterConfig {
            enabled: true,
            filter_emails: true,
            filter_phones: false,
            filter_cards: false,
            filter_ips: false,
            filter_ssn: false,
        }
    }

    #[test]
    fn redacts_email() {
        let sanitizer = Sanitizer::new(&email_only());
        let out = sanitizer.sanitize("email me at a@b.com please");
        assert_eq!(out, "email me at [EMAIL_1] please");
    }

    #[test]
    fn repeated_literal_reuses_placeholder() {
        let sanitizer = Sanitizer::new(&email_only());
        let out = sanitizer.sanitize("email me at a@b.com or a@b.com");
        assert_eq!(out, "email me at [EMAIL_1] or [EMAIL_1]");

        // and across calls
        let again = sanitizer.sanitize("again: a@b.com");
        assert_eq!(again, "again: [EMAIL_1]");
    }

    #[test]
    fn distinct_literals_get_distinct_placeholders() {
        let sanitizer = Sanitizer::new(&email_only());
        let out = sanitizer.sanitize("a@b.com and c@d.com");
        assert_eq!(out, "[EMAIL_1] and [EMAIL_2]");
    }

    #[test]
    fn restore_reverses_sanitize() {
        let sanitizer = Sanitizer::new(&all_on());
        let input = "reach me at a@b.com or 10.1.2.3, ssn 123-45-6789";
        let sanitized = sanitizer.sanitize(input);
        assert!(!sanitized.contains("a@b.com"));
        assert!(!sanitized.contains("10.1.2.3"));
        assert!(!sanitized.contains("123-45-6789"));
        assert_eq!(sanitizer.restore(&sanitized), input);
    }

    #[test]
    fn restore_handles_model_echoed_placeholders() {
        let sanitizer = Sanitizer::new(&email_only());
        sanitizer.sanitize("email me at a@b.com");
        let restored = sanitizer.restore("Okay, I will email [EMAIL_1] later.");
        assert_eq!(restored, "Okay, I will email a@b.com later.");
    }

    #[test]
    fn disabled_sanitizer_passes_through() {
        let mut cfg = all_on();
        cfg.enabled = false;
        let sanitizer = Sanitizer::new(&cfg);
        let input = "a@b.com";
        assert_eq!(sanitizer.sanitize(input), input);
    }

    #[test]
    fn card_numbers_are_redacted() {
        let sanitizer = Sanitizer::new(&all_on());
        let out = sanitizer.sanitize("card: 4111-1111-1111-1111");
        assert!(out.contains("[CARD_1]"), "{}", out);
    }

    #[test]
    fn capacity_overflow_clears_map() {
        let sanitizer = Sanitizer::new(&email_only());
        for i in 0..MAX_MAPPINGS {
            sanitizer.sanitize(&format!("user{}@example.com", i));
        }
        // The map is at capacity; the next call clears it and numbering
        // restarts.
        let out = sanitizer.sanitize("fresh@example.com");
        assert_eq!(out, "[EMAIL_1]");

        // Pre-clear placeholders can no longer be restored.
        let stale = sanitizer.restore("[EMAIL_500]");
        assert_eq!(stale, "[EMAIL_500]");
    }

    #[test]
    fn reset_clears_mappings() {
        let sanitizer = Sanitizer::new(&email_only());
        sanitizer.sanitize("a@b.com");
        sanitizer.reset();
        assert_eq!(sanitizer.restore("[EMAIL_1]"), "[EMAIL_1]");
        assert_eq!(sanitizer.sanitize("x@y.com"), "[EMAIL_1]");
    }
}
