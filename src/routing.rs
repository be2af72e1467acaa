//! City-based routing of leads to a recipient address.
//!
//! Rules come from configuration as a JSON array of `{email, cities}`.
//! Matching is case- and diacritic-insensitive, so "bucuresti",
//! "BUCUREȘTI" and "Bucureşti" all match "București".

use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

const MEMO_CAPACITY: u64 = 1_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub email: String,
    pub cities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingResult {
    pub email: String,
    /// `city-match: {city} → {email}` or `default`.
    pub matched_rule: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RoutingConfigError {
    #[error("CLINIC_ROUTING_RULES is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("CLINIC_ROUTING_RULES must be a JSON array")]
    NotAnArray,
    #[error("default routing email is missing")]
    MissingDefault,
}

/// Folds a city name for comparison: lowercase, no diacritics, Romanian
/// comma-below letters mapped to ASCII, punctuation removed.
pub fn normalize_city(city: &str) -> String {
    city.trim()
        .to_lowercase()
        .nfd()
        .filter(|c| !('\u{0300}'..='\u{036f}').contains(c))
        .map(|c| match c {
            '\u{0218}' | '\u{0219}' => 's',
            '\u{021a}' | '\u{021b}' => 't',
            other => other,
        })
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c.is_whitespace() || *c == '-')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Parses the configured rule list. Malformed entries are skipped with a
/// warning; malformed JSON fails.
pub fn parse_routing_rules(raw: &str) -> Result<Vec<RoutingRule>, RoutingConfigError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let parsed: serde_json::Value = serde_json::from_str(raw)?;
    let entries = parsed.as_array().ok_or(RoutingConfigError::NotAnArray)?;

    let mut rules = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        match serde_json::from_value::<RoutingRule>(entry.clone()) {
            Ok(rule) if rule.email.contains('@') && !rule.cities.is_empty() => {
                rules.push(RoutingRule {
                    email: rule.email.trim().to_string(),
                    cities: rule.cities,
                });
            }
            _ => tracing::warn!("Skipping malformed routing rule at index {}", index),
        }
    }
    Ok(rules)
}

#[derive(Debug)]
struct CompiledRule {
    email: String,
    cities: HashSet<String>,
}

/// Resolves a city to a recipient, falling back to a mandatory default.
pub struct RoutingResolver {
    rules: Vec<CompiledRule>,
    default_email: String,
    // normalized city -> index of the first matching rule
    memo: Cache<String, Option<usize>>,
}

impl RoutingResolver {
    pub fn new(
        rules: &[RoutingRule],
        default_email: impl Into<String>,
    ) -> Result<Self, RoutingConfigError> {
        let default_email = default_email.into().trim().to_string();
        if default_email.is_empty() {
            return Err(RoutingConfigError::MissingDefault);
        }
        let rules: Vec<CompiledRule> = rules
            .iter()
            .map(|rule| CompiledRule {
                email: rule.email.clone(),
                cities: rule.cities.iter().map(|c| normalize_city(c)).collect(),
            })
            .collect();
        for rule in &rules {
            tracing::info!("Routing rule: {} covers {} cities", rule.email, rule.cities.len());
        }
        Ok(Self {
            rules,
            default_email,
            memo: Cache::new(MEMO_CAPACITY),
        })
    }

    pub fn default_email(&self) -> &str {
        &self.default_email
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    fn matching_rule(&self, normalized: &str) -> Option<usize> {
        if let Some(hit) = self.memo.get(normalized) {
            return hit;
        }
        let found = self.rules.iter().position(|r| r.cities.contains(normalized));
        self.memo.insert(normalized.to_string(), found);
        found
    }

    pub fn resolve(&self, city: &str) -> RoutingResult {
        let normalized = normalize_city(city);
        match self.matching_rule(&normalized) {
            Some(index) => {
                let email = self.rules[index].email.clone();
                RoutingResult {
                    matched_rule: format!("city-match: {} → {}", city, email),
                    email,
                }
            }
            None => RoutingResult {
                email: self.default_email.clone(),
                matched_rule: "default".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> RoutingResolver {
        let rules = parse_routing_rules(
            r#"[
                {"email": "buc@clinic.ro", "cities": ["București", "Ilfov"]},
                {"email": "cluj@clinic.ro", "cities": ["Cluj-Napoca", "Brașov"]}
            ]"#,
        )
        .unwrap();
        RoutingResolver::new(&rules, "leads@fivmatch.ro").unwrap()
    }

    #[test]
    fn normalization_folds_case_and_diacritics() {
        assert_eq!(normalize_city("  BUCUREȘTI "), "bucuresti");
        assert_eq!(normalize_city("Bucureşti"), "bucuresti");
        assert_eq!(normalize_city("Cluj-Napoca!"), "cluj-napoca");
        assert_eq!(normalize_city("Târgu Mureș"), "targu mures");
    }

    #[test]
    fn spelling_variants_route_to_same_rule() {
        let r = resolver();
        for city in ["Bucuresti", "BUCUREȘTI", "București"] {
            assert_eq!(r.resolve(city).email, "buc@clinic.ro");
        }
        let hit = r.resolve("brasov");
        assert_eq!(hit.email, "cluj@clinic.ro");
        assert_eq!(hit.matched_rule, "city-match: brasov → cluj@clinic.ro");
    }

    #[test]
    fn unknown_city_uses_default() {
        let result = resolver().resolve("Iași");
        assert_eq!(result.email, "leads@fivmatch.ro");
        assert_eq!(result.matched_rule, "default");
    }

    #[test]
    fn malformed_rules_are_skipped() {
        let rules = parse_routing_rules(
            r#"[{"email": "nope", "cities": ["X"]}, {"email": "a@b.ro", "cities": []}, {"cities": ["Y"]}, {"email": "ok@b.ro", "cities": ["Z"]}]"#,
        )
        .unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].email, "ok@b.ro");
    }

    #[test]
    fn bad_json_and_missing_default_fail_loudly() {
        assert!(matches!(
            parse_routing_rules("{not json"),
            Err(RoutingConfigError::InvalidJson(_))
        ));
        assert!(matches!(
            parse_routing_rules(r#"{"email": "a@b.ro"}"#),
            Err(RoutingConfigError::NotAnArray)
        ));
        assert!(matches!(
            RoutingResolver::new(&[], "  "),
            Err(RoutingConfigError::MissingDefault)
        ));
    }
}
