//! Fuzzy suggestions for device names that exact search could not resolve.
//!
//! Two tiers: a token-level fuzzy term match (max edit distance 2, prefix
//! length 1) over product/device/alias names, then a whole-string sequence
//! ratio against all known product names with a 0.5 cutoff. Scores from the
//! two tiers are coarse ranking signals only.

use serde::{Deserialize, Serialize};
use strsim::{levenshtein, normalized_levenshtein};

use super::{search::tokenize, DeviceStore};

const MAX_TERM_DISTANCE: usize = 2;
const RATIO_CUTOFF: f64 = 0.5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub product_name: String,
    pub score: f64,
}

/// A query token fuzzy-matches a name token when the first character agrees
/// and the edit distance is within bounds.
fn term_match(query_token: &str, name_token: &str) -> Option<usize> {
    if query_token.chars().next()? != name_token.chars().next()? {
        return None;
    }
    let distance = levenshtein(query_token, name_token);
    (distance <= MAX_TERM_DISTANCE).then_some(distance)
}

fn tier1_score(query_tokens: &[String], name_tokens: &[Vec<String>]) -> Option<f64> {
    let mut total_distance = 0usize;
    let mut total_len = 0usize;

    for query_token in query_tokens {
        let best = name_tokens
            .iter()
            .flatten()
            .filter_map(|name_token| term_match(query_token, name_token))
            .min()?;
        total_distance += best;
        total_len += query_token.len();
    }

    if total_len == 0 {
        return None;
    }
    Some((1.0 - total_distance as f64 / total_len as f64).clamp(0.0, 1.0))
}

pub(super) fn suggest(store: &DeviceStore, name: &str, max_suggestions: usize) -> Vec<Suggestion> {
    let query_tokens = tokenize(name);
    if query_tokens.is_empty() {
        return Vec::new();
    }

    // Tier 1: fuzzy term search over product/device/alias tokens.
    let mut candidates: Vec<Suggestion> = Vec::new();
    for group in store.groups() {
        let mut name_token_sets: Vec<Vec<String>> = vec![tokenize(&group.product_name)];
        for id in &group.ids {
            if let Some(device) = store.get(id) {
                name_token_sets.push(tokenize(&device.device_name));
                for alias in &device.aliases {
                    name_token_sets.push(tokenize(alias));
                }
            }
        }
        if let Some(score) = tier1_score(&query_tokens, &name_token_sets) {
            candidates.push(Suggestion {
                product_name: group.product_name.clone(),
                score,
            });
        }
    }

    // Tier 2: sequence-ratio fallback against the full product name set.
    if candidates.is_empty() {
        let name_lc = name.to_lowercase();
        for group in store.groups() {
            let ratio = normalized_levenshtein(&name_lc, &group.product_name.to_lowercase());
            if ratio >= RATIO_CUTOFF {
                candidates.push(Suggestion {
                    product_name: group.product_name.clone(),
                    score: ratio,
                });
            }
        }
    }

    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.product_name.cmp(&b.product_name))
    });
    candidates.truncate(max_suggestions);
    candidates
}

#[cfg(test)]
mod tests {
    use crate::catalog::{test_support, DeviceStore, FitLogic};

    fn store() -> DeviceStore {
        DeviceStore::from_devices(vec![
            test_support::device("1", "Vecta 46", "L2", FitLogic::Math),
            test_support::device("2", "Vecta 71", "L1", FitLogic::Math),
            test_support::device("3", "Neuron MAX 088", "L0", FitLogic::Math),
            test_support::device("4", "Solitaire X", "L4", FitLogic::Compat),
        ])
    }

    #[test]
    fn test_misspelling_scores_high() {
        let suggestions = store().suggest_close_matches("Vectaa 46", 3);
        assert!(!suggestions.is_empty());
        assert_eq!(suggestions[0].product_name, "Vecta 46");
        assert!(suggestions[0].score >= 0.7, "score {}", suggestions[0].score);
    }

    #[test]
    fn test_unrelated_name_returns_empty() {
        let suggestions = store().suggest_close_matches("xyzzy quux", 3);
        assert!(suggestions.is_empty());
    }

    #[test]
    fn test_ratio_fallback_cutoff() {
        // "Soltre" is 3 edits from "Solitaire", past the tier-1 distance
        // bound, but the whole-string ratio still clears 0.5.
        let suggestions = store().suggest_close_matches("Soltre X", 3);
        assert!(!suggestions.is_empty());
        assert_eq!(suggestions[0].product_name, "Solitaire X");
        assert!(suggestions[0].score >= 0.5);
    }

    #[test]
    fn test_results_sorted_and_capped() {
        let suggestions = store().suggest_close_matches("Vecta", 1);
        assert_eq!(suggestions.len(), 1);
    }

    #[test]
    fn test_scores_within_unit_interval() {
        for s in store().suggest_close_matches("Vecta 46", 5) {
            assert!((0.0..=1.0).contains(&s.score));
        }
    }
}
