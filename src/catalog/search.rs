//! In-memory full-text index over product names, device names, aliases,
//! and manufacturers.
//!
//! A match is the union of: phrase match on product_name, phrase match on
//! aliases, conjunctive token match on product_name, conjunctive token match
//! on aliases. Results are relevance-ordered and capped at 100.

use std::collections::HashSet;
use std::sync::Arc;

use super::Device;

const MAX_RESULTS: usize = 100;

// Relevance tiers, highest first.
const SCORE_PHRASE_PRODUCT: u32 = 8;
const SCORE_PHRASE_ALIAS: u32 = 6;
const SCORE_TOKENS_PRODUCT: u32 = 4;
const SCORE_TOKENS_ALIAS: u32 = 2;

pub(super) struct SearchIndex {
    entries: Vec<IndexEntry>,
}

struct IndexEntry {
    id: String,
    product_name: String,
    product_lc: String,
    aliases_lc: Vec<String>,
    product_tokens: HashSet<String>,
    alias_tokens: HashSet<String>,
}

/// Lowercase word tokenizer: alphanumeric runs only.
pub(super) fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

impl SearchIndex {
    pub fn build<'a>(devices: impl Iterator<Item = &'a Arc<Device>>) -> Self {
        let entries = devices
            .map(|device| {
                let mut searchable = vec![device.device_name.clone(), device.manufacturer.clone()];
                searchable.extend(device.aliases.iter().cloned());

                let alias_tokens = searchable
                    .iter()
                    .flat_map(|text| tokenize(text))
                    .collect::<HashSet<_>>();

                IndexEntry {
                    id: device.id.clone(),
                    product_name: device.product_name.clone(),
                    product_lc: device.product_name.to_lowercase(),
                    aliases_lc: searchable
                        .iter()
                        .map(|a| a.to_lowercase())
                        .filter(|a| !a.is_empty())
                        .collect(),
                    product_tokens: tokenize(&device.product_name).into_iter().collect(),
                    alias_tokens,
                }
            })
            .collect();
        Self { entries }
    }

    /// Run the union query; returns ids ordered by relevance.
    pub fn search(&self, query: &str) -> Vec<String> {
        let query_lc = query.trim().to_lowercase();
        if query_lc.is_empty() {
            return Vec::new();
        }
        let query_tokens = tokenize(&query_lc);

        let mut hits: Vec<(u32, &IndexEntry)> = Vec::new();
        for entry in &self.entries {
            let mut score = 0u32;

            if entry.product_lc.contains(&query_lc) {
                score = score.max(SCORE_PHRASE_PRODUCT);
            }
            if entry.aliases_lc.iter().any(|alias| alias.contains(&query_lc)) {
                score = score.max(SCORE_PHRASE_ALIAS);
            }
            if !query_tokens.is_empty() {
                if query_tokens.iter().all(|t| entry.product_tokens.contains(t)) {
                    score = score.max(SCORE_TOKENS_PRODUCT);
                }
                if query_tokens.iter().all(|t| entry.alias_tokens.contains(t)) {
                    score = score.max(SCORE_TOKENS_ALIAS);
                }
            }

            if score > 0 {
                hits.push((score, entry));
            }
        }

        hits.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.product_name.cmp(&b.1.product_name)));
        hits.truncate(MAX_RESULTS);
        hits.into_iter().map(|(_, entry)| entry.id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::catalog::{test_support, DeviceStore, FitLogic};

    #[test]
    fn test_phrase_match_on_product_name() {
        let store = DeviceStore::from_devices(vec![
            test_support::device("1", "Vecta 46", "L2", FitLogic::Math),
            test_support::device("2", "Vecta 71", "L1", FitLogic::Math),
            test_support::device("3", "Neuron MAX 088", "L0", FitLogic::Math),
        ]);

        let hits = store.search("vecta 46");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].product_name, "Vecta 46");
    }

    #[test]
    fn test_conjunctive_token_match() {
        let store = DeviceStore::from_devices(vec![
            test_support::device("1", "Neuron MAX 088", "L0", FitLogic::Math),
            test_support::device("2", "Neuron Select", "L1", FitLogic::Math),
        ]);

        // Token order does not matter for conjunctive matching.
        let hits = store.search("max neuron");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].product_name, "Neuron MAX 088");

        // Shared token matches both.
        let hits = store.search("neuron");
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_no_match_returns_empty() {
        let store = DeviceStore::from_devices(vec![test_support::device(
            "1",
            "Vecta 46",
            "L2",
            FitLogic::Math,
        )]);
        assert!(store.search("solitaire").is_empty());
        assert!(store.search("").is_empty());
    }

    #[test]
    fn test_alias_match() {
        let mut device = test_support::device("1", "Neuron MAX 088", "L0", FitLogic::Math);
        device.aliases = vec!["NeuronMax".to_string()];
        let store = DeviceStore::from_devices(vec![device]);

        let hits = store.search("neuronmax");
        assert_eq!(hits.len(), 1);
    }
}
