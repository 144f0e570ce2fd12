//! # Fuzzy Name Search
//!
//! Case-insensitive lookup over entity names.
//!
//! Keys are lowercased names. Candidates are ranked in tiers:
//!
//! 1. exact match
//! 2. prefix match (shorter names first)
//! 3. substring match (earlier match position first), served by a trigram index
//! 4. bounded edit distance to the whole name, then to a prefix of the name
//!
//! Ties inside a tier break on the key and then on the entity id, so results
//! are fully deterministic. A tier is only computed when the previous ones
//! have not filled the requested limit.

use crate::primitives::{MAX_FUZZY_DISTANCE, NGRAM_LEN};
use crate::types::EntityId;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchIndex {
    keys: BTreeMap<Arc<str>, BTreeSet<EntityId>>,
    grams: BTreeMap<Box<str>, BTreeSet<Arc<str>>>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Rank {
    tier: u8,
    score: usize,
    key_len: usize,
    key: Arc<str>,
}

/// Lowercase form used as a search key.
#[must_use]
pub fn fold(text: &str) -> String {
    text.trim().to_lowercase()
}

fn grams_of(key: &str) -> BTreeSet<Box<str>> {
    let chars: Vec<char> = key.chars().collect();
    chars
        .windows(NGRAM_LEN)
        .map(|w| w.iter().collect::<String>().into_boxed_str())
        .collect()
}

impl SearchIndex {
    /// Add `id` under `text`; returns the shared folded key.
    pub fn insert(&mut self, text: &str, id: EntityId) -> Arc<str> {
        let folded = fold(text);
        if let Some(ids) = self.keys.get_mut(folded.as_str()) {
            ids.insert(id);
            if let Some((key, _)) = self.keys.get_key_value(folded.as_str()) {
                return Arc::clone(key);
            }
        }
        let key: Arc<str> = Arc::from(folded);
        for gram in grams_of(&key) {
            self.grams.entry(gram).or_default().insert(Arc::clone(&key));
        }
        self.keys
            .entry(Arc::clone(&key))
            .or_default()
            .insert(id);
        key
    }

    pub fn remove(&mut self, key: &str, id: EntityId) {
        let Some(ids) = self.keys.get_mut(key) else {
            return;
        };
        ids.remove(&id);
        if !ids.is_empty() {
            return;
        }
        self.keys.remove(key);
        for gram in grams_of(key) {
            if let Some(holders) = self.grams.get_mut(&gram) {
                holders.remove(key);
                if holders.is_empty() {
                    self.grams.remove(&gram);
                }
            }
        }
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Ranked ids matching `fragment`, at most `limit`.
    #[must_use]
    pub fn search(&self, fragment: &str, limit: usize) -> Vec<EntityId> {
        let needle = fold(fragment);
        if needle.is_empty() || limit == 0 {
            return Vec::new();
        }

        let mut ranked: Vec<Rank> = Vec::new();
        let mut matched_keys: BTreeSet<Arc<str>> = BTreeSet::new();
        let mut results: Vec<EntityId> = Vec::new();
        let mut seen: BTreeSet<EntityId> = BTreeSet::new();

        for tier in 0..4u8 {
            match tier {
                0 => self.exact(&needle, &mut ranked),
                1 => self.prefixed(&needle, &mut ranked),
                2 => self.containing(&needle, &matched_keys, &mut ranked),
                _ => self.similar(&needle, &matched_keys, &mut ranked),
            }
            ranked.sort();
            for rank in ranked.drain(..) {
                if let Some(ids) = self.keys.get(&rank.key) {
                    for id in ids {
                        if seen.insert(*id) {
                            results.push(*id);
                        }
                    }
                }
                matched_keys.insert(rank.key);
            }
            if results.len() >= limit {
                break;
            }
        }
        results.truncate(limit);
        results
    }

    fn exact(&self, needle: &str, out: &mut Vec<Rank>) {
        if let Some((key, _)) = self.keys.get_key_value(needle) {
            out.push(rank(0, 0, key));
        }
    }

    fn prefixed(&self, needle: &str, out: &mut Vec<Rank>) {
        let range = self
            .keys
            .range::<str, _>((std::ops::Bound::Excluded(needle), std::ops::Bound::Unbounded));
        for (key, _) in range {
            if !key.starts_with(needle) {
                break;
            }
            out.push(rank(1, 0, key));
        }
    }

    fn containing(&self, needle: &str, skip: &BTreeSet<Arc<str>>, out: &mut Vec<Rank>) {
        let mut consider = |key: &Arc<str>| {
            if skip.contains(key) || key.starts_with(needle) {
                return;
            }
            if let Some(position) = key.find(needle) {
                out.push(rank(2, position, key));
            }
        };

        if needle.chars().count() < NGRAM_LEN {
            for key in self.keys.keys() {
                consider(key);
            }
            return;
        }

        let mut gram_sets: Vec<&BTreeSet<Arc<str>>> = Vec::new();
        for gram in grams_of(needle) {
            match self.grams.get(&gram) {
                Some(holders) => gram_sets.push(holders),
                None => return,
            }
        }
        gram_sets.sort_by_key(|set| set.len());
        let Some((smallest, rest)) = gram_sets.split_first() else {
            return;
        };
        for key in smallest.iter() {
            if rest.iter().all(|set| set.contains(key)) {
                consider(key);
            }
        }
    }

    fn similar(&self, needle: &str, skip: &BTreeSet<Arc<str>>, out: &mut Vec<Rank>) {
        let needle: Vec<char> = needle.chars().collect();
        let max = max_distance(needle.len());
        for key in self.keys.keys() {
            if skip.contains(key) {
                continue;
            }
            let chars: Vec<char> = key.chars().collect();
            if chars.len() + max < needle.len() {
                continue;
            }
            if let Some(distance) = bounded_distance(&needle, &chars, max, false) {
                out.push(rank(3, distance * 2, key));
            } else if chars.len() > needle.len() {
                if let Some(distance) = bounded_distance(&needle, &chars, max, true) {
                    out.push(rank(3, distance * 2 + 1, key));
                }
            }
        }
    }
}

fn rank(tier: u8, score: usize, key: &Arc<str>) -> Rank {
    Rank {
        tier,
        score,
        key_len: key.chars().count(),
        key: Arc::clone(key),
    }
}

/// Edit budget for a needle of `len` characters.
#[must_use]
pub fn max_distance(len: usize) -> usize {
    (len / 4).clamp(1, MAX_FUZZY_DISTANCE)
}

/// Levenshtein distance bounded by `max`, with early exit.
///
/// With `prefix` set, returns the smallest distance between `needle` and any
/// prefix of `candidate`.
#[must_use]
pub fn bounded_distance(needle: &[char], candidate: &[char], max: usize, prefix: bool) -> Option<usize> {
    let columns = if prefix {
        candidate.len().min(needle.len() + max)
    } else {
        if candidate.len().abs_diff(needle.len()) > max {
            return None;
        }
        candidate.len()
    };
    let candidate = &candidate[..columns];

    let mut previous: Vec<usize> = (0..=columns).collect();
    let mut current: Vec<usize> = vec![0; columns + 1];
    for (i, nc) in needle.iter().enumerate() {
        current[0] = i + 1;
        let mut row_min = current[0];
        for (j, cc) in candidate.iter().enumerate() {
            let substitution = previous[j] + usize::from(nc != cc);
            let deletion = previous[j + 1] + 1;
            let insertion = current[j] + 1;
            current[j + 1] = substitution.min(deletion).min(insertion);
            row_min = row_min.min(current[j + 1]);
        }
        if row_min > max {
            return None;
        }
        std::mem::swap(&mut previous, &mut current);
    }

    let distance = if prefix {
        previous.iter().copied().min().unwrap_or(usize::MAX)
    } else {
        previous[columns]
    };
    (distance <= max).then_some(distance)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    fn index(names: &[(&str, u64)]) -> SearchIndex {
        let mut idx = SearchIndex::default();
        for (name, id) in names {
            idx.insert(name, EntityId(*id));
        }
        idx
    }

    #[test]
    fn distance_basics() {
        assert_eq!(bounded_distance(&chars("kitten"), &chars("sitting"), 3, false), Some(3));
        assert_eq!(bounded_distance(&chars("kitten"), &chars("sitting"), 2, false), None);
        assert_eq!(bounded_distance(&chars("abc"), &chars("abc"), 1, false), Some(0));
        assert_eq!(bounded_distance(&chars("valdate"), &chars("validate_user"), 1, true), Some(1));
        assert_eq!(bounded_distance(&chars("valdate"), &chars("validate_user"), 1, false), None);
    }

    #[test]
    fn empty_fragment_and_zero_limit_return_nothing() {
        let idx = index(&[("foo", 1)]);
        assert!(idx.search("", 10).is_empty());
        assert!(idx.search("   ", 10).is_empty());
        assert!(idx.search("foo", 0).is_empty());
        assert!(idx.search("Xyzzy123NotPresent", 10).is_empty());
    }

    #[test]
    fn tiers_rank_exact_prefix_substring_then_typos() {
        let idx = index(&[
            ("parse", 1),
            ("parse_file", 2),
            ("parser", 3),
            ("reparse", 4),
            ("parze", 5),
            ("unrelated", 6),
        ]);
        let hits = idx.search("Parse", 10);
        assert_eq!(
            hits,
            vec![EntityId(1), EntityId(3), EntityId(2), EntityId(4), EntityId(5)]
        );
        assert_eq!(idx.search("parse", 2), vec![EntityId(1), EntityId(3)]);
    }

    #[test]
    fn duplicate_names_list_all_ids_in_order() {
        let idx = index(&[("new", 9), ("New", 2), ("new", 5)]);
        assert_eq!(idx.key_count(), 1);
        assert_eq!(idx.search("new", 10), vec![EntityId(2), EntityId(5), EntityId(9)]);
    }

    #[test]
    fn remove_cleans_keys_and_grams() {
        let mut idx = index(&[("validate", 1), ("validate", 2)]);
        idx.remove("validate", EntityId(1));
        assert_eq!(idx.search("lida", 5), vec![EntityId(2)]);
        idx.remove("validate", EntityId(2));
        assert!(idx.search("lida", 5).is_empty());
        assert_eq!(idx, SearchIndex::default());
    }

    #[test]
    fn short_substring_scans_keys() {
        let idx = index(&[("ab", 1), ("xaby", 2)]);
        assert_eq!(idx.search("ab", 5), vec![EntityId(1), EntityId(2)]);
    }
}
