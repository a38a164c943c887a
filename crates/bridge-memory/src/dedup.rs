//! Near-duplicate search-result filtering via character-bigram Jaccard
//! similarity, preferring `experience > daily > summary` on a tie.

use std::collections::HashSet;

use crate::types::SearchResult;

const DEDUP_THRESHOLD: f64 = 0.55;

fn strip_markup(text: &str) -> String {
    text.chars().filter(|c| !matches!(c, '#' | '*' | '>' | '[' | ']' | '(' | ')' | '`' | '~' | '_' | '|' | '!' | '-')).collect()
}

fn char_bigrams(text: &str) -> HashSet<(char, char)> {
    let cleaned: Vec<char> = strip_markup(text).chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.len() < 2 {
        return HashSet::new();
    }
    cleaned.windows(2).map(|w| (w[0], w[1])).collect()
}

fn jaccard(a: &HashSet<(char, char)>, b: &HashSet<(char, char)>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

/// O(n^2) pairwise comparison, fine for typical result set sizes (<200).
/// Keeps the higher-priority source when two results collide.
pub fn dedup_results(results: Vec<SearchResult>) -> Vec<SearchResult> {
    if results.len() <= 1 {
        return results;
    }

    let bigrams: Vec<HashSet<(char, char)>> = results.iter().map(|r| char_bigrams(&r.content)).collect();
    let mut keep = vec![true; results.len()];

    for i in 0..results.len() {
        if !keep[i] {
            continue;
        }
        for j in (i + 1)..results.len() {
            if !keep[j] {
                continue;
            }
            if jaccard(&bigrams[i], &bigrams[j]) >= DEDUP_THRESHOLD {
                if results[i].source.priority() <= results[j].source.priority() {
                    keep[j] = false;
                } else {
                    keep[i] = false;
                    break;
                }
            }
        }
    }

    results.into_iter().zip(keep).filter_map(|(r, k)| k.then_some(r)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MemorySource;

    fn result(source: MemorySource, content: &str) -> SearchResult {
        SearchResult { file: "f".into(), source, date: "2026-02-15".into(), line_num: 1, content: content.into() }
    }

    #[test]
    fn keeps_distinct_content() {
        let results = vec![result(MemorySource::Daily, "went for a run"), result(MemorySource::Daily, "bought groceries")];
        assert_eq!(dedup_results(results).len(), 2);
    }

    #[test]
    fn drops_near_duplicate_preferring_experience_over_daily() {
        let results = vec![
            result(MemorySource::Daily, "User prefers dark mode in the editor"),
            result(MemorySource::Experience, "User prefers dark mode in the editor."),
        ];
        let kept = dedup_results(results);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].source, MemorySource::Experience);
    }

    #[test]
    fn single_result_passes_through() {
        assert_eq!(dedup_results(vec![result(MemorySource::Summary, "x")]).len(), 1);
    }
}
