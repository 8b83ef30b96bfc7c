//! Loose column-name matching for CSV inputs.
//!
//! Catalog and station-metadata CSV files come with a wide variety of
//! header spellings. Columns are mapped to canonical names by the longest
//! substring of a closed guess vocabulary found in the header, with exact
//! matches winning outright.

use std::collections::HashMap;

/// Score a header against a list of guesses.
///
/// Returns 999 for an exact (case-insensitive) match, otherwise the length
/// of the longest guess contained in the header, or 0 when nothing matches.
pub fn field_match_score(field: &str, guesses: &[&str]) -> usize {
    let lowered = field.to_lowercase();
    let lowered = lowered.trim();
    if guesses.contains(&lowered) {
        return 999;
    }
    guesses
        .iter()
        .filter(|guess| lowered.contains(**guess))
        .map(|guess| guess.len())
        .max()
        .unwrap_or(0)
}

/// Map canonical field names to actual CSV headers.
///
/// For every canonical name the best-scoring header is selected; canonical
/// names with no match at all are absent from the result. Guess lists are
/// also tried with spaces in place of underscores.
pub fn guess_field_names<'a>(
    headers: &'a [String],
    field_guesses: &[(&'static str, &[&str])],
) -> HashMap<&'static str, &'a str> {
    let mut matched: HashMap<&'static str, (&str, usize)> = HashMap::new();
    for header in headers {
        for (name, guesses) in field_guesses {
            let mut expanded: Vec<String> = guesses.iter().map(|g| g.to_string()).collect();
            expanded.extend(guesses.iter().map(|g| g.replace('_', " ")));
            let expanded_refs: Vec<&str> = expanded.iter().map(|s| s.as_str()).collect();
            let score = field_match_score(header, &expanded_refs);
            if score == 0 {
                continue;
            }
            let current = matched.get(name).map(|(_, s)| *s).unwrap_or(0);
            if score > current {
                matched.insert(name, (header.as_str(), score));
            }
        }
    }
    matched
        .into_iter()
        .map(|(name, (header, _))| (name, header))
        .collect()
}
