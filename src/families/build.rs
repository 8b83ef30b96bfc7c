//! Build families of repeating earthquakes from the pair stream.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use log::info;

use crate::config::{ClusteringAlgorithm, Config};
use crate::error::{Error, Result};
use crate::families::family::{write_families, Family};
use crate::families::pairs::{read_events_from_pairs, PairEvent};
use crate::families::upgma::{condensed_index, upgma_labels};

/// Build families from the pair stream and write the family CSV.
pub fn build_families(config: &Config) -> Result<()> {
    info!("reading events from pairs file...");
    let events = read_events_from_pairs(config.pairs_file())?;
    let families = match config.clustering_algorithm {
        ClusteringAlgorithm::Shared => {
            info!("building families from shared events...");
            families_from_shared_events(&events, config.cc_min, config)?
        }
        ClusteringAlgorithm::Upgma => {
            info!("building families using UPGMA...");
            families_from_upgma(&events, config.cc_min, config)?
        }
    };
    let outfile = config.families_file();
    write_families(&outfile, &families, config)?;
    info!("done, output written to {}", outfile.display());
    Ok(())
}

/// Shared-event clustering: transitive closure over pairs correlating at
/// or above `cc_min`.
///
/// Every event seeds a candidate family of itself plus its well-correlated
/// partners; a candidate intersecting an existing family merges into it.
/// Events are visited in sorted-evid order, so the assignment is
/// deterministic for identical input.
pub fn families_from_shared_events(
    events: &BTreeMap<String, PairEvent>,
    cc_min: f64,
    config: &Config,
) -> Result<Vec<Family>> {
    let mut groups: Vec<BTreeSet<String>> = Vec::new();
    for (evid, entry) in events {
        let mut candidate: BTreeSet<String> = BTreeSet::new();
        candidate.insert(evid.clone());
        for (other, cc) in &entry.correlations {
            if *cc >= cc_min {
                candidate.insert(other.clone());
            }
        }
        if candidate.len() == 1 {
            continue;
        }
        match groups.iter_mut().find(|g| !g.is_disjoint(&candidate)) {
            Some(group) => group.extend(candidate),
            None => groups.push(candidate),
        }
    }
    groups_to_families(groups, events, config)
}

/// UPGMA clustering over `d = 1 - cc`, with missing correlations filled by
/// `1 - min_observed_cc`, cut at `1 - cc_min`.
pub fn families_from_upgma(
    events: &BTreeMap<String, PairEvent>,
    cc_min: f64,
    config: &Config,
) -> Result<Vec<Family>> {
    let evids: Vec<&String> = events.keys().collect();
    let n = evids.len();
    if n < 2 {
        return Ok(Vec::new());
    }
    let min_observed = events
        .values()
        .flat_map(|e| e.correlations.values())
        .fold(f64::INFINITY, |acc, cc| acc.min(*cc));
    let mut condensed = vec![1.0 - min_observed; n * (n - 1) / 2];
    for (i, evid) in evids.iter().enumerate() {
        for (j, other) in evids.iter().enumerate().skip(i + 1) {
            if let Some(cc) = events[*evid].correlations.get(*other) {
                condensed[condensed_index(i, j, n)] = 1.0 - cc;
            }
        }
    }
    let labels = upgma_labels(&condensed, n, 1.0 - cc_min);

    let mut groups: BTreeMap<usize, BTreeSet<String>> = BTreeMap::new();
    for (i, label) in labels.iter().enumerate() {
        groups
            .entry(*label)
            .or_default()
            .insert(evids[i].clone());
    }
    let groups: Vec<BTreeSet<String>> = groups
        .into_values()
        .filter(|g| g.len() >= 2)
        .collect();
    groups_to_families(groups, events, config)
}

/// Materialize evid groups into family records with aggregates.
fn groups_to_families(
    groups: Vec<BTreeSet<String>>,
    events: &BTreeMap<String, PairEvent>,
    config: &Config,
) -> Result<Vec<Family>> {
    let mut families = Vec::with_capacity(groups.len());
    for (number, group) in groups.into_iter().enumerate() {
        let mut family = Family::new(number as i64);
        for evid in group {
            let entry = events.get(&evid).ok_or_else(|| {
                Error::parse(format!("pair stream references unknown event {evid}"))
            })?;
            family.append(entry.event.clone(), config)?;
        }
        families.push(family);
    }
    Ok(families)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{parse_utc_datetime, Event};

    fn pair_events(similarity: &[(&str, &str, f64)]) -> BTreeMap<String, PairEvent> {
        let mut events: BTreeMap<String, PairEvent> = BTreeMap::new();
        let mut month = 1;
        let mut ensure = |evid: &str, events: &mut BTreeMap<String, PairEvent>| {
            if !events.contains_key(evid) {
                let time =
                    parse_utc_datetime(&format!("2021-{month:02}-01T00:00:00")).unwrap();
                month += 1;
                let mut ev = Event::new(evid, time);
                ev.lat = Some(42.0);
                ev.lon = Some(12.0);
                ev.depth = Some(8.0);
                ev.trace_id = Some("IV.MMN..EHZ".parse().unwrap());
                events.insert(
                    evid.to_string(),
                    PairEvent {
                        event: ev,
                        correlations: BTreeMap::new(),
                    },
                );
            }
        };
        for (a, b, cc) in similarity {
            ensure(a, &mut events);
            ensure(b, &mut events);
            events
                .get_mut(*a)
                .unwrap()
                .correlations
                .insert(b.to_string(), *cc);
            events
                .get_mut(*b)
                .unwrap()
                .correlations
                .insert(a.to_string(), *cc);
        }
        events
    }

    #[test]
    fn test_shared_events_single_family() {
        let config = Config::default();
        let events = pair_events(&[("a", "b", 0.95), ("b", "c", 0.92), ("a", "c", 0.5)]);
        let families = families_from_shared_events(&events, 0.9, &config).unwrap();
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].len(), 3);
    }

    #[test]
    fn test_shared_events_threshold_law() {
        // Every pair with cc >= cc_min ends up in the same family.
        let config = Config::default();
        let events = pair_events(&[
            ("a", "b", 0.95),
            ("c", "d", 0.93),
            ("a", "c", 0.2),
            ("b", "d", 0.1),
        ]);
        let families = families_from_shared_events(&events, 0.9, &config).unwrap();
        assert_eq!(families.len(), 2);
        for family in &families {
            assert!(family.len() >= 2);
        }
        let in_same_family = |x: &str, y: &str| {
            families.iter().any(|f| {
                let evids: Vec<&str> = f.events().iter().map(|e| e.evid.as_str()).collect();
                evids.contains(&x) && evids.contains(&y)
            })
        };
        assert!(in_same_family("a", "b"));
        assert!(in_same_family("c", "d"));
        assert!(!in_same_family("a", "c"));
    }

    #[test]
    fn test_shared_events_drops_singletons() {
        let config = Config::default();
        let events = pair_events(&[("a", "b", 0.95), ("a", "c", 0.3)]);
        let families = families_from_shared_events(&events, 0.9, &config).unwrap();
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].len(), 2);
    }

    #[test]
    fn test_upgma_separates_two_clusters() {
        // The four-event similarity matrix of the separation scenario:
        // two tight clusters with weak cross terms.
        let config = Config::default();
        let events = pair_events(&[
            ("a", "b", 0.95),
            ("a", "c", 0.2),
            ("a", "d", 0.2),
            ("b", "c", 0.2),
            ("b", "d", 0.2),
            ("c", "d", 0.95),
        ]);
        let families = families_from_upgma(&events, 0.8, &config).unwrap();
        assert_eq!(families.len(), 2);
        assert_eq!(families[0].len(), 2);
        assert_eq!(families[1].len(), 2);
        let f0: Vec<&str> = families[0].events().iter().map(|e| e.evid.as_str()).collect();
        assert_eq!(f0, ["a", "b"]);
    }

    #[test]
    fn test_upgma_missing_pairs_use_min_observed_fill() {
        // No correlation between (a, c): the fill value 1 - min_observed
        // keeps them apart rather than merging by default.
        let config = Config::default();
        let events = pair_events(&[("a", "b", 0.95), ("b", "c", 0.3)]);
        let families = families_from_upgma(&events, 0.9, &config).unwrap();
        assert_eq!(families.len(), 1);
        let f0: Vec<&str> = families[0].events().iter().map(|e| e.evid.as_str()).collect();
        assert_eq!(f0, ["a", "b"]);
    }

    #[test]
    fn test_deterministic_given_sorted_evids() {
        let config = Config::default();
        let spec = [("b", "a", 0.95), ("d", "c", 0.93)];
        let f1 = families_from_shared_events(&pair_events(&spec), 0.9, &config).unwrap();
        let f2 = families_from_shared_events(&pair_events(&spec), 0.9, &config).unwrap();
        let evids = |fs: &[Family]| -> Vec<Vec<String>> {
            fs.iter()
                .map(|f| f.events().iter().map(|e| e.evid.clone()).collect())
                .collect()
        };
        assert_eq!(evids(&f1), evids(&f2));
    }
}
