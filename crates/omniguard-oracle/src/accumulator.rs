// PENDING REPORT ACCUMULATOR
// Collects accepted observations for one round and decides whether a quorum exists.
//
// SAFETY INVARIANTS:
// 1. One observation per reporter per round (later duplicates are refused upstream)
// 2. A round commits only with >= quorum matching reporters that also outnumber
//    every dissenting reporter in the round
// 3. The committed value is always one reachable from the matching cluster (median)
// 4. Evaluation is a pure function of the observations, independent of arrival order

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use omniguard_core::{ChainId, ReporterId};

/// Supply values reported for one chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainValue {
    pub chain_id: ChainId,
    pub total_supply: u128,
    pub locked_supply: u128,
}

/// What one reporter observed in a round (one entry for single reports, several for batches)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub values: Vec<ChainValue>,
    pub timestamp: u64,
}

impl Observation {
    /// Same chain set and every value within `tolerance`
    pub fn matches(&self, other: &Observation, tolerance: u128) -> bool {
        self.values.len() == other.values.len()
            && self.values.iter().zip(&other.values).all(|(a, b)| {
                a.chain_id == b.chain_id
                    && a.total_supply.abs_diff(b.total_supply) <= tolerance
                    && a.locked_supply.abs_diff(b.locked_supply) <= tolerance
            })
    }

    pub fn covers(&self, chain: ChainId) -> bool {
        self.values.iter().any(|v| v.chain_id == chain)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundVerdict {
    /// Not enough agreement yet
    Pending { matching: usize, required: usize },
    Commit {
        values: Vec<ChainValue>,
        supporters: Vec<ReporterId>,
        dissenters: Vec<ReporterId>,
    },
}

/// Observations for one (chain, nonce) or one batch nonce
#[derive(Debug, Clone, Default)]
pub struct PendingRound {
    observations: BTreeMap<ReporterId, Observation>,
}

impl PendingRound {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, reporter: &ReporterId) -> bool {
        self.observations.contains_key(reporter)
    }

    pub fn insert(&mut self, reporter: ReporterId, observation: Observation) {
        self.observations.entry(reporter).or_insert(observation);
    }

    pub fn observation(&self, reporter: &ReporterId) -> Option<&Observation> {
        self.observations.get(reporter)
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Drop observations stamped before `cutoff`; returns whether anything remains
    pub fn retain_fresh(&mut self, cutoff: u64) -> bool {
        self.observations.retain(|_, obs| obs.timestamp >= cutoff);
        !self.observations.is_empty()
    }

    pub fn covers(&self, chain: ChainId) -> bool {
        self.observations.values().any(|obs| obs.covers(chain))
    }

    pub fn evaluate(&self, quorum: usize, tolerance: u128) -> RoundVerdict {
        evaluate_round(&self.observations, quorum, tolerance)
    }
}

/// Anchor clustering: every observation anchors a cluster of the observations
/// matching it. The largest cluster wins; equal sizes resolve to the anchor with
/// the lowest reporter id (map iteration order).
pub fn evaluate_round(
    observations: &BTreeMap<ReporterId, Observation>,
    quorum: usize,
    tolerance: u128,
) -> RoundVerdict {
    let mut best: Vec<&ReporterId> = Vec::new();

    for anchor in observations.values() {
        let cluster: Vec<&ReporterId> = observations
            .iter()
            .filter(|(_, obs)| anchor.matches(obs, tolerance))
            .map(|(id, _)| id)
            .collect();
        if cluster.len() > best.len() {
            best = cluster;
        }
    }

    let matching = best.len();
    let dissenting = observations.len() - matching;
    if matching < quorum || matching <= dissenting {
        return RoundVerdict::Pending {
            matching,
            required: quorum.max(dissenting + 1),
        };
    }

    let cluster: Vec<&Observation> = best.iter().filter_map(|id| observations.get(*id)).collect();
    let values = median_values(&cluster);
    let supporters: Vec<ReporterId> = best.iter().map(|id| (*id).clone()).collect();
    let dissenters = observations
        .keys()
        .filter(|id| !supporters.contains(id))
        .cloned()
        .collect();

    RoundVerdict::Commit {
        values,
        supporters,
        dissenters,
    }
}

/// Per-chain lower median of totals and of locked amounts.
///
/// Each observation has locked <= total, so the order statistics keep
/// locked <= total as well.
fn median_values(cluster: &[&Observation]) -> Vec<ChainValue> {
    let Some(first) = cluster.first() else {
        return Vec::new();
    };

    (0..first.values.len())
        .map(|i| {
            let mut totals: Vec<u128> = cluster.iter().map(|obs| obs.values[i].total_supply).collect();
            let mut locked: Vec<u128> = cluster.iter().map(|obs| obs.values[i].locked_supply).collect();
            totals.sort_unstable();
            locked.sort_unstable();
            let mid = (cluster.len() - 1) / 2;
            ChainValue {
                chain_id: first.values[i].chain_id,
                total_supply: totals[mid],
                locked_supply: locked[mid],
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn obs(chain: u64, total: u128, locked: u128) -> Observation {
        Observation {
            values: vec![ChainValue {
                chain_id: ChainId(chain),
                total_supply: total,
                locked_supply: locked,
            }],
            timestamp: 100,
        }
    }

    fn round(entries: &[(&str, Observation)]) -> PendingRound {
        let mut round = PendingRound::new();
        for (id, o) in entries {
            round.insert(ReporterId::new(*id), o.clone());
        }
        round
    }

    #[test]
    fn test_quorum_of_identical_reports_commits() {
        let r = round(&[
            ("a", obs(56, 5_000_000, 0)),
            ("b", obs(56, 5_000_000, 0)),
            ("c", obs(56, 5_000_000, 0)),
        ]);
        match r.evaluate(3, 0) {
            RoundVerdict::Commit { values, supporters, dissenters } => {
                assert_eq!(values[0].total_supply, 5_000_000);
                assert_eq!(supporters.len(), 3);
                assert!(dissenters.is_empty());
            }
            other => panic!("expected commit, got {:?}", other),
        }
    }

    #[test]
    fn test_below_quorum_is_pending() {
        let r = round(&[("a", obs(56, 10, 0)), ("b", obs(56, 10, 0))]);
        assert_eq!(r.evaluate(3, 0), RoundVerdict::Pending { matching: 2, required: 3 });
    }

    #[test]
    fn test_minority_is_reported_as_dissent() {
        let r = round(&[
            ("a", obs(56, 100, 0)),
            ("b", obs(56, 100, 0)),
            ("c", obs(56, 100, 0)),
            ("m", obs(56, 999, 0)),
        ]);
        match r.evaluate(3, 0) {
            RoundVerdict::Commit { dissenters, .. } => {
                assert_eq!(dissenters, vec![ReporterId::new("m")]);
            }
            other => panic!("expected commit, got {:?}", other),
        }
    }

    #[test]
    fn test_split_round_without_majority_stays_pending() {
        let r = round(&[
            ("a", obs(1, 100, 0)),
            ("b", obs(1, 100, 0)),
            ("c", obs(1, 200, 0)),
            ("d", obs(1, 200, 0)),
        ]);
        assert!(matches!(r.evaluate(2, 0), RoundVerdict::Pending { matching: 2, .. }));
    }

    #[test]
    fn test_tolerance_and_median() {
        let r = round(&[
            ("a", obs(1, 100, 10)),
            ("b", obs(1, 103, 12)),
            ("c", obs(1, 101, 11)),
        ]);
        match r.evaluate(3, 3) {
            RoundVerdict::Commit { values, .. } => {
                assert_eq!(values[0].total_supply, 101);
                assert_eq!(values[0].locked_supply, 11);
            }
            other => panic!("expected commit, got {:?}", other),
        }
        assert!(matches!(r.evaluate(3, 1), RoundVerdict::Pending { .. }));
    }

    #[test]
    fn test_retain_fresh_prunes_old_observations() {
        let mut r = round(&[("a", obs(1, 1, 0))]);
        assert!(r.retain_fresh(100));
        assert!(!r.retain_fresh(101));
        assert!(r.is_empty());
    }

    proptest! {
        #[test]
        fn prop_unanimous_round_commits_iff_quorum(reporters in 1usize..10, quorum in 1usize..10) {
            let mut r = PendingRound::new();
            for i in 0..reporters {
                r.insert(ReporterId::new(format!("r{}", i)), obs(56, 5_000, 10));
            }
            let committed = matches!(r.evaluate(quorum, 0), RoundVerdict::Commit { .. });
            prop_assert_eq!(committed, reporters >= quorum);
        }

        #[test]
        fn prop_commit_needs_strict_majority(agree in 0usize..8, dissent in 0usize..8) {
            let mut r = PendingRound::new();
            for i in 0..agree {
                r.insert(ReporterId::new(format!("a{}", i)), obs(1, 1_000, 0));
            }
            for i in 0..dissent {
                // each dissenter disagrees with everyone else
                r.insert(ReporterId::new(format!("d{}", i)), obs(1, 2_000 + i as u128, 0));
            }
            if let RoundVerdict::Commit { supporters, dissenters, values } = r.evaluate(1, 0) {
                prop_assert!(supporters.len() > dissenters.len());
                prop_assert_eq!(supporters.len() + dissenters.len(), agree + dissent);
                prop_assert!(values[0].locked_supply <= values[0].total_supply);
            }
        }
    }
}
