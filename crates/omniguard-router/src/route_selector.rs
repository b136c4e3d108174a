// ROUTE SELECTION
// Pure, deterministic choice among available protocols for one destination.
//
// SAFETY INVARIANTS:
// 1. The result depends only on the candidate tuples and the preference
// 2. Input order never changes the result (total ordering, final tie-break on id)

use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};

use omniguard_core::ProtocolId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoutePreference {
    /// Minimum fee, then highest security
    Cheapest,
    /// Minimum estimated time, then lowest fee
    Fastest,
    /// Highest security, then lowest fee
    MostSecure,
}

/// Available protocol with its current quote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteCandidate {
    pub protocol_id: ProtocolId,
    pub fee: u128,
    pub estimated_time_secs: u64,
    pub security_level: u8,
}

fn compare(a: &RouteCandidate, b: &RouteCandidate, preference: RoutePreference) -> Ordering {
    let primary = match preference {
        RoutePreference::Cheapest => (a.fee, Reverse(a.security_level)).cmp(&(b.fee, Reverse(b.security_level))),
        RoutePreference::Fastest => (a.estimated_time_secs, a.fee).cmp(&(b.estimated_time_secs, b.fee)),
        RoutePreference::MostSecure => (Reverse(a.security_level), a.fee).cmp(&(Reverse(b.security_level), b.fee)),
    };
    primary.then_with(|| a.protocol_id.cmp(&b.protocol_id))
}

pub fn select_route(candidates: &[RouteCandidate], preference: RoutePreference) -> Option<&RouteCandidate> {
    candidates.iter().min_by(|a, b| compare(a, b, preference))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn candidate(id: &str, fee: u128, time: u64, security: u8) -> RouteCandidate {
        RouteCandidate {
            protocol_id: ProtocolId::new(id),
            fee,
            estimated_time_secs: time,
            security_level: security,
        }
    }

    #[test]
    fn test_preferences() {
        let options = vec![candidate("p1", 10, 10, 9), candidate("p2", 5, 60, 7)];

        let pick = |p| select_route(&options, p).map(|c| c.protocol_id.as_str().to_string());
        assert_eq!(pick(RoutePreference::Cheapest).as_deref(), Some("p2"));
        assert_eq!(pick(RoutePreference::Fastest).as_deref(), Some("p1"));
        assert_eq!(pick(RoutePreference::MostSecure).as_deref(), Some("p1"));
    }

    #[test]
    fn test_tie_breaks() {
        let cheap_tie = vec![candidate("a", 5, 10, 3), candidate("b", 5, 10, 8)];
        assert_eq!(
            select_route(&cheap_tie, RoutePreference::Cheapest).unwrap().protocol_id,
            ProtocolId::new("b")
        );

        let fast_tie = vec![candidate("a", 9, 10, 3), candidate("b", 4, 10, 3)];
        assert_eq!(
            select_route(&fast_tie, RoutePreference::Fastest).unwrap().protocol_id,
            ProtocolId::new("b")
        );

        let secure_tie = vec![candidate("a", 9, 10, 8), candidate("b", 4, 10, 8)];
        assert_eq!(
            select_route(&secure_tie, RoutePreference::MostSecure).unwrap().protocol_id,
            ProtocolId::new("b")
        );

        let identical = vec![candidate("z", 1, 1, 1), candidate("m", 1, 1, 1)];
        assert_eq!(
            select_route(&identical, RoutePreference::Cheapest).unwrap().protocol_id,
            ProtocolId::new("m")
        );
    }

    #[test]
    fn test_no_candidates() {
        assert!(select_route(&[], RoutePreference::Fastest).is_none());
    }

    fn preference() -> impl Strategy<Value = RoutePreference> {
        prop_oneof![
            Just(RoutePreference::Cheapest),
            Just(RoutePreference::Fastest),
            Just(RoutePreference::MostSecure),
        ]
    }

    proptest! {
        #[test]
        fn prop_selection_ignores_input_order(
            tuples in proptest::collection::vec((0u128..20, 0u64..20, 0u8..10), 1..8),
            rotate in 0usize..8,
            pref in preference(),
        ) {
            let candidates: Vec<RouteCandidate> = tuples
                .iter()
                .enumerate()
                .map(|(i, (fee, time, sec))| candidate(&format!("p{}", i), *fee, *time, *sec))
                .collect();
            let mut shuffled = candidates.clone();
            shuffled.rotate_left(rotate % candidates.len());
            shuffled.reverse();

            let expected = select_route(&candidates, pref).cloned();
            let actual = select_route(&shuffled, pref).cloned();
            prop_assert_eq!(expected, actual);
        }

        #[test]
        fn prop_cheapest_has_minimum_fee(
            tuples in proptest::collection::vec((0u128..20, 0u64..20, 0u8..10), 1..8),
        ) {
            let candidates: Vec<RouteCandidate> = tuples
                .iter()
                .enumerate()
                .map(|(i, (fee, time, sec))| candidate(&format!("p{}", i), *fee, *time, *sec))
                .collect();
            let min_fee = candidates.iter().map(|c| c.fee).min();
            let chosen = select_route(&candidates, RoutePreference::Cheapest).map(|c| c.fee);
            prop_assert_eq!(chosen, min_fee);
        }
    }
}
