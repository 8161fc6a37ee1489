//! Distance gradient for search flooding
//!
//! Every searched parameter carries a ttl and the effective distance the
//! previous hop had for it. Moving towards a provider (local distance not
//! lower than the previous one) restores the full ttl; moving away costs one.
//! The origin does not pay for its first hop.

use crate::message::SearchedParameter;
use crate::parameter::Parameter;
use std::collections::{BTreeMap, BTreeSet};

/// State of one searched parameter as forwarded from a node that sees it at
/// `local_distance`
pub fn next_ttl(
    current: SearchedParameter,
    local_distance: u32,
    max_ttl: u32,
    is_origin: bool,
) -> SearchedParameter {
    let previous = current.previous_distance;
    let towards_provider = local_distance >= previous && !(previous == 0 && local_distance == 0);

    let ttl = if towards_provider {
        max_ttl
    } else if is_origin {
        current.ttl
    } else {
        current.ttl.saturating_sub(1)
    };

    SearchedParameter {
        ttl,
        previous_distance: local_distance,
    }
}

/// Advance every searched parameter one hop. Parameters whose ttl ran out are
/// removed and returned.
pub fn advance<F>(
    parameters: &mut BTreeMap<Parameter, SearchedParameter>,
    max_ttl: u32,
    is_origin: bool,
    local_distance: F,
) -> BTreeSet<Parameter>
where
    F: Fn(&Parameter) -> u32,
{
    for (p, state) in parameters.iter_mut() {
        *state = next_ttl(*state, local_distance(p), max_ttl, is_origin);
    }

    let exhausted: BTreeSet<Parameter> = parameters
        .iter()
        .filter(|(_, state)| state.ttl == 0)
        .map(|(p, _)| p.clone())
        .collect();
    for p in &exhausted {
        parameters.remove(p);
    }
    exhausted
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX_TTL: u32 = 5;

    fn state(ttl: u32, previous_distance: u32) -> SearchedParameter {
        SearchedParameter {
            ttl,
            previous_distance,
        }
    }

    #[test]
    fn test_blind_hops_cost_one() {
        let next = next_ttl(state(5, 0), 0, MAX_TTL, false);
        assert_eq!(next, state(4, 0));
    }

    #[test]
    fn test_origin_does_not_pay() {
        let next = next_ttl(state(5, 0), 0, MAX_TTL, true);
        assert_eq!(next, state(5, 0));
    }

    #[test]
    fn test_gradient_restores_ttl() {
        // previous hop saw 3, this node sees 4: closer to the provider
        assert_eq!(next_ttl(state(2, 3), 4, MAX_TTL, false), state(5, 4));
        // equal distance also counts as not moving away
        assert_eq!(next_ttl(state(2, 3), 3, MAX_TTL, false), state(5, 3));
        // moving away
        assert_eq!(next_ttl(state(2, 3), 2, MAX_TTL, false), state(1, 2));
    }

    #[test]
    fn test_parameter_dropped_at_zero() {
        let mut parameters = BTreeMap::from([
            ("I-A".parse::<Parameter>().unwrap(), state(1, 0)),
            ("I-B".parse::<Parameter>().unwrap(), state(1, 0)),
        ]);

        let dropped = advance(&mut parameters, MAX_TTL, false, |p| {
            if p.concept() == "B" {
                2
            } else {
                0
            }
        });

        assert_eq!(dropped.len(), 1);
        assert!(dropped.iter().all(|p| p.concept() == "A"));
        assert_eq!(parameters.len(), 1);
        assert_eq!(parameters.values().next(), Some(&state(MAX_TTL, 2)));
    }

    #[test]
    fn test_chain_reaches_provider_through_gradient() {
        // Chain 0-1-2-3-4-5, provider at 5, max distance 3: nodes 3 and 4
        // see the parameter at 1 and 2, the others not at all.
        let distances = [0, 0, 0, 1, 2];
        let mut current = state(MAX_TTL, 0);
        let mut ttls = Vec::new();
        for (hop, local) in distances.iter().enumerate() {
            current = next_ttl(current, *local, MAX_TTL, hop == 0);
            ttls.push(current.ttl);
        }
        assert_eq!(ttls, vec![5, 4, 3, 5, 5]);
        assert!(current.ttl > 0);
    }
}
