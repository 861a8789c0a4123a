//! Phase routing: decide which phase (if any) processes a queue item.
//!
//! A URL's `phase_id` names its target phase; the phase's URLFilter gates
//! eligibility, and ineligible items chase the transition chain until a
//! phase accepts them or the chain runs out, in which case the item is
//! dropped. Depth beyond the workflow's `max_depth` is never routed.

use std::collections::HashSet;

use crate::model::{Phase, UrlQueueItem};

/// Recorded as the skip reason when no phase accepts an item
pub const DROP_NO_MATCHING_PHASE: &str = "no_matching_phase";

#[derive(Debug)]
pub enum RouteDecision<'a> {
    /// Run the item through this phase
    Run(&'a Phase),
    /// Mark the item skipped with this reason
    Drop(&'static str),
}

/// Resolve the phase for a queue item.
///
/// Items with an unset or stale `phase_id` start at the first phase.
pub fn route<'a>(
    item: &UrlQueueItem,
    phases: &'a [Phase],
    max_depth: i32,
) -> RouteDecision<'a> {
    if item.depth > max_depth {
        return RouteDecision::Drop(DROP_NO_MATCHING_PHASE);
    }

    let Some(first) = phases.first() else {
        return RouteDecision::Drop(DROP_NO_MATCHING_PHASE);
    };

    let mut current = item
        .phase_id
        .as_deref()
        .and_then(|id| phases.iter().find(|p| p.id == id))
        .unwrap_or(first);

    // Transition chains are finite; the visited set guards against cycles
    // in hand-written configs
    let mut visited: HashSet<&str> = HashSet::new();
    loop {
        if !visited.insert(current.id.as_str()) {
            return RouteDecision::Drop(DROP_NO_MATCHING_PHASE);
        }

        if accepts(current, item) {
            return RouteDecision::Run(current);
        }

        let Some(next) = current
            .transition
            .as_ref()
            .and_then(|t| phases.iter().find(|p| p.id == t.next_phase))
        else {
            return RouteDecision::Drop(DROP_NO_MATCHING_PHASE);
        };
        current = next;
    }
}

/// Evaluate a phase's URLFilter against an item
fn accepts(phase: &Phase, item: &UrlQueueItem) -> bool {
    let Some(filter) = &phase.url_filter else {
        return true;
    };
    if let Some(depth) = filter.depth
        && item.depth != depth
    {
        return false;
    }
    if let Some(markers) = &filter.markers
        && !markers.contains(&item.marker)
    {
        return false;
    }
    true
}

/// Marker for a discovered URL: the discovering node's declared marker when
/// present, otherwise inherited from the parent
#[must_use]
pub fn resolve_marker(declared: Option<&str>, parent_marker: &str) -> String {
    match declared {
        Some(marker) if !marker.is_empty() => marker.to_string(),
        _ => parent_marker.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PhaseKind, QueueItemStatus, Transition, TransitionCondition, UrlFilter};
    use chrono::Utc;
    use uuid::Uuid;

    fn phase(id: &str, filter: Option<UrlFilter>, next: Option<&str>) -> Phase {
        Phase {
            id: id.to_string(),
            kind: PhaseKind::Discovery,
            name: id.to_string(),
            nodes: vec![],
            url_filter: filter,
            transition: next.map(|n| Transition {
                condition: TransitionCondition::AllNodesComplete,
                next_phase: n.to_string(),
            }),
        }
    }

    fn item(depth: i32, marker: &str, phase_id: Option<&str>) -> UrlQueueItem {
        UrlQueueItem {
            id: Uuid::new_v4(),
            execution_id: Uuid::new_v4(),
            url: "https://site.test/p/1".into(),
            url_hash: "deadbeef".into(),
            depth,
            priority: 0,
            status: QueueItemStatus::Processing,
            parent_url_id: None,
            discovered_by_node: None,
            marker: marker.to_string(),
            phase_id: phase_id.map(ToString::to_string),
            retry_count: 0,
            last_error: None,
            skip_reason: None,
            created_at: Utc::now(),
            processed_at: None,
            lease_held_at: None,
            lease_held_by: None,
            metadata: serde_json::Value::Null,
        }
    }

    fn markers(tags: &[&str]) -> UrlFilter {
        UrlFilter {
            depth: None,
            markers: Some(tags.iter().map(ToString::to_string).collect()),
        }
    }

    #[test]
    fn unset_phase_id_falls_back_to_first() {
        let phases = vec![phase("a", None, None)];
        match route(&item(0, "", None), &phases, 3) {
            RouteDecision::Run(p) => assert_eq!(p.id, "a"),
            RouteDecision::Drop(_) => panic!("expected run"),
        }
    }

    #[test]
    fn marker_mismatch_chases_transition() {
        let phases = vec![
            phase("discover", Some(markers(&["listing"])), Some("extract")),
            phase("extract", Some(markers(&["product"])), None),
        ];
        match route(&item(1, "product", Some("discover")), &phases, 3) {
            RouteDecision::Run(p) => assert_eq!(p.id, "extract"),
            RouteDecision::Drop(_) => panic!("expected run"),
        }
    }

    #[test]
    fn exhausted_chain_drops() {
        let phases = vec![phase("only", Some(markers(&["product"])), None)];
        match route(&item(1, "related", Some("only")), &phases, 3) {
            RouteDecision::Drop(reason) => assert_eq!(reason, DROP_NO_MATCHING_PHASE),
            RouteDecision::Run(_) => panic!("expected drop"),
        }
    }

    #[test]
    fn depth_beyond_cap_drops() {
        let phases = vec![phase("a", None, None)];
        match route(&item(2, "product", Some("a")), &phases, 1) {
            RouteDecision::Drop(reason) => assert_eq!(reason, DROP_NO_MATCHING_PHASE),
            RouteDecision::Run(_) => panic!("expected drop"),
        }
    }

    #[test]
    fn depth_filter_requires_exact_match() {
        let phases = vec![phase(
            "a",
            Some(UrlFilter {
                depth: Some(1),
                markers: None,
            }),
            None,
        )];
        assert!(matches!(
            route(&item(1, "", Some("a")), &phases, 3),
            RouteDecision::Run(_)
        ));
        assert!(matches!(
            route(&item(0, "", Some("a")), &phases, 3),
            RouteDecision::Drop(_)
        ));
    }

    #[test]
    fn transition_cycles_terminate() {
        let phases = vec![
            phase("a", Some(markers(&["x"])), Some("b")),
            phase("b", Some(markers(&["y"])), Some("a")),
        ];
        assert!(matches!(
            route(&item(0, "", Some("a")), &phases, 3),
            RouteDecision::Drop(_)
        ));
    }

    #[test]
    fn marker_resolution() {
        assert_eq!(resolve_marker(Some("product"), "listing"), "product");
        assert_eq!(resolve_marker(None, "listing"), "listing");
        assert_eq!(resolve_marker(Some(""), "listing"), "listing");
    }
}
