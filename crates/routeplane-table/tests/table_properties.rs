//! Property tests for the routing-table invariants.

use std::collections::BTreeSet;

use proptest::prelude::*;

use routeplane_core::ModificationTag;
use routeplane_table::{Endpoint, Routes, RoutingKey, RoutingTable};

fn hostname_set() -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set(
        prop::sample::select(vec!["r1", "r2", "r3", "r4", "r5"]),
        0..4,
    )
    .prop_map(|set| set.into_iter().map(|h| h.to_string()).collect())
}

fn endpoint_strategy() -> impl Strategy<Value = Endpoint> {
    (
        prop::sample::select(vec!["i1", "i2", "i3"]),
        1u16..4,
        any::<bool>(),
    )
        .prop_map(|(instance, port_slot, evacuating)| Endpoint {
            instance_id: instance.to_string(),
            host: format!("10.0.0.{port_slot}"),
            port: 61000 + port_slot,
            container_port: 8080,
            evacuating,
            modification_tag: None,
        })
}

fn routes_for(hostnames: Vec<String>, tag: Option<ModificationTag>) -> Routes {
    Routes {
        hostnames,
        log_id: "log-1".to_string(),
        route_service_url: None,
        modification_tag: tag,
    }
}

fn key() -> RoutingKey {
    RoutingKey::new("process-1", 8080)
}

proptest! {
    /// Setting the same routes twice: the second call is an empty diff.
    #[test]
    fn set_routes_is_idempotent(
        hostnames in hostname_set(),
        endpoints in prop::collection::vec(endpoint_strategy(), 0..4),
    ) {
        let table = RoutingTable::new();
        for endpoint in endpoints {
            table.add_or_update_endpoint(&key(), endpoint);
        }

        table.set_routes(&key(), routes_for(hostnames.clone(), None));
        let second = table.set_routes(&key(), routes_for(hostnames, None));
        prop_assert!(second.is_empty());
    }

    /// `route_count` equals the full re-announce cardinality.
    #[test]
    fn route_count_matches_emitted_pairs(
        per_key in prop::collection::vec(
            (hostname_set(), prop::collection::vec(endpoint_strategy(), 0..4)),
            1..4,
        ),
    ) {
        let table = RoutingTable::new();
        for (index, (hostnames, endpoints)) in per_key.iter().enumerate() {
            let key = RoutingKey::new(format!("process-{index}"), 8080);
            table.set_routes(&key, routes_for(hostnames.clone(), None));
            for endpoint in endpoints {
                table.add_or_update_endpoint(&key, endpoint.clone());
            }
        }

        let messages = table.messages_to_emit();
        let pairs: usize = messages
            .registrations
            .iter()
            .map(|message| message.uris.len())
            .sum();
        prop_assert_eq!(table.route_count(), pairs);
    }

    /// Applying tagged route updates in any arrival order converges to
    /// the highest tag's state.
    #[test]
    fn tagged_updates_converge_regardless_of_order(
        order in Just(vec![0usize, 1, 2, 3]).prop_shuffle(),
    ) {
        let updates: Vec<(u32, Vec<&str>)> = vec![
            (0, vec!["a"]),
            (1, vec!["a", "b"]),
            (2, vec!["b"]),
            (3, vec!["b", "c"]),
        ];

        let table = RoutingTable::new();
        table.add_or_update_endpoint(&key(), Endpoint {
            instance_id: "i1".to_string(),
            host: "10.0.0.1".to_string(),
            port: 61001,
            container_port: 8080,
            evacuating: false,
            modification_tag: None,
        });

        for index in order {
            let (tag_index, hostnames) = &updates[index];
            table.set_routes(
                &key(),
                routes_for(
                    hostnames.iter().map(|h| h.to_string()).collect(),
                    Some(ModificationTag::new("epoch-1", *tag_index)),
                ),
            );
        }

        let messages = table.messages_to_emit();
        prop_assert_eq!(messages.registrations.len(), 1);
        prop_assert_eq!(&messages.registrations[0].uris, &vec!["b".to_string(), "c".to_string()]);
    }

    /// Swapping a table with an identically built target is a no-op.
    #[test]
    fn self_swap_is_empty(
        per_key in prop::collection::vec(
            (hostname_set(), prop::collection::vec(endpoint_strategy(), 0..4)),
            1..4,
        ),
    ) {
        let build = || {
            let table = RoutingTable::new();
            for (index, (hostnames, endpoints)) in per_key.iter().enumerate() {
                let key = RoutingKey::new(format!("process-{index}"), 8080);
                table.set_routes(&key, routes_for(hostnames.clone(), None));
                for endpoint in endpoints {
                    table.add_or_update_endpoint(&key, endpoint.clone());
                }
            }
            table
        };

        let table = build();
        let messages = table.swap(build());
        prop_assert!(messages.is_empty());
    }

    /// Swapping onto an empty table registers every hostname-endpoint
    /// pair exactly once, carrying the entry's full hostname set.
    #[test]
    fn swap_from_empty_is_complete(
        hostnames in hostname_set(),
        endpoints in prop::collection::vec(endpoint_strategy(), 0..4),
    ) {
        let target = RoutingTable::new();
        target.set_routes(&key(), routes_for(hostnames.clone(), None));
        let mut distinct = BTreeSet::new();
        for endpoint in &endpoints {
            distinct.insert((endpoint.instance_id.clone(), endpoint.evacuating));
            target.add_or_update_endpoint(&key(), endpoint.clone());
        }

        let table = RoutingTable::new();
        let messages = table.swap(target);

        prop_assert!(messages.unregistrations.is_empty());
        if hostnames.is_empty() {
            prop_assert!(messages.registrations.is_empty());
        } else {
            prop_assert_eq!(messages.registrations.len(), distinct.len());
            for registration in &messages.registrations {
                prop_assert_eq!(&registration.uris, &hostnames);
            }
        }
    }
}
