//! The routing table and its diff computation.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

use routeplane_core::{tag_allows_removal, tag_succeeded_by, ActualRecord, DesiredRecord, ModificationTag};

use crate::by_key::{endpoints_by_routing_key, routes_by_routing_key};
use crate::entry::{Endpoint, RoutableEntry, Routes, RoutingKey};
use crate::message::{MessagesToEmit, RegistryMessage};

/// Authoritative map of `RoutingKey → RoutableEntry`.
///
/// Single-writer: every mutation serializes through one mutex, and
/// each mutator returns the diff for the state transition it caused.
/// An entry is dropped once both its hostname and endpoint sets are
/// empty.
#[derive(Debug, Default)]
pub struct RoutingTable {
    entries: Mutex<HashMap<RoutingKey, RoutableEntry>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a fresh table from full desired and actual record lists,
    /// the target shape handed to [`RoutingTable::swap`].
    pub fn from_records(desireds: &[DesiredRecord], actuals: &[ActualRecord]) -> Self {
        let mut entries: HashMap<RoutingKey, RoutableEntry> = HashMap::new();

        for (key, routes) in routes_by_routing_key(desireds) {
            let entry = entries.entry(key).or_default();
            apply_routes(entry, &routes);
        }

        for (key, endpoints) in endpoints_by_routing_key(actuals) {
            let entry = entries.entry(key).or_default();
            for endpoint in endpoints {
                entry.endpoints.insert(endpoint.key(), endpoint);
            }
        }

        Self {
            entries: Mutex::new(entries),
        }
    }

    /// Set the declared routes for a key.
    ///
    /// Dropped silently when the stored tag is not superseded by the
    /// carried tag (equal tags are a no-op).
    pub fn set_routes(&self, key: &RoutingKey, routes: Routes) -> MessagesToEmit {
        let mut entries = self.entries.lock().expect("entries lock");

        let current = entries.get(key);
        if let Some(current) = current {
            if !tag_succeeded_by(
                current.modification_tag.as_ref(),
                routes.modification_tag.as_ref(),
            ) {
                return MessagesToEmit::default();
            }
        }

        let mut new_entry = current.cloned().unwrap_or_default();
        apply_routes(&mut new_entry, &routes);

        let messages = transition(entries.get(key), Some(&new_entry));
        debug!(
            process_id = %key.process_id,
            container_port = key.container_port,
            hostnames = new_entry.hostnames.len(),
            "routes set"
        );
        store(&mut entries, key, new_entry);
        messages
    }

    /// Remove the declared routes for a key, keeping its endpoints.
    ///
    /// Applies unless the stored tag is strictly newer than the
    /// carried one.
    pub fn remove_routes(&self, key: &RoutingKey, tag: Option<&ModificationTag>) -> MessagesToEmit {
        let mut entries = self.entries.lock().expect("entries lock");

        let Some(current) = entries.get(key) else {
            return MessagesToEmit::default();
        };
        if !tag_allows_removal(current.modification_tag.as_ref(), tag) {
            return MessagesToEmit::default();
        }

        let mut new_entry = RoutableEntry::default();
        new_entry.endpoints = current.endpoints.clone();

        let messages = transition(Some(current), Some(&new_entry));
        debug!(
            process_id = %key.process_id,
            container_port = key.container_port,
            "routes removed"
        );
        store(&mut entries, key, new_entry);
        messages
    }

    /// Add a running endpoint to a key, or refresh the stored one.
    ///
    /// An update whose tag is superseded by the stored endpoint's tag
    /// is dropped; an equal tag refreshes without producing a diff.
    pub fn add_or_update_endpoint(&self, key: &RoutingKey, endpoint: Endpoint) -> MessagesToEmit {
        let mut entries = self.entries.lock().expect("entries lock");

        if let Some(current) = entries.get(key) {
            if let Some(existing) = current.endpoints.get(&endpoint.key()) {
                if !tag_succeeded_by(
                    existing.modification_tag.as_ref(),
                    endpoint.modification_tag.as_ref(),
                ) {
                    return MessagesToEmit::default();
                }
            }
        }

        let mut new_entry = entries.get(key).cloned().unwrap_or_default();
        new_entry.endpoints.insert(endpoint.key(), endpoint);

        let messages = transition(entries.get(key), Some(&new_entry));
        store(&mut entries, key, new_entry);
        messages
    }

    /// Remove an endpoint from a key.
    ///
    /// Removes only the exact (instance, evacuating) variant, and only
    /// when the stored endpoint's tag is not strictly newer.
    pub fn remove_endpoint(&self, key: &RoutingKey, endpoint: &Endpoint) -> MessagesToEmit {
        let mut entries = self.entries.lock().expect("entries lock");

        let Some(current) = entries.get(key) else {
            return MessagesToEmit::default();
        };
        let Some(existing) = current.endpoints.get(&endpoint.key()) else {
            return MessagesToEmit::default();
        };
        if !tag_allows_removal(
            existing.modification_tag.as_ref(),
            endpoint.modification_tag.as_ref(),
        ) {
            return MessagesToEmit::default();
        }

        let mut new_entry = current.clone();
        new_entry.endpoints.remove(&endpoint.key());

        let messages = transition(Some(current), Some(&new_entry));
        store(&mut entries, key, new_entry);
        messages
    }

    /// Replace the table contents with a freshly built target and
    /// return the aggregate diff between the two.
    pub fn swap(&self, target: RoutingTable) -> MessagesToEmit {
        let mut entries = self.entries.lock().expect("entries lock");
        let new_entries = target.entries.into_inner().expect("entries lock");

        let mut messages = MessagesToEmit::default();
        for (key, new_entry) in &new_entries {
            messages.extend(transition(entries.get(key), Some(new_entry)));
        }
        for (key, old_entry) in entries.iter() {
            if !new_entries.contains_key(key) {
                messages.extend(transition(Some(old_entry), None));
            }
        }

        *entries = new_entries;
        messages
    }

    /// Full re-announce: one registration per endpoint of every entry
    /// that has at least one hostname.
    pub fn messages_to_emit(&self) -> MessagesToEmit {
        let entries = self.entries.lock().expect("entries lock");

        let mut messages = MessagesToEmit::default();
        for entry in entries.values() {
            if entry.hostnames.is_empty() {
                continue;
            }
            let routes = entry.routes();
            for endpoint in entry.endpoints.values() {
                messages
                    .registrations
                    .push(RegistryMessage::for_endpoint(endpoint, &routes));
            }
        }
        messages
    }

    /// Sum of `|hostnames| × |endpoints|` across all entries.
    pub fn route_count(&self) -> usize {
        let entries = self.entries.lock().expect("entries lock");
        entries
            .values()
            .map(|entry| entry.hostnames.len() * entry.endpoints.len())
            .sum()
    }
}

fn apply_routes(entry: &mut RoutableEntry, routes: &Routes) {
    entry.hostnames = routes.hostnames.iter().cloned().collect();
    entry.log_id = routes.log_id.clone();
    entry.route_service_url = routes.route_service_url.clone();
    entry.modification_tag = routes.modification_tag.clone();
}

fn store(
    entries: &mut HashMap<RoutingKey, RoutableEntry>,
    key: &RoutingKey,
    new_entry: RoutableEntry,
) {
    if new_entry.is_empty() {
        entries.remove(key);
    } else {
        entries.insert(key.clone(), new_entry);
    }
}

/// Diff one entry transition into register/unregister messages.
fn transition(old: Option<&RoutableEntry>, new: Option<&RoutableEntry>) -> MessagesToEmit {
    MessagesToEmit {
        registrations: registrations_for(old, new),
        unregistrations: unregistrations_for(old, new),
    }
}

fn registrations_for(old: Option<&RoutableEntry>, new: Option<&RoutableEntry>) -> Vec<RegistryMessage> {
    let Some(new) = new else {
        return Vec::new();
    };
    if new.hostnames.is_empty() {
        return Vec::new();
    }

    let routes = new.routes();
    let hostnames_changed = match old {
        Some(old) => old.hostnames != new.hostnames,
        None => true,
    };

    new.endpoints
        .values()
        .filter(|endpoint| {
            // When the hostname set changed every endpoint re-registers
            // with the new set; otherwise only new endpoints register.
            hostnames_changed || !old.map_or(false, |old| old.has_endpoint(endpoint))
        })
        .map(|endpoint| RegistryMessage::for_endpoint(endpoint, &routes))
        .collect()
}

fn unregistrations_for(
    old: Option<&RoutableEntry>,
    new: Option<&RoutableEntry>,
) -> Vec<RegistryMessage> {
    let Some(old) = old else {
        return Vec::new();
    };
    if old.hostnames.is_empty() {
        return Vec::new();
    }

    let mut messages = Vec::new();
    let old_routes = old.routes();

    // A departed endpoint gives up every hostname it previously held.
    let mut still_present = Vec::new();
    for endpoint in old.endpoints.values() {
        if new.map_or(false, |new| new.has_endpoint(endpoint)) {
            still_present.push(endpoint);
        } else {
            messages.push(RegistryMessage::for_endpoint(endpoint, &old_routes));
        }
    }

    // Surviving endpoints give up only the hostnames that disappeared,
    // so the router decrements those alone.
    let vanished: Vec<String> = old
        .hostnames
        .iter()
        .filter(|hostname| !new.map_or(false, |new| new.has_hostname(hostname)))
        .cloned()
        .collect();
    if !vanished.is_empty() {
        let vanished_routes = Routes {
            hostnames: vanished,
            log_id: old.log_id.clone(),
            route_service_url: old.route_service_url.clone(),
            modification_tag: None,
        };
        for endpoint in still_present {
            messages.push(RegistryMessage::for_endpoint(endpoint, &vanished_routes));
        }
    }

    messages
}
