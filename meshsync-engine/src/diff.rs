//! Change detection between collection snapshots, and handler dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use meshsync_core::{ConfigRecord, Event};

use crate::store::NamespaceMap;

/// One change delivered to event handlers.
#[derive(Debug, Clone)]
pub struct ConfigEvent {
    pub event: Event,
    /// The record after the change (the removed record for `Remove`).
    pub record: Arc<ConfigRecord>,
    /// The record before the change, when there was one.
    pub previous: Option<Arc<ConfigRecord>>,
}

impl ConfigEvent {
    pub fn add(record: Arc<ConfigRecord>) -> Self {
        Self {
            event: Event::Add,
            record,
            previous: None,
        }
    }

    pub fn update(previous: Arc<ConfigRecord>, record: Arc<ConfigRecord>) -> Self {
        Self {
            event: Event::Update,
            record,
            previous: Some(previous),
        }
    }

    pub fn remove(record: Arc<ConfigRecord>) -> Self {
        Self {
            event: Event::Remove,
            record,
            previous: None,
        }
    }
}

pub type EventHandler = Arc<dyn Fn(&ConfigEvent) + Send + Sync>;

/// Handlers per collection type. Registration is additive.
#[derive(Default)]
pub struct HandlerTable {
    handlers: RwLock<HashMap<String, Vec<EventHandler>>>,
}

impl HandlerTable {
    pub fn register(&self, type_name: &str, handler: EventHandler) {
        self.handlers
            .write()
            .entry(type_name.to_string())
            .or_default()
            .push(handler);
    }

    /// Deliver `events` in order to every handler for `type_name`.
    ///
    /// Handlers are cloned out first, so a handler may register further
    /// handlers without deadlocking.
    pub fn dispatch(&self, type_name: &str, events: &[ConfigEvent]) {
        if events.is_empty() {
            return;
        }
        let handlers = self
            .handlers
            .read()
            .get(type_name)
            .cloned()
            .unwrap_or_default();
        if handlers.is_empty() {
            return;
        }
        for event in events {
            tracing::debug!(
                kind = %event.record.type_name,
                event = %event.event,
                namespace = %event.record.namespace,
                name = %event.record.name,
                "dispatching config event"
            );
            for handler in &handlers {
                handler(event);
            }
        }
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read();
        f.debug_map()
            .entries(handlers.iter().map(|(k, v)| (k, v.len())))
            .finish()
    }
}

/// Version-only comparison of two records at the same identity.
pub fn classify_upsert(
    previous: Option<&Arc<ConfigRecord>>,
    next: &Arc<ConfigRecord>,
) -> Option<ConfigEvent> {
    match previous {
        None => Some(ConfigEvent::add(Arc::clone(next))),
        Some(prev) if prev.resource_version != next.resource_version => {
            Some(ConfigEvent::update(Arc::clone(prev), Arc::clone(next)))
        }
        Some(_) => None,
    }
}

/// Events turning `prev` into `next`: adds and updates in namespace/name
/// order, then removals in the same order.
pub fn diff_snapshots(prev: &NamespaceMap, next: &NamespaceMap) -> Vec<ConfigEvent> {
    let mut events: Vec<ConfigEvent> = next
        .iter()
        .flat_map(|(namespace, by_name)| {
            by_name.iter().filter_map(move |(name, record)| {
                let previous = prev.get(namespace).and_then(|m| m.get(name));
                classify_upsert(previous, record)
            })
        })
        .collect();

    events.extend(prev.iter().flat_map(|(namespace, by_name)| {
        by_name
            .iter()
            .filter(move |(name, _)| {
                !next
                    .get(namespace)
                    .is_some_and(|m| m.contains_key(name.as_str()))
            })
            .map(|(_, record)| ConfigEvent::remove(Arc::clone(record)))
    }));

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::insert_into;
    use crate::store::tests::record;
    use parking_lot::Mutex;

    fn map(records: &[(&str, &str, &str)]) -> NamespaceMap {
        let mut m = NamespaceMap::new();
        for (ns, name, version) in records {
            insert_into(&mut m, record("gateway", ns, name, version));
        }
        m
    }

    fn summary(events: &[ConfigEvent]) -> Vec<(Event, String)> {
        events
            .iter()
            .map(|e| (e.event, format!("{}/{}", e.record.namespace, e.record.name)))
            .collect()
    }

    #[test]
    fn adds_updates_then_removes() {
        let prev = map(&[("a", "keep", "1"), ("a", "bump", "1"), ("z", "gone", "1")]);
        let next = map(&[("a", "keep", "1"), ("a", "bump", "2"), ("b", "new", "1")]);

        assert_eq!(
            summary(&diff_snapshots(&prev, &next)),
            vec![
                (Event::Update, "a/bump".to_string()),
                (Event::Add, "b/new".to_string()),
                (Event::Remove, "z/gone".to_string()),
            ]
        );
    }

    #[test]
    fn identical_snapshots_produce_nothing() {
        let m = map(&[("a", "x", "1"), ("b", "y", "3")]);
        assert!(diff_snapshots(&m, &m.clone()).is_empty());
    }

    #[test]
    fn update_carries_previous_record() {
        let prev = map(&[("a", "x", "1")]);
        let next = map(&[("a", "x", "2")]);
        let events = diff_snapshots(&prev, &next);
        assert_eq!(
            events[0].previous.as_ref().map(|p| p.resource_version.as_str()),
            Some("1")
        );
    }

    #[test]
    fn handlers_are_additive_and_ordered() {
        let table = HandlerTable::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let seen = Arc::clone(&seen);
            table.register(
                "gateway",
                Arc::new(move |e: &ConfigEvent| seen.lock().push((tag, e.record.name.clone()))),
            );
        }
        table.dispatch(
            "gateway",
            &[
                ConfigEvent::add(record("gateway", "a", "x", "1")),
                ConfigEvent::add(record("gateway", "a", "y", "1")),
            ],
        );
        table.dispatch("sidecar", &[ConfigEvent::add(record("sidecar", "a", "s", "1"))]);

        assert_eq!(
            *seen.lock(),
            vec![
                ("first", "x".to_string()),
                ("second", "x".to_string()),
                ("first", "y".to_string()),
                ("second", "y".to_string()),
            ]
        );
    }
}
