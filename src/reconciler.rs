// Change-notification reconciler
// Turns a raw collection snapshot into a classified diff: which documents
// appeared, which changed, which disappeared, tagged first-sync vs.
// incremental and local-echo vs. remote-origin.

use std::collections::HashMap;

use serde::de::DeserializeOwned;

use crate::error::SyncError;
use crate::remote::RawSnapshot;

/// A document with stable identity. Identity drives the add/delete diff;
/// value equality (`PartialEq`) decides updated vs. unchanged.
pub trait Document: Clone + PartialEq + DeserializeOwned {
    fn id(&self) -> &str;
}

/// A document carrying a secondary grouping key (e.g. a chat message's
/// group), used for per-group fan-out of a batch.
pub trait Grouped {
    fn group_id(&self) -> &str;
}

/// Classified diff produced from one snapshot delivery.
///
/// The three sets are pairwise disjoint by id. `first_sync` is true exactly
/// once per listener attachment: for the delivery that materializes the
/// initial snapshot, which is reported entirely as `added`.
#[derive(Debug, Clone)]
pub struct ChangeBatch<T> {
    pub first_sync: bool,
    /// Whether the triggering write happened on this process.
    pub local_origin: bool,
    pub added: Vec<T>,
    pub updated: Vec<T>,
    pub deleted: Vec<T>,
}

impl<T> ChangeBatch<T> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Stateful differ for one collection.
///
/// Holds the previously delivered snapshot and diffs each new delivery
/// against it. One reconciler per listener attachment; the orchestrator
/// serializes calls, so no internal locking.
pub struct Reconciler<T> {
    collection: String,
    /// None until the first delivery; distinguishes first-sync from an
    /// incremental delivery of an empty collection.
    previous: Option<HashMap<String, T>>,
}

impl<T: Document> Reconciler<T> {
    pub fn new(collection: impl Into<String>) -> Self {
        Reconciler {
            collection: collection.into(),
            previous: None,
        }
    }

    /// Diff a raw snapshot against the cached previous one.
    ///
    /// Items whose payloads fail to decode are skipped and returned as
    /// per-item errors; they never abort the rest of the batch. A skipped
    /// item also stays out of the cache, so a later good payload for the
    /// same id surfaces as `added`.
    ///
    /// Replaces the cache with the decoded snapshot before returning.
    pub fn reconcile(&mut self, snapshot: &RawSnapshot) -> (ChangeBatch<T>, Vec<SyncError>) {
        let mut errors = Vec::new();
        let mut decoded: HashMap<String, T> = HashMap::with_capacity(snapshot.items.len());
        let mut order: Vec<String> = Vec::with_capacity(snapshot.items.len());
        for item in &snapshot.items {
            match serde_json::from_value::<T>(item.payload.clone()) {
                Ok(doc) => {
                    // Duplicate id within one snapshot: last occurrence
                    // wins, in payload and in batch position alike
                    if decoded.insert(item.id.clone(), doc).is_some() {
                        order.retain(|existing| existing != &item.id);
                    }
                    order.push(item.id.clone());
                }
                Err(source) => errors.push(SyncError::Decode {
                    collection: self.collection.clone(),
                    id: item.id.clone(),
                    source,
                }),
            }
        }

        let batch = match self.previous.take() {
            // First delivery since attachment: the whole snapshot is
            // reported as pure creation, whatever the payloads look like.
            None => ChangeBatch {
                first_sync: true,
                local_origin: snapshot.local_origin,
                added: order.iter().filter_map(|id| decoded.get(id).cloned()).collect(),
                updated: Vec::new(),
                deleted: Vec::new(),
            },
            Some(old) => {
                let mut added = Vec::new();
                let mut updated = Vec::new();
                for id in &order {
                    let doc = &decoded[id];
                    match old.get(id) {
                        None => added.push(doc.clone()),
                        Some(prev) if prev != doc => updated.push(doc.clone()),
                        Some(_) => {} // unchanged, omitted
                    }
                }
                let deleted = old
                    .into_iter()
                    .filter(|(id, _)| !decoded.contains_key(id))
                    .map(|(_, doc)| doc)
                    .collect();
                ChangeBatch {
                    first_sync: false,
                    local_origin: snapshot.local_origin,
                    added,
                    updated,
                    deleted,
                }
            }
        };

        self.previous = Some(decoded);
        (batch, errors)
    }

    /// Forget the cached snapshot so the next delivery is reported as a
    /// first sync again. Called when a listener is re-attached.
    pub fn reset(&mut self) {
        self.previous = None;
    }
}

/// Split a batch into per-group sub-batches keyed by `group_id`, preserving
/// the first-sync and local-origin flags on every sub-batch.
pub fn fan_out_by_group<T: Document + Grouped>(
    batch: &ChangeBatch<T>,
) -> HashMap<String, ChangeBatch<T>> {
    fn sub_batch<'a, T>(
        groups: &'a mut HashMap<String, ChangeBatch<T>>,
        group: &str,
        template: &ChangeBatch<T>,
    ) -> &'a mut ChangeBatch<T> {
        groups.entry(group.to_string()).or_insert_with(|| ChangeBatch {
            first_sync: template.first_sync,
            local_origin: template.local_origin,
            added: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
        })
    }

    let mut groups: HashMap<String, ChangeBatch<T>> = HashMap::new();
    for doc in &batch.added {
        sub_batch(&mut groups, doc.group_id(), batch).added.push(doc.clone());
    }
    for doc in &batch.updated {
        sub_batch(&mut groups, doc.group_id(), batch).updated.push(doc.clone());
    }
    for doc in &batch.deleted {
        sub_batch(&mut groups, doc.group_id(), batch).deleted.push(doc.clone());
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RawItem;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::collections::HashSet;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Doc {
        id: String,
        body: String,
    }

    impl Document for Doc {
        fn id(&self) -> &str {
            &self.id
        }
    }

    fn item(id: &str, body: &str) -> RawItem {
        RawItem::new(id, json!({"id": id, "body": body}))
    }

    fn snapshot(items: Vec<RawItem>, local_origin: bool) -> RawSnapshot {
        RawSnapshot { items, local_origin }
    }

    #[test]
    fn test_first_delivery_is_pure_creation() {
        let mut rec = Reconciler::<Doc>::new("chat");
        let (batch, errors) =
            rec.reconcile(&snapshot(vec![item("a", "1"), item("b", "2")], false));

        assert!(errors.is_empty());
        assert!(batch.first_sync);
        assert_eq!(batch.added.len(), 2);
        assert!(batch.updated.is_empty());
        assert!(batch.deleted.is_empty());
    }

    #[test]
    fn test_incremental_diff() {
        // Second snapshot removes a, changes b
        let mut rec = Reconciler::<Doc>::new("chat");
        rec.reconcile(&snapshot(vec![item("a", "1"), item("b", "2")], false));

        let (batch, errors) = rec.reconcile(&snapshot(vec![item("b", "2x")], false));
        assert!(errors.is_empty());
        assert!(!batch.first_sync);
        assert!(batch.added.is_empty());
        assert_eq!(batch.updated.len(), 1);
        assert_eq!(batch.updated[0].id, "b");
        assert_eq!(batch.deleted.len(), 1);
        assert_eq!(batch.deleted[0].id, "a");
    }

    #[test]
    fn test_unchanged_items_omitted() {
        let mut rec = Reconciler::<Doc>::new("chat");
        rec.reconcile(&snapshot(vec![item("a", "1"), item("b", "2")], false));

        let (batch, _) =
            rec.reconcile(&snapshot(vec![item("a", "1"), item("b", "2"), item("c", "3")], false));
        assert_eq!(batch.added.len(), 1);
        assert_eq!(batch.added[0].id, "c");
        assert!(batch.updated.is_empty());
        assert!(batch.deleted.is_empty());
    }

    #[test]
    fn test_diff_partitions_id_union() {
        // added/updated/deleted plus unchanged-by-omission exactly partition
        // ids(old) ∪ ids(new)
        let mut rec = Reconciler::<Doc>::new("chat");
        rec.reconcile(&snapshot(
            vec![item("a", "1"), item("b", "2"), item("c", "3")],
            false,
        ));
        let (batch, _) = rec.reconcile(&snapshot(
            vec![item("b", "2x"), item("c", "3"), item("d", "4")],
            false,
        ));

        let mut seen: HashSet<&str> = HashSet::new();
        for doc in batch.added.iter().chain(&batch.updated).chain(&batch.deleted) {
            assert!(seen.insert(doc.id()), "id {} classified twice", doc.id());
        }
        assert!(seen.contains("a") && seen.contains("b") && seen.contains("d"));
        assert!(!seen.contains("c")); // unchanged
    }

    #[test]
    fn test_local_origin_passed_through() {
        let mut rec = Reconciler::<Doc>::new("chat");
        let (batch, _) = rec.reconcile(&snapshot(vec![item("a", "1")], true));
        assert!(batch.local_origin);
        let (batch, _) = rec.reconcile(&snapshot(vec![item("a", "2")], false));
        assert!(!batch.local_origin);
    }

    #[test]
    fn test_bad_item_skipped_not_fatal() {
        let mut rec = Reconciler::<Doc>::new("chat");
        let (batch, errors) = rec.reconcile(&snapshot(
            vec![item("a", "1"), RawItem::new("broken", json!({"id": 42}))],
            false,
        ));

        assert_eq!(batch.added.len(), 1);
        assert_eq!(batch.added[0].id, "a");
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], SyncError::Decode { id, .. } if id == "broken"));
    }

    #[test]
    fn test_bad_item_resurfaces_as_added_once_decodable() {
        let mut rec = Reconciler::<Doc>::new("chat");
        rec.reconcile(&snapshot(
            vec![item("a", "1"), RawItem::new("b", json!({"id": 42}))],
            false,
        ));

        let (batch, errors) = rec.reconcile(&snapshot(vec![item("a", "1"), item("b", "2")], false));
        assert!(errors.is_empty());
        assert_eq!(batch.added.len(), 1);
        assert_eq!(batch.added[0].id, "b");
    }

    #[test]
    fn test_duplicate_id_last_occurrence_wins() {
        let mut rec = Reconciler::<Doc>::new("chat");
        let (batch, errors) = rec.reconcile(&snapshot(
            vec![item("a", "old"), item("b", "1"), item("a", "new")],
            false,
        ));

        assert!(errors.is_empty());
        assert_eq!(batch.added.len(), 2);
        assert_eq!(batch.added[0].id, "b");
        assert_eq!(batch.added[1].id, "a");
        assert_eq!(batch.added[1].body, "new");

        // the cache kept the winning payload: re-delivering it is unchanged
        let (batch, _) = rec.reconcile(&snapshot(vec![item("a", "new"), item("b", "1")], false));
        assert!(batch.is_empty());
    }

    #[test]
    fn test_reset_restores_first_sync() {
        let mut rec = Reconciler::<Doc>::new("chat");
        rec.reconcile(&snapshot(vec![item("a", "1")], false));
        rec.reset();

        let (batch, _) = rec.reconcile(&snapshot(vec![item("a", "1")], false));
        assert!(batch.first_sync);
        assert_eq!(batch.added.len(), 1);
    }

    #[test]
    fn test_empty_first_snapshot_still_first_sync() {
        let mut rec = Reconciler::<Doc>::new("chat");
        let (batch, _) = rec.reconcile(&snapshot(vec![], false));
        assert!(batch.first_sync);
        assert!(batch.is_empty());

        // and the next empty delivery is incremental
        let (batch, _) = rec.reconcile(&snapshot(vec![], false));
        assert!(!batch.first_sync);
    }
}
