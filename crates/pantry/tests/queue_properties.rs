//! Property tests for the pending mutation queue.

use pantry::pantry_api::{EntityPayload, MutationOperation};
use pantry::testing::fixtures;
use pantry::{LocalStore, PendingMutationQueue};
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Op {
    Upsert { key: u8, title: String },
    Delete { key: u8 },
    Remove { key: u8 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..6, "[a-z]{1,8}").prop_map(|(key, title)| Op::Upsert { key, title }),
        (0u8..6).prop_map(|key| Op::Delete { key }),
        (0u8..6).prop_map(|key| Op::Remove { key }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// The queue behaves like a map from URI to the latest intent, ordered
    /// by when each URI was last written.
    #[test]
    fn queue_keeps_latest_intent_per_uri(ops in prop::collection::vec(op_strategy(), 1..30)) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let store = Arc::new(LocalStore::open_in_memory().await.unwrap());
            let queue = PendingMutationQueue::new(store);

            // key -> (write sequence, operation, title)
            let mut model: HashMap<u8, (usize, MutationOperation, Option<String>)> = HashMap::new();
            for (seq, op) in ops.iter().enumerate() {
                match op {
                    Op::Upsert { key, title } => {
                        let payload = EntityPayload::Recipe(fixtures::recipe_record(title, &[]));
                        queue
                            .enqueue(fixtures::recipe_uri(&format!("k{key}")), MutationOperation::Update, Some(payload))
                            .await
                            .unwrap();
                        model.insert(*key, (seq, MutationOperation::Update, Some(title.clone())));
                    }
                    Op::Delete { key } => {
                        queue
                            .enqueue(fixtures::recipe_uri(&format!("k{key}")), MutationOperation::Delete, None)
                            .await
                            .unwrap();
                        model.insert(*key, (seq, MutationOperation::Delete, None));
                    }
                    Op::Remove { key } => {
                        let removed = queue.remove(&fixtures::recipe_uri(&format!("k{key}"))).await.unwrap();
                        assert_eq!(removed, model.remove(key).is_some());
                    }
                }
            }

            let mut expected: Vec<(u8, (usize, MutationOperation, Option<String>))> = model.into_iter().collect();
            expected.sort_by_key(|(_, (seq, _, _))| *seq);

            let entries = queue.list().await.unwrap();
            assert_eq!(entries.len(), expected.len());
            for (entry, (key, (_, operation, title))) in entries.iter().zip(expected) {
                assert_eq!(entry.uri.record_key(), format!("k{key}"));
                assert_eq!(entry.operation, operation);
                let queued_title = match &entry.payload {
                    Some(EntityPayload::Recipe(record)) => Some(record.title.clone()),
                    _ => None,
                };
                assert_eq!(queued_title, title);
            }
            for pair in entries.windows(2) {
                assert!(pair[0].timestamp < pair[1].timestamp);
            }
        });
    }
}
