//! Property-based tests for queue ordering

use farmsync::local_db::LocalDatabase;
use farmsync::offline::{Method, NewOperation, OperationQueue, Priority};
use farmsync::sync::events::event_channel;
use proptest::prelude::*;

fn priority() -> impl Strategy<Value = Priority> {
    prop_oneof![Just(Priority::High), Just(Priority::Normal), Just(Priority::Low)]
}

/// Enqueue one delete per priority and return the replay order as indices
fn replay_order(priorities: &[Priority], batch: usize) -> (Vec<usize>, Vec<usize>) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async {
        let db = LocalDatabase::in_memory().await.unwrap();
        let queue = OperationQueue::open(db, event_channel(4)).await.unwrap();
        for (index, priority) in priorities.iter().enumerate() {
            queue
                .enqueue(NewOperation::new(Method::Delete, format!("/tasks/{}", index)).priority(*priority))
                .await
                .unwrap();
        }

        let index_of = |path: &str| path.trim_start_matches("/tasks/").parse::<usize>().unwrap();
        let all = queue.peek_all().await.unwrap();
        let head = queue.dequeue_batch(batch).await.unwrap();
        (
            all.iter().map(|op| index_of(&op.path)).collect(),
            head.iter().map(|op| index_of(&op.path)).collect(),
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_priority_tiers_keep_enqueue_order(
        priorities in prop::collection::vec(priority(), 1..24),
        batch in 1usize..8,
    ) {
        let (order, head) = replay_order(&priorities, batch);

        let mut expected: Vec<usize> = (0..priorities.len()).collect();
        expected.sort_by_key(|index| priorities[*index]);
        prop_assert_eq!(&order, &expected);

        let take = batch.min(order.len());
        prop_assert_eq!(&head[..], &order[..take]);
    }
}
