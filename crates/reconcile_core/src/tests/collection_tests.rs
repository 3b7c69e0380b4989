use super::*;
use crate::{
    queue::transform,
    test_support::{Gate, GateCalls},
};

type Titles = CollectionController<u32, String, String>;

fn collection() -> (Titles, GateCalls<String, String>, GateCalls<Vec<u32>, Vec<u32>>) {
    let (entities, entity_calls) = Gate::<String, String>::new();
    let (orders, order_calls) = Gate::<Vec<u32>, Vec<u32>>::new();
    let controller = CollectionController::new(
        vec![
            (1, "one".to_string()),
            (2, "two".to_string()),
            (3, "three".to_string()),
        ],
        transform(|_: &String, next: &String| next.clone()),
        entities,
        orders,
    )
    .expect("collection");
    (controller, entity_calls, order_calls)
}

#[tokio::test]
async fn updates_are_independent_per_entity() {
    let (titles, mut calls, _orders) = collection();
    let mut events = titles.subscribe();

    let first = titles.update_one(&1, "ONE".to_string()).expect("update 1");
    let second = titles.update_one(&2, "TWO".to_string()).expect("update 2");
    assert_eq!(titles.pending_ids(), vec![1, 2]);
    assert!(!titles.is_pending(&3));

    let optimistic = events.recv().await.expect("event");
    assert_eq!((optimistic.id, optimistic.state.as_str()), (1, "ONE"));

    let (_, reply1) = calls.next().await;
    let (_, reply2) = calls.next().await;
    reply1.send(Err(anyhow!("title taken"))).expect("reply");
    assert!(!first.await.is_success());

    // entity 2 is untouched by entity 1's failure
    assert_eq!(titles.get(&1).as_deref(), Some("one"));
    assert_eq!(titles.get(&2).as_deref(), Some("TWO"));
    assert!(titles.is_pending(&2));
    let errors = titles.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors.contains_key(&1));

    reply2.send(Ok("TWO".to_string())).expect("reply");
    assert!(second.await.is_success());
    assert!(titles.pending_ids().is_empty());
    assert_eq!(
        titles.items(),
        vec![
            (1, "one".to_string()),
            (2, "TWO".to_string()),
            (3, "three".to_string()),
        ]
    );

    titles.clear_error(&1);
    assert!(titles.errors().is_empty());
}

#[tokio::test]
async fn update_of_unknown_entity_is_rejected() {
    let (titles, mut calls, _orders) = collection();
    let err = titles
        .update_one(&42, "nope".to_string())
        .err()
        .expect("unknown entity");
    assert!(matches!(err, EngineError::UnknownEntity(_)));
    assert!(!calls.has_waiting());
}

#[tokio::test]
async fn reorder_displays_immediately_and_adopts_server_order() {
    let (titles, _calls, mut orders) = collection();
    let mut events = titles.subscribe_order();

    let submission = titles.reorder(vec![3, 1, 2]).expect("reorder");
    assert_eq!(titles.order(), vec![3, 1, 2]);
    assert!(titles.is_reorder_pending());
    assert_eq!(titles.active_reorder(), Some(submission.token()));

    let (sent, reply) = orders.next().await;
    assert_eq!(sent, vec![3, 1, 2]);
    reply.send(Ok(vec![3, 1, 2])).expect("reply");

    match submission.await {
        ReorderOutcome::Succeeded(order) => assert_eq!(order, vec![3, 1, 2]),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(!titles.is_reorder_pending());

    let optimistic = events.recv().await.expect("optimistic");
    assert!(optimistic.pending);
    let settled = events.recv().await.expect("settled");
    assert_eq!(
        settled,
        OrderEvent {
            order: vec![3, 1, 2],
            pending: false
        }
    );
}

#[tokio::test]
async fn failed_reorder_reverts_to_captured_order() {
    let (titles, _calls, mut orders) = collection();
    let submission = titles.reorder(vec![2, 3, 1]).expect("reorder");

    let (_, reply) = orders.next().await;
    reply.send(Err(anyhow!("stale list"))).expect("reply");

    assert!(matches!(submission.await, ReorderOutcome::Failed(_)));
    assert_eq!(titles.order(), vec![1, 2, 3]);
}

#[tokio::test]
async fn superseded_reorder_success_is_ignored() {
    let (titles, _calls, mut orders) = collection();
    let mut events = titles.subscribe_order();

    let r1 = titles.reorder(vec![3, 2, 1]).expect("r1");
    let r2 = titles.reorder(vec![2, 3, 1]).expect("r2");
    assert_ne!(r1.token(), r2.token());

    let (_, reply1) = orders.next().await;
    let (_, reply2) = orders.next().await;

    reply1.send(Ok(vec![3, 2, 1])).expect("reply");
    assert!(r1.await.is_superseded());
    assert_eq!(titles.order(), vec![2, 3, 1]);
    assert!(titles.is_reorder_pending());

    reply2.send(Ok(vec![2, 3, 1])).expect("reply");
    assert!(r2.await.is_success());
    assert_eq!(titles.order(), vec![2, 3, 1]);

    let seen: Vec<_> = std::iter::from_fn(|| events.try_recv().ok()).collect();
    assert_eq!(
        seen,
        vec![
            OrderEvent { order: vec![3, 2, 1], pending: true },
            OrderEvent { order: vec![2, 3, 1], pending: true },
            OrderEvent { order: vec![2, 3, 1], pending: false },
        ]
    );
}

#[tokio::test]
async fn superseded_reorder_failure_is_ignored() {
    let (titles, _calls, mut orders) = collection();

    let r1 = titles.reorder(vec![3, 2, 1]).expect("r1");
    let r2 = titles.reorder(vec![2, 3, 1]).expect("r2");
    let (_, reply1) = orders.next().await;
    let (_, reply2) = orders.next().await;

    reply1.send(Err(anyhow!("timeout"))).expect("reply");
    assert!(r1.await.is_superseded());
    assert_eq!(titles.order(), vec![2, 3, 1]);

    // r2's rollback target is what was displayed when r2 was submitted
    reply2.send(Err(anyhow!("timeout"))).expect("reply");
    assert!(matches!(r2.await, ReorderOutcome::Failed(_)));
    assert_eq!(titles.order(), vec![3, 2, 1]);
    assert!(!titles.is_reorder_pending());
}

#[tokio::test]
async fn manual_resolution_checks_token() {
    let (titles, _calls, _orders) = collection();
    let stale = titles.reorder(vec![3, 2, 1]).expect("r1").token();
    let current = titles.reorder(vec![1, 3, 2]).expect("r2").token();

    assert!(!titles.resolve_reorder_success(stale, vec![3, 2, 1]));
    assert!(!titles.resolve_reorder_failure(stale));
    assert_eq!(titles.order(), vec![1, 3, 2]);

    assert!(titles.resolve_reorder_failure(current));
    assert_eq!(titles.order(), vec![3, 2, 1]);
    // settled tokens are no longer active
    assert!(!titles.resolve_reorder_success(current, vec![1, 2, 3]));
}

#[tokio::test]
async fn reorder_rejects_non_permutations() {
    let (titles, _calls, mut orders) = collection();
    for bad in [vec![1, 2], vec![1, 2, 4], vec![1, 1, 2]] {
        let err = titles.reorder(bad).err().expect("invalid order");
        assert!(matches!(err, EngineError::InvalidOrder { .. }));
    }
    assert_eq!(titles.order(), vec![1, 2, 3]);
    assert!(!orders.has_waiting());
}

#[tokio::test]
async fn server_order_is_reconciled_with_membership() {
    let (titles, _calls, mut orders) = collection();
    let submission = titles.reorder(vec![3, 2, 1]).expect("reorder");

    let (_, reply) = orders.next().await;
    reply.send(Ok(vec![9, 2, 2, 3])).expect("reply");
    assert!(submission.await.is_success());
    assert_eq!(titles.order(), vec![2, 3, 1]);
}

#[tokio::test]
async fn removed_entity_ignores_late_confirmation() {
    let (titles, mut calls, _orders) = collection();
    let mut events = titles.subscribe();

    let submission = titles.update_one(&2, "TWO".to_string()).expect("update");
    let _ = events.recv().await.expect("optimistic");
    let (_, reply) = calls.next().await;

    assert_eq!(titles.remove(&2).expect("remove"), "TWO");
    assert_eq!(titles.order(), vec![1, 3]);
    assert!(titles.pending_ids().is_empty());

    reply.send(Ok("TWO".to_string())).expect("reply");
    assert!(submission.await.is_success());
    assert!(titles.get(&2).is_none());
    assert!(events.try_recv().is_err());
    assert!(matches!(titles.remove(&2), Err(EngineError::UnknownEntity(_))));
}

#[tokio::test]
async fn membership_changes_during_pending_reorder() {
    let (titles, _calls, mut orders) = collection();
    let submission = titles.reorder(vec![3, 2, 1]).expect("reorder");

    titles.insert(4, "four".to_string()).expect("insert");
    titles.remove(&1).expect("remove");
    assert_eq!(titles.order(), vec![3, 2, 4]);
    assert!(matches!(
        titles.insert(3, "dup".to_string()),
        Err(EngineError::DuplicateEntity(_))
    ));

    let (_, reply) = orders.next().await;
    reply.send(Err(anyhow!("conflict"))).expect("reply");
    submission.await;
    assert_eq!(titles.order(), vec![2, 3, 4]);
    assert_eq!(titles.len(), 3);
}

#[tokio::test]
async fn rebase_updates_idle_and_active_entities() {
    let (titles, _calls, _orders) = collection();
    titles.rebase(&1, "uno".to_string()).expect("rebase idle");
    assert_eq!(titles.get(&1).as_deref(), Some("uno"));

    let _pending = titles.update_one(&2, "TWO".to_string()).expect("update");
    titles.rebase(&2, "dos".to_string()).expect("rebase active");
    // pending edit still folds over the new baseline
    assert_eq!(titles.get(&2).as_deref(), Some("TWO"));
    assert!(titles.rebase(&9, "nine".to_string()).is_err());
}

#[test]
fn duplicate_ids_are_rejected_at_construction() {
    let result = CollectionController::<u32, String, String>::new(
        vec![(1, "a".to_string()), (1, "b".to_string())],
        transform(|_: &String, next: &String| next.clone()),
        Arc::new(crate::MissingConfirmation),
        Arc::new(crate::MissingOrderConfirmation),
    );
    assert!(matches!(result, Err(EngineError::DuplicateEntity(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn last_order_event_matches_displayed_order() {
    for _ in 0..50 {
        let titles = CollectionController::<u32, String, String>::new(
            vec![(1, "one".to_string()), (2, "two".to_string()), (3, "three".to_string())],
            transform(|_: &String, next: &String| next.clone()),
            Arc::new(crate::MissingConfirmation),
            crate::order_confirm_fn(|ids: Vec<u32>| async move { Ok(ids) }),
        )
        .expect("collection");
        let mut events = titles.subscribe_order();

        let orders = [vec![3, 2, 1], vec![2, 3, 1], vec![1, 3, 2], vec![2, 1, 3]];
        let submissions: Vec<_> = orders
            .iter()
            .map(|order| titles.reorder(order.clone()).expect("reorder"))
            .collect();
        futures::future::join_all(submissions).await;

        let last = std::iter::from_fn(|| events.try_recv().ok())
            .last()
            .expect("events");
        assert_eq!(
            last,
            OrderEvent {
                order: titles.order(),
                pending: titles.is_reorder_pending(),
            }
        );
    }
}
