//! Group membership, rebalancing and start positions with live workers.

use std::collections::BTreeSet;
use std::time::Duration;

use broker::{ConsumerOptions, StartFrom, StringCodec, StringTemplate};
use broker_core::Error;
use integration_tests::{
    bounded, eventually, fixtures, GatedHandler, RecordingHandler, TestContext, SETTLE,
};

fn received(recorders: &[&RecordingHandler<String, String>]) -> Vec<String> {
    let mut values: Vec<String> = recorders.iter().flat_map(|r| r.values()).collect();
    values.sort();
    values
}

#[tokio::test]
async fn test_group_members_split_partitions() {
    let ctx = TestContext::new();
    let topic = fixtures::unique_topic("split");
    ctx.broker.create_topic(&topic, 4).unwrap();

    let first = RecordingHandler::new();
    let second = RecordingHandler::new();
    let h1 = ctx
        .broker
        .register_consumer(
            ConsumerOptions::new("workers", &topic).with_client_id("worker-a"),
            StringCodec,
            StringCodec,
            first.clone(),
        )
        .unwrap();
    let h2 = ctx
        .broker
        .register_consumer(
            ConsumerOptions::new("workers", &topic).with_client_id("worker-b"),
            StringCodec,
            StringCodec,
            second.clone(),
        )
        .unwrap();

    let assignments = ctx.broker.groups().assignments("workers", &topic);
    assert_eq!(assignments.len(), 4);
    assert_eq!(assignments[&0], "worker-a");
    assert_eq!(assignments[&1], "worker-a");
    assert_eq!(assignments[&2], "worker-b");
    assert_eq!(assignments[&3], "worker-b");

    let template = StringTemplate::string(ctx.broker.clone());
    let values = fixtures::text_values(20);
    for (i, value) in values.iter().enumerate() {
        template
            .send_to_partition(&topic, (i % 4) as i32, None, value)
            .unwrap();
    }

    assert!(eventually(|| h1.delivered_count() + h2.delivered_count() == 20).await);
    tokio::time::sleep(SETTLE).await;

    let mut expected = values.clone();
    expected.sort();
    assert_eq!(received(&[&first, &second]), expected);

    let first_partitions: BTreeSet<i32> = first.partitions().into_iter().collect();
    let second_partitions: BTreeSet<i32> = second.partitions().into_iter().collect();
    assert_eq!(first_partitions, BTreeSet::from([0, 1]));
    assert_eq!(second_partitions, BTreeSet::from([2, 3]));

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_leaving_member_hands_partitions_over() {
    let ctx = TestContext::new();
    let topic = fixtures::unique_topic("handover");
    ctx.broker.create_topic(&topic, 2).unwrap();

    let stays = RecordingHandler::new();
    let leaves = RecordingHandler::new();
    let staying = ctx
        .broker
        .register_consumer(
            ConsumerOptions::new("handover", &topic).with_client_id("a"),
            StringCodec,
            StringCodec,
            stays.clone(),
        )
        .unwrap();
    let leaving = ctx
        .broker
        .register_consumer(
            ConsumerOptions::new("handover", &topic).with_client_id("b"),
            StringCodec,
            StringCodec,
            leaves.clone(),
        )
        .unwrap();

    let template = StringTemplate::string(ctx.broker.clone());
    template
        .send_to_partition(&topic, 1, None, &"before".to_string())
        .unwrap();
    ctx.await_all(&[(&leaving, 1)]).await;

    bounded(ctx.broker.unsubscribe(&leaving)).await.unwrap();
    assert_eq!(ctx.broker.groups().members("handover", &topic), vec!["a".to_string()]);

    template
        .send_to_partition(&topic, 1, None, &"after".to_string())
        .unwrap();
    ctx.await_all(&[(&staying, 1)]).await;
    tokio::time::sleep(SETTLE).await;

    // The cursor survived the rebalance, so "before" is not replayed.
    assert_eq!(stays.values(), vec!["after".to_string()]);
    assert_eq!(leaves.values(), vec!["before".to_string()]);
    assert_eq!(leaving.delivered_count(), 1);

    // Unsubscribing twice is an error.
    assert!(matches!(
        ctx.broker.unsubscribe(&leaving).await,
        Err(Error::UnknownSubscription(_))
    ));

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_groups_progress_independently() {
    let ctx = TestContext::new();
    let topic = fixtures::unique_topic("independent");

    let fast = RecordingHandler::new();
    let fast_handle = ctx
        .broker
        .register_consumer(
            ConsumerOptions::new("fast", &topic),
            StringCodec,
            StringCodec,
            fast.clone(),
        )
        .unwrap();

    let template = StringTemplate::string(ctx.broker.clone());
    for value in fixtures::text_values(3) {
        template.send(&topic, &value).unwrap();
    }
    ctx.await_all(&[(&fast_handle, 3)]).await;

    // A late group starting from the beginning still sees everything.
    let late = RecordingHandler::new();
    let late_handle = ctx
        .broker
        .register_consumer(
            ConsumerOptions::new("late", &topic).with_start_from(StartFrom::Earliest),
            StringCodec,
            StringCodec,
            late.clone(),
        )
        .unwrap();
    ctx.await_all(&[(&late_handle, 3)]).await;

    assert_eq!(fast.values(), late.values());
    let groups = ctx.broker.groups();
    assert!(eventually(|| groups.cursor("fast", &topic, 0) == Some(3)).await);
    assert!(eventually(|| groups.cursor("late", &topic, 0) == Some(3)).await);

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_stalled_group_does_not_hold_back_others() {
    let ctx = TestContext::new();
    let topic = fixtures::unique_topic("stalled");

    let (gated, open) = GatedHandler::<String, String>::closed();
    let stalled = gated.recorder();
    let stalled_handle = ctx
        .broker
        .register_consumer(
            ConsumerOptions::new("stalled", &topic),
            StringCodec,
            StringCodec,
            gated,
        )
        .unwrap();

    let fast = RecordingHandler::<String, String>::new();
    let fast_handle = ctx
        .broker
        .register_consumer(
            ConsumerOptions::new("fast", &topic),
            StringCodec,
            StringCodec,
            fast.clone(),
        )
        .unwrap();

    let template = StringTemplate::string(ctx.broker.clone());
    let values = fixtures::text_values(5);
    for value in &values {
        template.send(&topic, value).unwrap();
    }

    // The fast group finishes while the stalled one sits on its first record.
    assert!(
        fast_handle
            .wait_for_delivered(5, Duration::from_secs(1))
            .await
    );
    assert_eq!(fast.values(), values);
    assert_eq!(stalled_handle.delivered_count(), 0);
    assert_eq!(stalled.count(), 0);

    open.send(true).unwrap();
    ctx.await_all(&[(&stalled_handle, 5)]).await;
    assert_eq!(stalled.values(), values);

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_latest_skips_existing_records() {
    let ctx = TestContext::new();
    let topic = fixtures::unique_topic("latest");

    let template = StringTemplate::string(ctx.broker.clone());
    template.send(&topic, &"old".to_string()).unwrap();

    let recorder = RecordingHandler::new();
    let handle = ctx
        .broker
        .register_consumer(
            ConsumerOptions::new("latest", &topic),
            StringCodec,
            StringCodec,
            recorder.clone(),
        )
        .unwrap();

    template.send(&topic, &"new".to_string()).unwrap();
    ctx.await_all(&[(&handle, 1)]).await;
    tokio::time::sleep(SETTLE).await;

    assert_eq!(recorder.values(), vec!["new".to_string()]);

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_keyed_records_arrive_in_order() {
    let ctx = TestContext::new();
    let topic = fixtures::unique_topic("ordered");
    ctx.broker.create_topic(&topic, 3).unwrap();

    let recorder = RecordingHandler::new();
    let handle = ctx
        .broker
        .register_consumer(
            ConsumerOptions::new("ordered", &topic),
            StringCodec,
            StringCodec,
            recorder.clone(),
        )
        .unwrap();

    let template = StringTemplate::string(ctx.broker.clone());
    let key = "order-17".to_string();
    let values = fixtures::text_values(10);
    for value in &values {
        template.send_with_key(&topic, &key, value).unwrap();
    }

    ctx.await_all(&[(&handle, 10)]).await;

    let messages = recorder.messages();
    assert_eq!(recorder.values(), values);
    assert!(messages.windows(2).all(|w| w[0].offset < w[1].offset));
    assert!(messages.iter().all(|m| m.partition == messages[0].partition));

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_invalid_subscriptions_rejected() {
    let ctx = TestContext::new();
    let topic = fixtures::unique_topic("invalid");
    ctx.broker.create_topic(&topic, 4).unwrap();

    let _pinned = ctx
        .broker
        .register_consumer(
            ConsumerOptions::new("mixed", &topic).with_partitions([0, 1]),
            StringCodec,
            StringCodec,
            RecordingHandler::<String, String>::new(),
        )
        .unwrap();

    // Managed member in an explicit group.
    let managed = ctx.broker.register_consumer(
        ConsumerOptions::new("mixed", &topic),
        StringCodec,
        StringCodec,
        RecordingHandler::<String, String>::new(),
    );
    assert!(matches!(managed, Err(Error::InvalidSubscription(_))));

    // Partition already pinned to another member.
    let overlap = ctx.broker.register_consumer(
        ConsumerOptions::new("mixed", &topic).with_partitions([1, 2]),
        StringCodec,
        StringCodec,
        RecordingHandler::<String, String>::new(),
    );
    assert!(matches!(overlap, Err(Error::InvalidSubscription(_))));

    // Partition outside the topic.
    let out_of_range = ctx.broker.register_consumer(
        ConsumerOptions::new("other", &topic).with_partitions([9]),
        StringCodec,
        StringCodec,
        RecordingHandler::<String, String>::new(),
    );
    assert!(matches!(
        out_of_range,
        Err(Error::OutOfRange { partition: 9, .. })
    ));

    // Duplicate client id within a group.
    let _first = ctx
        .broker
        .register_consumer(
            ConsumerOptions::new("dupe", &topic).with_client_id("same"),
            StringCodec,
            StringCodec,
            RecordingHandler::<String, String>::new(),
        )
        .unwrap();
    let second = ctx.broker.register_consumer(
        ConsumerOptions::new("dupe", &topic).with_client_id("same"),
        StringCodec,
        StringCodec,
        RecordingHandler::<String, String>::new(),
    );
    assert!(matches!(second, Err(Error::InvalidSubscription(_))));

    // Failed registrations leave nothing running.
    assert_eq!(ctx.broker.subscriptions().len(), 2);

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_all_consumers() {
    let ctx = TestContext::new();
    let topic = fixtures::unique_topic("shutdown");

    let recorder = RecordingHandler::<String, String>::new();
    let handle = ctx
        .broker
        .register_consumer(
            ConsumerOptions::new(fixtures::unique_group("shutdown"), &topic),
            StringCodec,
            StringCodec,
            recorder.clone(),
        )
        .unwrap();

    let broker = ctx.broker.clone();
    bounded(broker.shutdown()).await;
    assert!(broker.subscriptions().is_empty());

    StringTemplate::string(broker.clone())
        .send(&topic, &"ignored".to_string())
        .unwrap();
    tokio::time::sleep(SETTLE).await;

    assert_eq!(handle.delivered_count(), 0);
    assert_eq!(recorder.count(), 0);
    assert!(broker.groups().members(handle.group_id(), &topic).is_empty());
}
