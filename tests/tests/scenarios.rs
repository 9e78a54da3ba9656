//! End-to-end runs of the demo's four listener setups.

use broker::{
    filter, topic, BytesCodec, ConsumerOptions, JsonCodec, JsonTemplate, StringCodec,
    StringTemplate, Template,
};
use broker_core::Greeting;
use integration_tests::{eventually, fixtures, RecordingHandler, TestContext, SETTLE};

#[tokio::test]
async fn test_every_group_receives_its_own_copy() {
    let ctx = TestContext::new();
    let groups = ["foo", "bar", "headers"];

    let mut listeners = Vec::new();
    for group in groups {
        let recorder = RecordingHandler::<String, String>::new();
        let handle = ctx
            .broker
            .register_consumer(
                ConsumerOptions::new(group, topic::MESSAGE),
                StringCodec,
                StringCodec,
                recorder.clone(),
            )
            .unwrap();
        listeners.push((handle, recorder));
    }

    let template = StringTemplate::string(ctx.broker.clone());
    template
        .send(topic::MESSAGE, &"Hello, World!".to_string())
        .unwrap();

    for (handle, recorder) in &listeners {
        ctx.await_all(&[(handle, 1)]).await;
        assert_eq!(recorder.values(), vec!["Hello, World!".to_string()]);
    }

    // Exactly once per group.
    tokio::time::sleep(SETTLE).await;
    for (handle, recorder) in &listeners {
        assert_eq!(handle.delivered_count(), 1);
        assert_eq!(recorder.count(), 1);
    }

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_explicit_partitions_only_see_their_partitions() {
    let ctx = TestContext::new();

    let pinned = RecordingHandler::<String, String>::new();
    let pinned_handle = ctx
        .broker
        .register_consumer(
            ConsumerOptions::new("partitions", topic::PARTITIONED).with_partitions([0, 3]),
            StringCodec,
            StringCodec,
            pinned.clone(),
        )
        .unwrap();

    let all = RecordingHandler::<String, String>::new();
    let all_handle = ctx
        .broker
        .register_consumer(
            ConsumerOptions::new("partitionsAll", topic::PARTITIONED),
            StringCodec,
            StringCodec,
            all.clone(),
        )
        .unwrap();

    let template = StringTemplate::string(ctx.broker.clone());
    for partition in 0..5 {
        let meta = template
            .send_to_partition(
                topic::PARTITIONED,
                partition,
                None,
                &"Hello To Partitioned Topic!".to_string(),
            )
            .unwrap();
        assert_eq!(meta.partition, partition);
    }

    ctx.await_all(&[(&pinned_handle, 2), (&all_handle, 5)]).await;
    tokio::time::sleep(SETTLE).await;

    let mut pinned_partitions = pinned.partitions();
    pinned_partitions.sort();
    assert_eq!(pinned_partitions, vec![0, 3]);

    let mut all_partitions = all.partitions();
    all_partitions.sort();
    assert_eq!(all_partitions, vec![0, 1, 2, 3, 4]);

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_filtered_listener_skips_matching_values() {
    let ctx = TestContext::new();

    let recorder = RecordingHandler::<String, String>::new();
    let handle = ctx
        .broker
        .register_consumer(
            ConsumerOptions::new("filter", topic::FILTERED)
                .with_filter(filter::discard_containing("World")),
            StringCodec,
            StringCodec,
            recorder.clone(),
        )
        .unwrap();

    let template = StringTemplate::string(ctx.broker.clone());
    template
        .send(topic::FILTERED, &"Hello Baeldung!".to_string())
        .unwrap();
    template
        .send(topic::FILTERED, &"Hello World!".to_string())
        .unwrap();

    ctx.await_all(&[(&handle, 1)]).await;
    assert!(eventually(|| handle.stats().filtered() == 1).await);

    assert_eq!(recorder.values(), vec!["Hello Baeldung!".to_string()]);
    assert_eq!(handle.delivered_count(), 1);

    // The filtered record still moves the cursor.
    let broker = ctx.broker.clone();
    assert!(eventually(|| broker.groups().cursor("filter", topic::FILTERED, 0) == Some(2)).await);

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_json_greeting_round_trip() {
    let ctx = TestContext::new();

    let recorder = RecordingHandler::<String, Greeting>::new();
    let handle = ctx
        .broker
        .register_consumer(
            ConsumerOptions::new("greeting", topic::GREETING),
            StringCodec,
            JsonCodec::<Greeting>::new(),
            recorder.clone(),
        )
        .unwrap();

    let template = JsonTemplate::<Greeting>::json(ctx.broker.clone());
    template.send(topic::GREETING, &fixtures::greeting()).unwrap();

    ctx.await_all(&[(&handle, 1)]).await;

    let received = recorder.values();
    assert_eq!(received, vec![Greeting::new("Greetings", "World!")]);
    assert_eq!(received[0].to_string(), "Greetings, World!");

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_headers_and_keys_reach_handler() {
    let ctx = TestContext::new();
    let topic = fixtures::unique_topic("headers");

    let recorder = RecordingHandler::<String, String>::new();
    let handle = ctx
        .broker
        .register_consumer(
            ConsumerOptions::new("headers", &topic),
            StringCodec,
            StringCodec,
            recorder.clone(),
        )
        .unwrap();

    let mut headers = broker_core::Headers::new();
    headers.insert("trace".to_string(), b"abc".to_vec());
    let template = StringTemplate::string(ctx.broker.clone());
    let meta = template
        .send_record(&topic, None, Some(&"k1".to_string()), &"v1".to_string(), headers)
        .unwrap();

    ctx.await_all(&[(&handle, 1)]).await;
    let message = &recorder.messages()[0];
    assert_eq!(message.key.as_deref(), Some("k1"));
    assert_eq!(message.partition, meta.partition);
    assert_eq!(message.offset, meta.offset);
    assert_eq!(message.headers.get("trace").map(Vec::as_slice), Some(&b"abc"[..]));

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_raw_bytes_delivered_untouched() {
    let ctx = TestContext::new();
    let topic = fixtures::unique_topic("raw");

    let recorder = RecordingHandler::<Vec<u8>, Vec<u8>>::new();
    let handle = ctx
        .broker
        .register_consumer(
            ConsumerOptions::new("raw", &topic),
            BytesCodec,
            BytesCodec,
            recorder.clone(),
        )
        .unwrap();

    // Not valid UTF-8; a text consumer would treat it as malformed.
    let payload = vec![0xff, 0xfe, 0x00, 0x01];
    let template = Template::new(ctx.broker.clone(), BytesCodec, BytesCodec);
    template
        .send_with_key(&topic, &vec![0x80], &payload)
        .unwrap();

    ctx.await_all(&[(&handle, 1)]).await;
    let message = &recorder.messages()[0];
    assert_eq!(message.key, Some(vec![0x80]));
    assert_eq!(message.value, payload);

    ctx.shutdown().await;
}
