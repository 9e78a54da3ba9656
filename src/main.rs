//! Publish/subscribe demo harness.
//!
//! Wires producers and several consumer-group configurations against an
//! in-process broker, then waits for the asynchronous deliveries:
//! - one text message fanned out to groups `foo`, `bar` and `headers`
//! - five messages to explicit partitions, read by a {0, 3} listener
//! - a filtered topic that discards values containing "World"
//! - a JSON-encoded greeting

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use broker::{
    filter, topic, Broker, BrokerConfig, ConsumerOptions, JsonCodec, JsonTemplate, Message,
    StringCodec, StringTemplate, SubscriptionHandle, TopicConfig,
};
use broker_core::Greeting;
use telemetry::{init_tracing_from_env, metrics};

/// Topic names, overridable per environment.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct TopicNames {
    #[serde(default = "default_message_topic")]
    message: String,
    #[serde(default = "default_partitioned_topic")]
    partitioned: String,
    #[serde(default = "default_filtered_topic")]
    filtered: String,
    #[serde(default = "default_greeting_topic")]
    greeting: String,
}

fn default_message_topic() -> String {
    topic::MESSAGE.to_string()
}

fn default_partitioned_topic() -> String {
    topic::PARTITIONED.to_string()
}

fn default_filtered_topic() -> String {
    topic::FILTERED.to_string()
}

fn default_greeting_topic() -> String {
    topic::GREETING.to_string()
}

impl Default for TopicNames {
    fn default() -> Self {
        Self {
            message: default_message_topic(),
            partitioned: default_partitioned_topic(),
            filtered: default_filtered_topic(),
            greeting: default_greeting_topic(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct Config {
    #[serde(default)]
    broker: BrokerConfig,

    #[serde(default)]
    topics: TopicNames,

    /// Partition count of the partitioned topic
    #[serde(default = "default_partitioned_count")]
    partitioned_count: i32,

    /// How long each scenario waits for its deliveries
    #[serde(default = "default_latch_timeout_secs")]
    latch_timeout_secs: u64,
}

fn default_partitioned_count() -> i32 {
    5
}

fn default_latch_timeout_secs() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            topics: TopicNames::default(),
            partitioned_count: default_partitioned_count(),
            latch_timeout_secs: default_latch_timeout_secs(),
        }
    }
}

impl Config {
    fn latch_timeout(&self) -> Duration {
        Duration::from_secs(self.latch_timeout_secs)
    }
}

/// Consumers registered by the demo.
struct Listeners {
    foo: SubscriptionHandle,
    bar: SubscriptionHandle,
    headers: SubscriptionHandle,
    partitions: SubscriptionHandle,
    partitions_all: SubscriptionHandle,
    filter: SubscriptionHandle,
    greeting: SubscriptionHandle,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing_from_env();

    info!("Starting pub/sub demo v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;
    info!(
        bootstrap_address = %config.broker.bootstrap_address,
        topics = ?config.topics,
        "Loaded configuration"
    );

    let broker = Arc::new(Broker::new(config.broker.clone()));
    broker
        .declare_topics(&[
            TopicConfig::new(&config.topics.partitioned).with_partitions(config.partitioned_count),
        ])
        .context("Failed to declare topics")?;

    let listeners = register_listeners(&broker, &config.topics)
        .context("Failed to register listeners")?;

    let text = StringTemplate::string(broker.clone());
    let greetings = JsonTemplate::<Greeting>::json(broker.clone());
    let timeout = config.latch_timeout();

    // Every group on the message topic gets its own copy.
    text.send(&config.topics.message, &"Hello, World!".to_string())?;
    await_latch(
        "message",
        &[(&listeners.foo, 1), (&listeners.bar, 1), (&listeners.headers, 1)],
        timeout,
    )
    .await;

    // One message per partition; only partitions 0 and 3 reach the pinned listener.
    for partition in 0..config.partitioned_count {
        text.send_to_partition(
            &config.topics.partitioned,
            partition,
            None,
            &"Hello To Partitioned Topic!".to_string(),
        )?;
    }
    await_latch("partition", &[(&listeners.partitions, 2)], timeout).await;
    await_latch(
        "partitionsAll",
        &[(&listeners.partitions_all, config.partitioned_count as u64)],
        timeout,
    )
    .await;

    // The filter group drops anything containing "World".
    text.send(&config.topics.filtered, &"Hello Baeldung!".to_string())?;
    text.send(&config.topics.filtered, &"Hello World!".to_string())?;
    await_latch("filter", &[(&listeners.filter, 1)], timeout).await;
    info!(
        delivered = listeners.filter.delivered_count(),
        filtered = listeners.filter.stats().filtered(),
        "Filtered listener totals"
    );

    greetings.send(&config.topics.greeting, &Greeting::new("Greetings", "World!"))?;
    await_latch("greeting", &[(&listeners.greeting, 1)], timeout).await;

    info!("Shutting down...");
    broker.shutdown().await;

    info!(metrics = ?metrics().snapshot(), "Shutdown complete");
    Ok(())
}

/// Builds one consumer per listener configuration.
fn register_listeners(broker: &Broker, topics: &TopicNames) -> broker_core::Result<Listeners> {
    let foo = broker.register_consumer(
        ConsumerOptions::new("foo", &topics.message),
        StringCodec,
        StringCodec,
        |m: Message<String, String>| -> broker_core::Result<()> {
            info!("Received Message in group 'foo': {}", m.value);
            Ok(())
        },
    )?;

    let bar = broker.register_consumer(
        ConsumerOptions::new("bar", &topics.message),
        StringCodec,
        StringCodec,
        |m: Message<String, String>| -> broker_core::Result<()> {
            info!("Received Message in group 'bar': {}", m.value);
            Ok(())
        },
    )?;

    let headers = broker.register_consumer(
        ConsumerOptions::new("headers", &topics.message),
        StringCodec,
        StringCodec,
        |m: Message<String, String>| -> broker_core::Result<()> {
            info!("Received Message: {} from partition: {}", m.value, m.partition);
            Ok(())
        },
    )?;

    let partitions = broker.register_consumer(
        ConsumerOptions::new("partitions", &topics.partitioned).with_partitions([0, 3]),
        StringCodec,
        StringCodec,
        |m: Message<String, String>| -> broker_core::Result<()> {
            info!("Received Message: {} from partition: {}", m.value, m.partition);
            Ok(())
        },
    )?;

    let partitions_all = broker.register_consumer(
        ConsumerOptions::new("partitionsAll", &topics.partitioned),
        StringCodec,
        StringCodec,
        |m: Message<String, String>| -> broker_core::Result<()> {
            info!("Received Message in group 'partitionsAll' from partition: {}", m.partition);
            Ok(())
        },
    )?;

    let filter = broker.register_consumer(
        ConsumerOptions::new("filter", &topics.filtered)
            .with_filter(filter::discard_containing("World")),
        StringCodec,
        StringCodec,
        |m: Message<String, String>| -> broker_core::Result<()> {
            info!("Received Message in filtered listener: {}", m.value);
            Ok(())
        },
    )?;

    let greeting = broker.register_consumer(
        ConsumerOptions::new("greeting", &topics.greeting),
        StringCodec,
        JsonCodec::<Greeting>::new(),
        |m: Message<String, Greeting>| -> broker_core::Result<()> {
            info!("Received greeting message: {}", m.value);
            Ok(())
        },
    )?;

    Ok(Listeners {
        foo,
        bar,
        headers,
        partitions,
        partitions_all,
        filter,
        greeting,
    })
}

/// Waits until every handle reaches its target count.
///
/// A timeout is reported and the demo moves on.
async fn await_latch(name: &str, targets: &[(&SubscriptionHandle, u64)], timeout: Duration) {
    for (handle, target) in targets {
        if !handle.wait_for_delivered(*target, timeout).await {
            warn!(
                latch = name,
                group_id = %handle.group_id(),
                delivered = handle.delivered_count(),
                expected = *target,
                "Timed out waiting for deliveries"
            );
        }
    }
}

/// Load configuration from files and environment.
fn load_config() -> Result<Config> {
    let config = config::Config::builder()
        // Start with defaults
        .add_source(config::Config::try_from(&Config::default())?)
        // Load from config file if exists
        .add_source(
            config::File::with_name("config/default")
                .required(false)
                .format(config::FileFormat::Toml),
        )
        // Override with environment variables
        .add_source(
            config::Environment::default()
                .separator("__")
                .prefix("PUBSUB")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    let mut config: Config = config
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    // The config crate splits nested keys on "__" only, so keep the flat
    // spelling working for the bootstrap address.
    if let Ok(address) = std::env::var("PUBSUB_BOOTSTRAP_ADDRESS") {
        config.broker.bootstrap_address = address;
    }

    Ok(config)
}
