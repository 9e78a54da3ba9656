//! Test fixtures.

use broker_core::Greeting;
use std::time::Duration;
use uuid::Uuid;

/// Upper bound for any single asynchronous wait in a test.
pub const WAIT: Duration = Duration::from_secs(5);

/// Grace period used when asserting that nothing else arrives.
pub const SETTLE: Duration = Duration::from_millis(200);

/// The greeting sent by the demo.
pub fn greeting() -> Greeting {
    Greeting::new("Greetings", "World!")
}

/// A topic name no other test uses.
pub fn unique_topic(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4())
}

/// A group name no other test uses.
pub fn unique_group(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4().simple())
}

/// `count` distinct text values.
pub fn text_values(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("message-{i}")).collect()
}
