//! Structured payload sent on the greeting topic.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A greeting with a message and a recipient name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Greeting {
    pub msg: String,
    pub name: String,
}

impl Greeting {
    pub fn new(msg: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            msg: msg.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Greeting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.msg, self.name)
    }
}
