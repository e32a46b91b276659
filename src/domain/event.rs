//! Typed protocol events decoded from inbound messages

use serde::{Deserialize, Serialize};

/// One typed value (or child listing) decoded from the console engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProtocolEvent {
    NumericValue {
        path: String,
        property: String,
        value: f64,
    },
    BoolValue {
        path: String,
        property: String,
        value: bool,
    },
    StringValue {
        path: String,
        property: String,
        value: String,
    },
    /// Child ids of `path`, sorted lexically
    ChildList { path: String, ids: Vec<String> },
}

impl ProtocolEvent {
    /// Path the event refers to.
    pub fn path(&self) -> &str {
        match self {
            Self::NumericValue { path, .. }
            | Self::BoolValue { path, .. }
            | Self::StringValue { path, .. }
            | Self::ChildList { path, .. } => path,
        }
    }

    /// Property name for value events; `None` for child listings.
    pub fn property(&self) -> Option<&str> {
        match self {
            Self::NumericValue { property, .. }
            | Self::BoolValue { property, .. }
            | Self::StringValue { property, .. } => Some(property),
            Self::ChildList { .. } => None,
        }
    }
}
