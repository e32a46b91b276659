//! Outbound commands.
//!
//! Grammar (each NUL-terminated on the wire):
//! - `get <path>`
//! - `set <path>/value/ <value>`
//! - `subscribe <path>`

use std::fmt;
use std::str::FromStr;

use crate::error::MonitorError;

/// Literal value carried by a `set` command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CommandValue {
    Number(f64),
    Bool(bool),
}

impl fmt::Display for CommandValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // -24 goes out as -24.0
            Self::Number(n) if n.is_finite() && n.fract() == 0.0 => write!(f, "{:.1}", n),
            Self::Number(n) => write!(f, "{}", n),
            Self::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<f64> for CommandValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for CommandValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl FromStr for CommandValue {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "true" => Ok(Self::Bool(true)),
            "false" => Ok(Self::Bool(false)),
            other => other
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(Self::Number)
                .ok_or_else(|| MonitorError::Protocol(format!("not a number or boolean: {}", other))),
        }
    }
}

/// A request to the console engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Request the current value or children of a path
    Get(String),
    /// Write a value
    Set { path: String, value: CommandValue },
    /// Request push updates when the path changes
    Subscribe(String),
}

impl Command {
    pub fn get(path: impl Into<String>) -> Self {
        Self::Get(path.into())
    }

    pub fn set(path: impl Into<String>, value: impl Into<CommandValue>) -> Self {
        Self::Set {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn subscribe(path: impl Into<String>) -> Self {
        Self::Subscribe(path.into())
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Get(path) | Self::Subscribe(path) | Self::Set { path, .. } => path,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get(path) => write!(f, "get {}", path),
            Self::Set { path, value } => write!(f, "set {}/value/ {}", path, value),
            Self::Subscribe(path) => write!(f, "subscribe {}", path),
        }
    }
}
