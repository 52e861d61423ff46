//! Command requests and input events

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::Error;
use crate::perception::QueryType;

/// A user-facing command
///
/// Every command but [`CommandId::Full`] is answered by exactly one query type. `Full`
/// is led by the identify result and adds count and price when those are stable too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandId {
    Identify,
    Count,
    Obstacle,
    Banknote,
    Price,
    Text,
    Full,
}

impl CommandId {
    pub const ALL: [Self; 7] = [
        Self::Identify,
        Self::Count,
        Self::Obstacle,
        Self::Banknote,
        Self::Price,
        Self::Text,
        Self::Full,
    ];

    /// Query whose stabilized result decides this command
    #[must_use]
    pub const fn query(self) -> QueryType {
        match self {
            Self::Identify | Self::Full => QueryType::Identify,
            Self::Count => QueryType::Count,
            Self::Obstacle => QueryType::Obstacle,
            Self::Banknote => QueryType::Banknote,
            Self::Price => QueryType::Price,
            Self::Text => QueryType::Text,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            other => other.query().as_str(),
        }
    }

    /// Trigger key for this command
    #[must_use]
    pub const fn key(self) -> char {
        match self {
            Self::Identify => 'i',
            Self::Count => 'c',
            Self::Obstacle => 'o',
            Self::Banknote => 'b',
            Self::Price => 'p',
            Self::Text => 't',
            Self::Full => 'f',
        }
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::Input(format!("unknown command: {s}")))
    }
}

/// Where a request came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestSource {
    Keyboard,
    Voice,
}

impl fmt::Display for RequestSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Keyboard => "keyboard",
            Self::Voice => "voice",
        })
    }
}

/// One user request for an announcement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandRequest {
    pub command: CommandId,
    pub triggered_at: Instant,
    pub source: RequestSource,
}

impl CommandRequest {
    #[must_use]
    pub const fn new(command: CommandId, triggered_at: Instant, source: RequestSource) -> Self {
        Self {
            command,
            triggered_at,
            source,
        }
    }
}

/// Everything an input producer can send to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    Command(CommandRequest),
    Quit,
}
