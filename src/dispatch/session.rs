//! Dispatcher state

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::CommandId;

/// States of the command state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchState {
    Idle,
    AwaitingDecision,
    CooldownBlocked,
    Announcing,
    ShuttingDown,
}

impl DispatchState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::AwaitingDecision => "AWAITING_DECISION",
            Self::CooldownBlocked => "COOLDOWN_BLOCKED",
            Self::Announcing => "ANNOUNCING",
            Self::ShuttingDown => "SHUTTING_DOWN",
        }
    }

    /// Whether the state machine allows moving from `self` to `next`
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::AwaitingDecision)
                | (Self::AwaitingDecision, Self::Idle | Self::CooldownBlocked | Self::Announcing)
                | (Self::CooldownBlocked | Self::Announcing, Self::Idle)
                | (
                    Self::Idle | Self::AwaitingDecision | Self::CooldownBlocked | Self::Announcing,
                    Self::ShuttingDown
                )
        )
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do with an in-flight announcement on quit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownPolicy {
    /// Let the current utterance play to the end
    #[default]
    Finish,
    /// Cut it off
    Interrupt,
}

impl fmt::Display for ShutdownPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Finish => "finish",
            Self::Interrupt => "interrupt",
        })
    }
}

/// Per-command dispatch settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Speak an "uncertain" phrase instead of staying silent
    pub announce_uncertain: bool,
    /// Speak "not available" when a query's backend is missing
    pub announce_unavailable: bool,
    /// Cooldown for commands without an override
    pub default_cooldown: Duration,
    pub cooldowns: BTreeMap<CommandId, Duration>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            announce_uncertain: false,
            announce_unavailable: true,
            default_cooldown: Duration::from_secs(2),
            cooldowns: BTreeMap::from([(CommandId::Obstacle, Duration::from_millis(1500))]),
        }
    }
}

/// Everything the dispatcher knows about the running session
///
/// Only the dispatcher writes to this.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub state: DispatchState,
    pub active_command: Option<CommandId>,
    pub dummy_mode: bool,
    pub config: DispatchConfig,
}

impl SessionState {
    #[must_use]
    pub const fn new(config: DispatchConfig, dummy_mode: bool) -> Self {
        Self {
            state: DispatchState::Idle,
            active_command: None,
            dummy_mode,
            config,
        }
    }
}
