//! Per-command announcement cooldowns

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::dispatch::CommandId;

/// When a command last fired and how long it stays quiet afterwards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownEntry {
    pub command: CommandId,
    pub last_fired_at: Instant,
    pub cooldown: Duration,
}

/// Remembers the last announcement per command
///
/// Entries are created on the first recorded firing and only ever updated afterwards.
#[derive(Debug, Clone)]
pub struct CooldownGate {
    durations: HashMap<CommandId, Duration>,
    default_cooldown: Duration,
    entries: HashMap<CommandId, CooldownEntry>,
}

impl CooldownGate {
    #[must_use]
    pub fn new(default_cooldown: Duration) -> Self {
        Self {
            durations: HashMap::new(),
            default_cooldown,
            entries: HashMap::new(),
        }
    }

    /// Override the cooldown for one command
    #[must_use]
    pub fn with_cooldown(mut self, command: CommandId, cooldown: Duration) -> Self {
        self.durations.insert(command, cooldown);
        self
    }

    /// Configured cooldown for a command
    #[must_use]
    pub fn cooldown_for(&self, command: CommandId) -> Duration {
        self.durations
            .get(&command)
            .copied()
            .unwrap_or(self.default_cooldown)
    }

    /// True if the command has never fired or its cooldown has elapsed
    #[must_use]
    pub fn may_fire(&self, command: CommandId, now: Instant) -> bool {
        self.entries.get(&command).is_none_or(|entry| {
            now.saturating_duration_since(entry.last_fired_at) >= entry.cooldown
        })
    }

    /// Time left before the command may fire again
    #[must_use]
    pub fn remaining(&self, command: CommandId, now: Instant) -> Duration {
        self.entries.get(&command).map_or(Duration::ZERO, |entry| {
            entry
                .cooldown
                .saturating_sub(now.saturating_duration_since(entry.last_fired_at))
        })
    }

    /// Arm (or re-arm) the command's cooldown at `now`
    pub fn record_fired(&mut self, command: CommandId, now: Instant) {
        let cooldown = self.cooldown_for(command);
        let entry = self.entries.entry(command).or_insert(CooldownEntry {
            command,
            last_fired_at: now,
            cooldown,
        });
        entry.last_fired_at = now;
        entry.cooldown = cooldown;
        tracing::debug!(command = %command, cooldown_ms = cooldown.as_millis(), "cooldown armed");
    }

    #[must_use]
    pub fn entry(&self, command: CommandId) -> Option<&CooldownEntry> {
        self.entries.get(&command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_command_may_fire() {
        let gate = CooldownGate::new(Duration::from_secs(2));
        assert!(gate.may_fire(CommandId::Identify, Instant::now()));
        assert!(gate.entry(CommandId::Identify).is_none());
    }

    #[test]
    fn test_cooldown_blocks_until_elapsed() {
        let t0 = Instant::now();
        let mut gate =
            CooldownGate::new(Duration::from_secs(2)).with_cooldown(CommandId::Identify, Duration::from_secs(5));
        gate.record_fired(CommandId::Identify, t0);

        assert!(!gate.may_fire(CommandId::Identify, t0 + Duration::from_secs(2)));
        assert_eq!(
            gate.remaining(CommandId::Identify, t0 + Duration::from_secs(2)),
            Duration::from_secs(3)
        );
        assert!(gate.may_fire(CommandId::Identify, t0 + Duration::from_secs(5)));
    }

    #[test]
    fn test_cooldowns_are_per_command() {
        let t0 = Instant::now();
        let mut gate = CooldownGate::new(Duration::from_secs(2));
        gate.record_fired(CommandId::Count, t0);
        assert!(!gate.may_fire(CommandId::Count, t0));
        assert!(gate.may_fire(CommandId::Price, t0));
    }

    #[test]
    fn test_record_updates_existing_entry() {
        let t0 = Instant::now();
        let mut gate = CooldownGate::new(Duration::from_secs(2));
        gate.record_fired(CommandId::Banknote, t0);
        gate.record_fired(CommandId::Banknote, t0 + Duration::from_secs(3));
        let entry = gate.entry(CommandId::Banknote).unwrap();
        assert_eq!(entry.last_fired_at, t0 + Duration::from_secs(3));
    }
}
