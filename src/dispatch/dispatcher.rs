//! The command state machine

use std::collections::VecDeque;
use std::time::Instant;

use serde::Serialize;

use super::{
    Announcement, AnnouncementKind, AnnouncementOutcome, Announcer, CommandId, CommandRequest,
    DispatchConfig, DispatchState, SessionState, ShutdownPolicy,
};
use crate::Result;
use crate::cooldown::CooldownGate;
use crate::perception::{QueryType, UNAVAILABLE};
use crate::speech::phrases;
use crate::stabilizer::{StabilizedResult, Stabilizer};

/// Transitions kept for diagnostics
const HISTORY_LEN: usize = 32;

/// One recorded state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: DispatchState,
    pub to: DispatchState,
    pub command: Option<CommandId>,
}

/// What happened to a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Handed to the speech worker
    Announced { id: u64, kind: AnnouncementKind },
    /// Not stable enough and no phrase configured for that case
    Silent,
    /// Stable, but announced too recently
    CooldownBlocked,
    /// Held until the current announcement finishes
    Queued,
    /// Same command already being announced
    Discarded,
    /// Speech hand-off failed; logged and treated as fired
    Failed,
    /// The dispatcher is shutting down
    Ignored,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    id: u64,
    command: CommandId,
}

/// Serializes command requests against one announcer
///
/// Time is always passed in, so the machine is deterministic under test.
pub struct Dispatcher<A: Announcer> {
    session: SessionState,
    cooldowns: CooldownGate,
    announcer: A,
    in_flight: Option<InFlight>,
    pending: Option<CommandRequest>,
    next_id: u64,
    history: VecDeque<Transition>,
}

impl<A: Announcer> Dispatcher<A> {
    #[must_use]
    pub fn new(config: DispatchConfig, dummy_mode: bool, announcer: A) -> Self {
        let cooldowns = config
            .cooldowns
            .iter()
            .fold(CooldownGate::new(config.default_cooldown), |gate, (&cmd, &d)| {
                gate.with_cooldown(cmd, d)
            });
        Self {
            session: SessionState::new(config, dummy_mode),
            cooldowns,
            announcer,
            in_flight: None,
            pending: None,
            next_id: 1,
            history: VecDeque::with_capacity(HISTORY_LEN),
        }
    }

    #[must_use]
    pub const fn state(&self) -> DispatchState {
        self.session.state
    }

    #[must_use]
    pub const fn session(&self) -> &SessionState {
        &self.session
    }

    #[must_use]
    pub const fn cooldowns(&self) -> &CooldownGate {
        &self.cooldowns
    }

    #[must_use]
    pub const fn announcer(&self) -> &A {
        &self.announcer
    }

    pub const fn announcer_mut(&mut self) -> &mut A {
        &mut self.announcer
    }

    /// Request waiting for the current announcement to finish
    #[must_use]
    pub const fn pending(&self) -> Option<&CommandRequest> {
        self.pending.as_ref()
    }

    /// Most recent transitions, oldest first
    pub fn history(&self) -> impl Iterator<Item = &Transition> {
        self.history.iter()
    }

    /// Handle a command request against the stabilizer's current results
    pub fn submit(&mut self, request: CommandRequest, stabilizer: &Stabilizer, now: Instant) -> DispatchOutcome {
        tracing::debug!(
            command = %request.command,
            source = %request.source,
            state = %self.session.state,
            "command request"
        );

        match self.session.state {
            DispatchState::ShuttingDown => DispatchOutcome::Ignored,
            DispatchState::Announcing => self.hold(request),
            DispatchState::Idle => self.evaluate(request, stabilizer, now),
            // Both resolve inside `evaluate`, so nothing can observe them here
            DispatchState::AwaitingDecision | DispatchState::CooldownBlocked => {
                tracing::warn!(state = %self.session.state, "request arrived mid-decision");
                self.hold(request)
            }
        }
    }

    /// Check for a finished announcement; on completion arm the cooldown, return to
    /// idle and run any queued request
    pub fn poll(&mut self, stabilizer: &Stabilizer, now: Instant) -> Option<DispatchOutcome> {
        let mut outcome = None;

        while let Some(report) = self.announcer.poll_finished() {
            let Some(current) = self.in_flight.filter(|f| f.id == report.id) else {
                tracing::debug!(id = report.id, "stale announcement report");
                continue;
            };

            match &report.outcome {
                AnnouncementOutcome::Completed => {
                    tracing::debug!(command = %current.command, id = current.id, "announcement finished");
                }
                AnnouncementOutcome::Interrupted => {
                    tracing::info!(command = %current.command, id = current.id, "announcement interrupted");
                }
                AnnouncementOutcome::Failed(reason) => {
                    tracing::warn!(command = %current.command, reason = %reason, "announcement failed");
                }
            }

            self.cooldowns.record_fired(current.command, now);
            self.in_flight = None;
            self.session.active_command = None;
            if self.session.state == DispatchState::Announcing {
                self.transition(DispatchState::Idle);
            }

            if let Some(next) = self.pending.take() {
                outcome = Some(self.evaluate(next, stabilizer, now));
            }
        }

        outcome
    }

    /// Enter `SHUTTING_DOWN` and release the announcer
    ///
    /// # Errors
    ///
    /// Returns error if the announcer failed to release the audio device
    pub fn shutdown(&mut self, policy: ShutdownPolicy) -> Result<()> {
        if self.session.state == DispatchState::ShuttingDown {
            return Ok(());
        }
        tracing::info!(policy = %policy, in_flight = self.in_flight.is_some(), "dispatcher shutting down");

        self.transition(DispatchState::ShuttingDown);
        if let Some(dropped) = self.pending.take() {
            tracing::debug!(command = %dropped.command, "dropping queued request");
        }

        let released = self.announcer.shutdown(policy);
        while let Some(report) = self.announcer.poll_finished() {
            tracing::debug!(id = report.id, outcome = ?report.outcome, "final announcement report");
        }
        self.in_flight = None;
        self.session.active_command = None;
        released
    }

    fn hold(&mut self, request: CommandRequest) -> DispatchOutcome {
        if self.in_flight.is_some_and(|f| f.command == request.command) {
            tracing::debug!(command = %request.command, "already announcing, request discarded");
            return DispatchOutcome::Discarded;
        }
        if let Some(replaced) = self.pending.replace(request) {
            tracing::debug!(
                replaced = %replaced.command,
                command = %request.command,
                "queued request replaced"
            );
        }
        DispatchOutcome::Queued
    }

    fn evaluate(&mut self, request: CommandRequest, stabilizer: &Stabilizer, now: Instant) -> DispatchOutcome {
        let command = request.command;
        self.session.active_command = Some(command);
        self.transition(DispatchState::AwaitingDecision);

        let result = stabilizer.current_result(command.query());
        tracing::debug!(
            command = %command,
            label = %result.label,
            support = result.support_count,
            window = result.window_size,
            stable = result.is_stable,
            dummy = self.session.dummy_mode,
            "decision"
        );

        let Some((kind, text)) = self.utterance(command, &result, stabilizer) else {
            self.finish_idle();
            return DispatchOutcome::Silent;
        };

        if !self.cooldowns.may_fire(command, now) {
            tracing::debug!(
                command = %command,
                remaining_ms = self.cooldowns.remaining(command, now).as_millis(),
                "cooldown active"
            );
            self.transition(DispatchState::CooldownBlocked);
            self.finish_idle();
            return DispatchOutcome::CooldownBlocked;
        }

        let id = self.next_id;
        self.next_id += 1;
        self.transition(DispatchState::Announcing);
        tracing::info!(command = %command, id, text = %text, "announcing");

        let announcement = Announcement {
            id,
            command,
            kind,
            text,
        };
        match self.announcer.begin(announcement) {
            Ok(()) => {
                self.in_flight = Some(InFlight { id, command });
                DispatchOutcome::Announced { id, kind }
            }
            Err(e) => {
                tracing::error!(command = %command, error = %e, "speech hand-off failed");
                self.cooldowns.record_fired(command, now);
                self.finish_idle();
                DispatchOutcome::Failed
            }
        }
    }

    /// What to say for a result, if anything
    fn utterance(
        &self,
        command: CommandId,
        result: &StabilizedResult,
        stabilizer: &Stabilizer,
    ) -> Option<(AnnouncementKind, String)> {
        let config = &self.session.config;
        if result.is_announceable() {
            let text = if command == CommandId::Full {
                phrases::full(
                    result,
                    &stabilizer.current_result(QueryType::Count),
                    &stabilizer.current_result(QueryType::Price),
                )
            } else {
                phrases::describe(result)
            };
            return Some((AnnouncementKind::Result, text));
        }
        if result.is_stable && result.label == UNAVAILABLE {
            return config
                .announce_unavailable
                .then(|| (AnnouncementKind::Unavailable, phrases::unavailable(command).to_string()));
        }
        config
            .announce_uncertain
            .then(|| (AnnouncementKind::Uncertain, phrases::uncertain(command).to_string()))
    }

    fn finish_idle(&mut self) {
        self.session.active_command = None;
        self.transition(DispatchState::Idle);
    }

    fn transition(&mut self, to: DispatchState) {
        let from = self.session.state;
        if !from.can_transition_to(to) {
            tracing::warn!(from = %from, to = %to, "unexpected state transition");
        }
        tracing::trace!(from = %from, to = %to, "state transition");

        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(Transition {
            from,
            to,
            command: self.session.active_command,
        });
        self.session.state = to;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::dispatch::{AnnouncementReport, RequestSource};
    use crate::perception::DetectionSample;
    use crate::stabilizer::StabilizerConfig;

    #[derive(Default)]
    struct Recorder {
        begun: Vec<Announcement>,
        finished: VecDeque<AnnouncementReport>,
        shut_down: Option<ShutdownPolicy>,
    }

    impl Recorder {
        fn complete_last(&mut self) {
            let last = self.begun.last().unwrap();
            self.finished.push_back(AnnouncementReport {
                id: last.id,
                command: last.command,
                outcome: AnnouncementOutcome::Completed,
                finished_at: Instant::now(),
            });
        }
    }

    impl Announcer for Recorder {
        fn begin(&mut self, announcement: Announcement) -> Result<()> {
            self.begun.push(announcement);
            Ok(())
        }

        fn poll_finished(&mut self) -> Option<AnnouncementReport> {
            self.finished.pop_front()
        }

        fn shutdown(&mut self, policy: ShutdownPolicy) -> Result<()> {
            self.shut_down = Some(policy);
            Ok(())
        }
    }

    fn stable_identify(label: &str) -> Stabilizer {
        let mut s = Stabilizer::new(StabilizerConfig {
            majority_threshold: 0.5,
            min_samples_for_stable: 1,
            ..StabilizerConfig::default()
        });
        s.ingest(
            QueryType::Identify,
            DetectionSample::labelled(QueryType::Identify, label, 0.9, None, Instant::now()),
        );
        s
    }

    fn request(command: CommandId, at: Instant) -> CommandRequest {
        CommandRequest::new(command, at, RequestSource::Keyboard)
    }

    #[test]
    fn test_unstable_result_is_silent() {
        let stabilizer = Stabilizer::new(StabilizerConfig::default());
        let mut d = Dispatcher::new(DispatchConfig::default(), false, Recorder::default());
        let outcome = d.submit(request(CommandId::Identify, Instant::now()), &stabilizer, Instant::now());
        assert_eq!(outcome, DispatchOutcome::Silent);
        assert_eq!(d.state(), DispatchState::Idle);
        assert!(d.announcer().begun.is_empty());
    }

    #[test]
    fn test_uncertain_phrase_when_configured() {
        let stabilizer = Stabilizer::new(StabilizerConfig::default());
        let config = DispatchConfig {
            announce_uncertain: true,
            ..DispatchConfig::default()
        };
        let mut d = Dispatcher::new(config, false, Recorder::default());
        let outcome = d.submit(request(CommandId::Price, Instant::now()), &stabilizer, Instant::now());
        assert!(matches!(
            outcome,
            DispatchOutcome::Announced {
                kind: AnnouncementKind::Uncertain,
                ..
            }
        ));
    }

    #[test]
    fn test_same_command_discarded_while_announcing() {
        let t0 = Instant::now();
        let stabilizer = stable_identify("apple");
        let mut d = Dispatcher::new(DispatchConfig::default(), false, Recorder::default());

        assert!(matches!(
            d.submit(request(CommandId::Identify, t0), &stabilizer, t0),
            DispatchOutcome::Announced { .. }
        ));
        assert_eq!(d.state(), DispatchState::Announcing);
        assert_eq!(
            d.submit(request(CommandId::Identify, t0), &stabilizer, t0),
            DispatchOutcome::Discarded
        );
        assert!(d.pending().is_none());
    }

    #[test]
    fn test_queue_keeps_only_latest_request() {
        let t0 = Instant::now();
        let stabilizer = stable_identify("apple");
        let mut d = Dispatcher::new(DispatchConfig::default(), false, Recorder::default());
        d.submit(request(CommandId::Identify, t0), &stabilizer, t0);

        assert_eq!(d.submit(request(CommandId::Count, t0), &stabilizer, t0), DispatchOutcome::Queued);
        assert_eq!(d.submit(request(CommandId::Price, t0), &stabilizer, t0), DispatchOutcome::Queued);
        assert_eq!(d.pending().map(|r| r.command), Some(CommandId::Price));
    }

    #[test]
    fn test_completion_arms_cooldown_and_returns_idle() {
        let t0 = Instant::now();
        let stabilizer = stable_identify("apple");
        let mut d = Dispatcher::new(DispatchConfig::default(), false, Recorder::default());
        d.submit(request(CommandId::Identify, t0), &stabilizer, t0);
        assert!(d.cooldowns().entry(CommandId::Identify).is_none());

        d.announcer.complete_last();
        let done = t0 + Duration::from_millis(800);
        assert!(d.poll(&stabilizer, done).is_none());
        assert_eq!(d.state(), DispatchState::Idle);
        assert_eq!(d.cooldowns().entry(CommandId::Identify).map(|e| e.last_fired_at), Some(done));
    }

    #[test]
    fn test_full_adds_stable_count_and_price() {
        let t0 = Instant::now();
        let mut stabilizer = stable_identify("milk");
        stabilizer.ingest(
            QueryType::Price,
            DetectionSample::labelled(QueryType::Price, "0.99", 0.6, None, t0),
        );
        let mut d = Dispatcher::new(DispatchConfig::default(), false, Recorder::default());

        d.submit(request(CommandId::Full, t0), &stabilizer, t0);
        assert_eq!(d.announcer().begun[0].text, "milk, Price 99 cent.");
        assert_eq!(d.announcer().begun[0].command, CommandId::Full);
    }

    #[test]
    fn test_shutdown_is_terminal() {
        let t0 = Instant::now();
        let stabilizer = stable_identify("apple");
        let mut d = Dispatcher::new(DispatchConfig::default(), false, Recorder::default());
        d.shutdown(ShutdownPolicy::Interrupt).unwrap();
        assert_eq!(d.state(), DispatchState::ShuttingDown);
        assert_eq!(d.announcer().shut_down, Some(ShutdownPolicy::Interrupt));
        assert_eq!(
            d.submit(request(CommandId::Identify, t0), &stabilizer, t0),
            DispatchOutcome::Ignored
        );
    }
}
