//! Seam between the dispatcher and whatever plays announcements

use std::time::Instant;

use serde::Serialize;

use super::{CommandId, ShutdownPolicy};
use crate::Result;

/// Why something is being said
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnouncementKind {
    /// A stable decision
    Result,
    /// The decision was not confident enough
    Uncertain,
    /// The query's backend is missing
    Unavailable,
}

/// One utterance handed to the speech worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub id: u64,
    pub command: CommandId,
    pub kind: AnnouncementKind,
    pub text: String,
}

/// How an announcement ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "status", content = "reason")]
pub enum AnnouncementOutcome {
    Completed,
    Interrupted,
    Failed(String),
}

/// Sent back by the speech worker when an announcement is over
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnouncementReport {
    pub id: u64,
    pub command: CommandId,
    pub outcome: AnnouncementOutcome,
    pub finished_at: Instant,
}

/// Plays announcements without blocking the caller
pub trait Announcer {
    /// Start playing `announcement`; must return immediately
    ///
    /// # Errors
    ///
    /// Returns error if the announcement could not be handed off
    fn begin(&mut self, announcement: Announcement) -> Result<()>;

    /// A finished announcement, if one has completed since the last poll
    fn poll_finished(&mut self) -> Option<AnnouncementReport>;

    /// Stop accepting work and release the audio device
    ///
    /// # Errors
    ///
    /// Returns error if the device could not be released cleanly
    fn shutdown(&mut self, policy: ShutdownPolicy) -> Result<()>;
}
