//! Command dispatch
//!
//! Keyboard and voice input both arrive as [`CommandRequest`]s. The [`Dispatcher`] pulls the
//! stabilized decision for the command, applies the per-command cooldown and hands at most
//! one utterance at a time to an [`Announcer`]:
//!
//! ```text
//!   IDLE ──request──▶ AWAITING_DECISION ──not stable──▶ IDLE
//!                            │
//!                            ├──cooling down──▶ COOLDOWN_BLOCKED ──▶ IDLE
//!                            │
//!                            └──may fire──▶ ANNOUNCING ──report──▶ IDLE
//!
//!   any state ──quit──▶ SHUTTING_DOWN
//! ```

mod announce;
mod dispatcher;
mod request;
mod session;

pub use announce::{
    Announcement, AnnouncementKind, AnnouncementOutcome, AnnouncementReport, Announcer,
};
pub use dispatcher::{DispatchOutcome, Dispatcher, Transition};
pub use request::{CommandId, CommandRequest, InputEvent, RequestSource};
pub use session::{DispatchConfig, DispatchState, SessionState, ShutdownPolicy};
