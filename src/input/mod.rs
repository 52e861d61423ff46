//! Command input
//!
//! Keyboard and voice are two producers into one channel of [`InputEvent`]s.

mod voice;

use std::io::BufRead;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tokio::sync::mpsc;

use crate::Result;
use crate::dispatch::{CommandId, CommandRequest, InputEvent, RequestSource};

pub use voice::{VoiceCommandParser, VoiceCommands, VoiceIntent};

const ESC: char = '\u{1b}';

/// Map one key to an event
#[must_use]
pub fn key_event(key: char, now: Instant) -> Option<InputEvent> {
    let key = key.to_ascii_lowercase();
    if key == 'q' || key == ESC {
        return Some(InputEvent::Quit);
    }
    CommandId::ALL
        .into_iter()
        .find(|c| c.key() == key)
        .map(|c| InputEvent::Command(CommandRequest::new(c, now, RequestSource::Keyboard)))
}

/// Every recognized key in a line, in order; unknown characters are skipped
#[must_use]
pub fn line_events(line: &str, now: Instant) -> Vec<InputEvent> {
    line.chars().filter_map(|c| key_event(c, now)).collect()
}

/// Read stdin lines on a background thread and forward key events
///
/// End of input is treated as a quit.
///
/// # Errors
///
/// Returns error if the thread cannot be spawned
pub fn spawn_keyboard(tx: mpsc::UnboundedSender<InputEvent>) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("keyboard".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::warn!(error = %e, "stdin read failed");
                        break;
                    }
                };
                for event in line_events(&line, Instant::now()) {
                    if tx.send(event).is_err() {
                        return;
                    }
                }
            }
            tracing::debug!("stdin closed");
            let _ = tx.send(InputEvent::Quit);
        })?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_map() {
        let now = Instant::now();
        let cases = [
            ('i', CommandId::Identify),
            ('C', CommandId::Count),
            ('o', CommandId::Obstacle),
            ('b', CommandId::Banknote),
            ('p', CommandId::Price),
            ('T', CommandId::Text),
            ('f', CommandId::Full),
        ];
        for (key, command) in cases {
            assert_eq!(
                key_event(key, now),
                Some(InputEvent::Command(CommandRequest::new(
                    command,
                    now,
                    RequestSource::Keyboard
                )))
            );
        }
        assert_eq!(key_event('q', now), Some(InputEvent::Quit));
        assert_eq!(key_event(ESC, now), Some(InputEvent::Quit));
        assert_eq!(key_event('x', now), None);
    }

    #[test]
    fn test_line_events_keep_order() {
        let events = line_events("i x q", Instant::now());
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], InputEvent::Command(r) if r.command == CommandId::Identify));
        assert_eq!(events[1], InputEvent::Quit);
    }
}
