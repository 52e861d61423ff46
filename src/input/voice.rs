//! Voice command plug point
//!
//! Speech recognition itself is not part of this crate. Whatever produces transcripts
//! hands them to [`VoiceCommands`], which maps them to the same events the keyboard
//! produces.

use std::time::Instant;

use tokio::sync::mpsc;

use crate::dispatch::{CommandId, CommandRequest, InputEvent, RequestSource};
use crate::{Error, Result};

/// What a transcript asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceIntent {
    Command(CommandId),
    Quit,
}

/// Keyword matcher for spoken commands
///
/// Phrases are checked in table order; the first contained phrase wins.
#[derive(Debug, Clone)]
pub struct VoiceCommandParser {
    phrases: Vec<(String, VoiceIntent)>,
}

impl Default for VoiceCommandParser {
    fn default() -> Self {
        use CommandId::{Banknote, Count, Full, Identify, Obstacle, Price, Text};
        use VoiceIntent::{Command, Quit};

        let table: [(&str, VoiceIntent); 28] = [
            ("stop listening", Quit),
            ("quit", Quit),
            ("exit", Quit),
            ("how many", Command(Count)),
            ("count", Command(Count)),
            ("number of", Command(Count)),
            ("banknote", Command(Banknote)),
            ("bank note", Command(Banknote)),
            ("which note", Command(Banknote)),
            ("money", Command(Banknote)),
            ("how much", Command(Price)),
            ("what does this cost", Command(Price)),
            ("price", Command(Price)),
            ("cost", Command(Price)),
            ("everything", Command(Full)),
            ("all details", Command(Full)),
            ("full", Command(Full)),
            ("what does it say", Command(Text)),
            ("read the label", Command(Text)),
            ("read", Command(Text)),
            ("label text", Command(Text)),
            ("obstacle", Command(Obstacle)),
            ("in front of me", Command(Obstacle)),
            ("is the way clear", Command(Obstacle)),
            ("path", Command(Obstacle)),
            ("what is this", Command(Identify)),
            ("what do i see", Command(Identify)),
            ("identify", Command(Identify)),
        ];
        Self::new(table.iter().map(|(p, i)| ((*p).to_string(), *i)).collect())
    }
}

impl VoiceCommandParser {
    #[must_use]
    pub fn new(phrases: Vec<(String, VoiceIntent)>) -> Self {
        let phrases = phrases
            .into_iter()
            .map(|(p, i)| (p.trim().to_lowercase(), i))
            .filter(|(p, _)| !p.is_empty())
            .collect();
        Self { phrases }
    }

    /// Intent for a transcript, if any phrase matches
    #[must_use]
    pub fn parse(&self, transcript: &str) -> Option<VoiceIntent> {
        let normalized = transcript.to_lowercase();
        let intent = self
            .phrases
            .iter()
            .find(|(phrase, _)| normalized.contains(phrase.as_str()))
            .map(|(_, intent)| *intent);
        tracing::trace!(transcript, ?intent, "voice transcript parsed");
        intent
    }
}

/// Feeds recognized transcripts into the engine's input channel
#[derive(Debug, Clone)]
pub struct VoiceCommands {
    parser: VoiceCommandParser,
    tx: mpsc::UnboundedSender<InputEvent>,
}

impl VoiceCommands {
    #[must_use]
    pub const fn new(parser: VoiceCommandParser, tx: mpsc::UnboundedSender<InputEvent>) -> Self {
        Self { parser, tx }
    }

    /// Turn a transcript into an input event and send it
    ///
    /// Returns the event sent, or `None` if nothing in the transcript was recognized.
    ///
    /// # Errors
    ///
    /// Returns error if the engine is no longer listening
    pub fn submit_transcript(&self, transcript: &str, now: Instant) -> Result<Option<InputEvent>> {
        let Some(intent) = self.parser.parse(transcript) else {
            tracing::debug!(transcript, "voice command not understood");
            return Ok(None);
        };
        let event = match intent {
            VoiceIntent::Command(command) => {
                InputEvent::Command(CommandRequest::new(command, now, RequestSource::Voice))
            }
            VoiceIntent::Quit => InputEvent::Quit,
        };
        self.tx
            .send(event)
            .map_err(|_| Error::Input("input channel closed".to_string()))?;
        Ok(Some(event))
    }
}
