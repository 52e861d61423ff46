//! Background speech thread

use std::thread::{self, JoinHandle};
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::playback::PlaybackEnd;
use super::{Interrupt, SpeechSink};
use crate::dispatch::{
    Announcement, AnnouncementOutcome, AnnouncementReport, Announcer, ShutdownPolicy,
};
use crate::{Error, Result};

/// Owns the speech sink on a dedicated thread
///
/// The hand-off channel holds a single announcement, so a second `begin` while one is
/// still queued fails instead of piling up audio.
pub struct SpeechWorker {
    tx: Option<mpsc::Sender<Announcement>>,
    reports: mpsc::UnboundedReceiver<AnnouncementReport>,
    interrupt: Interrupt,
    handle: Option<JoinHandle<()>>,
}

impl SpeechWorker {
    /// Start the worker thread
    ///
    /// # Errors
    ///
    /// Returns error if the thread cannot be spawned
    pub fn spawn(mut sink: Box<dyn SpeechSink>) -> Result<Self> {
        let (tx, mut rx) = mpsc::channel::<Announcement>(1);
        let (report_tx, reports) = mpsc::unbounded_channel();
        let interrupt = Interrupt::default();
        let worker_interrupt = interrupt.clone();

        let handle = thread::Builder::new()
            .name("speech".to_string())
            .spawn(move || {
                tracing::debug!(sink = sink.name(), "speech worker started");

                while let Some(announcement) = rx.blocking_recv() {
                    let outcome = if worker_interrupt.is_raised() {
                        AnnouncementOutcome::Interrupted
                    } else {
                        match sink.speak(&announcement.text, &worker_interrupt) {
                            Ok(PlaybackEnd::Finished) => AnnouncementOutcome::Completed,
                            Ok(PlaybackEnd::Interrupted) => AnnouncementOutcome::Interrupted,
                            Err(e) => {
                                tracing::error!(id = announcement.id, error = %e, "speech failed");
                                AnnouncementOutcome::Failed(e.to_string())
                            }
                        }
                    };

                    let report = AnnouncementReport {
                        id: announcement.id,
                        command: announcement.command,
                        outcome,
                        finished_at: Instant::now(),
                    };
                    if report_tx.send(report).is_err() {
                        break;
                    }
                }

                sink.release();
                tracing::debug!("speech worker stopped");
            })?;

        Ok(Self {
            tx: Some(tx),
            reports,
            interrupt,
            handle: Some(handle),
        })
    }

    /// Whether the worker thread is still accepting announcements
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.tx.is_some()
    }

    fn stop(&mut self, policy: ShutdownPolicy) -> Result<()> {
        if policy == ShutdownPolicy::Interrupt {
            self.interrupt.raise();
        }
        // Closing the channel ends the worker loop after the current utterance
        self.tx = None;

        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| Error::Speech("speech worker panicked".to_string())),
            None => Ok(()),
        }
    }
}

impl Announcer for SpeechWorker {
    fn begin(&mut self, announcement: Announcement) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| Error::Speech("speech worker stopped".to_string()))?;
        tx.try_send(announcement).map_err(|e| match e {
            TrySendError::Full(a) => Error::Speech(format!("speech worker busy, dropped #{}", a.id)),
            TrySendError::Closed(_) => Error::Speech("speech worker stopped".to_string()),
        })
    }

    fn poll_finished(&mut self) -> Option<AnnouncementReport> {
        self.reports.try_recv().ok()
    }

    fn shutdown(&mut self, policy: ShutdownPolicy) -> Result<()> {
        self.stop(policy)?;
        tracing::info!(policy = %policy, "speech worker joined");
        Ok(())
    }
}

impl Drop for SpeechWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            if let Err(e) = self.stop(ShutdownPolicy::Interrupt) {
                tracing::warn!(error = %e, "speech worker did not stop cleanly");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::dispatch::{AnnouncementKind, CommandId};

    /// Records what it said; blocks on each utterance until told to go on or interrupted
    struct GatedSink {
        said: Arc<Mutex<Vec<String>>>,
        gate: Arc<Mutex<bool>>,
    }

    impl SpeechSink for GatedSink {
        fn name(&self) -> &'static str {
            "gated"
        }

        fn speak(&mut self, text: &str, interrupt: &Interrupt) -> Result<PlaybackEnd> {
            loop {
                if interrupt.is_raised() {
                    return Ok(PlaybackEnd::Interrupted);
                }
                if *self.gate.lock().unwrap() {
                    self.said.lock().unwrap().push(text.to_string());
                    return Ok(PlaybackEnd::Finished);
                }
                thread::sleep(Duration::from_millis(5));
            }
        }
    }

    fn announcement(id: u64) -> Announcement {
        Announcement {
            id,
            command: CommandId::Identify,
            kind: AnnouncementKind::Result,
            text: format!("utterance {id}"),
        }
    }

    fn wait_report(worker: &mut SpeechWorker) -> AnnouncementReport {
        for _ in 0..400 {
            if let Some(report) = worker.poll_finished() {
                return report;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("no report from speech worker");
    }

    #[test]
    fn test_reports_completion() {
        let said = Arc::new(Mutex::new(Vec::new()));
        let sink = GatedSink {
            said: Arc::clone(&said),
            gate: Arc::new(Mutex::new(true)),
        };
        let mut worker = SpeechWorker::spawn(Box::new(sink)).unwrap();
        worker.begin(announcement(1)).unwrap();

        let report = wait_report(&mut worker);
        assert_eq!(report.id, 1);
        assert_eq!(report.outcome, AnnouncementOutcome::Completed);
        assert_eq!(said.lock().unwrap().as_slice(), ["utterance 1"]);
        worker.shutdown(ShutdownPolicy::Finish).unwrap();
    }

    #[test]
    fn test_finish_policy_waits_for_utterance() {
        let said = Arc::new(Mutex::new(Vec::new()));
        let gate = Arc::new(Mutex::new(false));
        let sink = GatedSink {
            said: Arc::clone(&said),
            gate: Arc::clone(&gate),
        };
        let mut worker = SpeechWorker::spawn(Box::new(sink)).unwrap();
        worker.begin(announcement(7)).unwrap();

        let opener = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                *gate.lock().unwrap() = true;
            })
        };
        worker.shutdown(ShutdownPolicy::Finish).unwrap();
        opener.join().unwrap();

        assert_eq!(said.lock().unwrap().as_slice(), ["utterance 7"]);
        assert_eq!(
            worker.poll_finished().map(|r| r.outcome),
            Some(AnnouncementOutcome::Completed)
        );
        assert!(!worker.is_running());
    }

    #[test]
    fn test_interrupt_policy_cuts_utterance() {
        let said = Arc::new(Mutex::new(Vec::new()));
        let sink = GatedSink {
            said: Arc::clone(&said),
            gate: Arc::new(Mutex::new(false)),
        };
        let mut worker = SpeechWorker::spawn(Box::new(sink)).unwrap();
        worker.begin(announcement(3)).unwrap();

        worker.shutdown(ShutdownPolicy::Interrupt).unwrap();

        assert!(said.lock().unwrap().is_empty());
        assert_eq!(
            worker.poll_finished().map(|r| r.outcome),
            Some(AnnouncementOutcome::Interrupted)
        );
        assert!(worker.begin(announcement(4)).is_err());
    }
}
