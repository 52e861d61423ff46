//! The frame loop
//!
//! One tick: grab a frame, run perception, feed the stabilizer and age out stale votes,
//! collect finished announcements, then hand queued input to the dispatcher. Input is drained after
//! the stabilizer is updated, so a request always sees the latest frame.

use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::runtime::RuntimeFlavor;
use tokio::sync::mpsc;

use crate::camera::{FrameSource, SyntheticCamera};
use crate::config::Config;
use crate::dispatch::{
    Announcer, CommandId, CommandRequest, DispatchState, Dispatcher, InputEvent, RequestSource,
    ShutdownPolicy, Transition,
};
use crate::perception::{
    BanknoteEngine, DetectionModel, LabelScores, LabelSet, NoOcr, Perception, PriceEngine,
    QueryType, Reducer, TextEngine, UnavailableClassifier, VisionEngine, probe_classifier,
    probe_ocr,
};
use crate::speech::{LogSink, SpeechWorker};
use crate::stabilizer::{StabilizedResult, Stabilizer};
use crate::{Error, Result};

/// Default frame budget for [`self_check`]
pub const SELF_CHECK_FRAMES: u32 = 200;

/// Real time allowed per self-check frame while an announcement is playing
const SELF_CHECK_SETTLE: Duration = Duration::from_millis(5);

/// Inference backends supplied by an integration
///
/// Anything left `None` is probed from configuration and falls back to dummy or
/// unavailable behavior.
#[derive(Default)]
pub struct Backends {
    pub detector: Option<Box<dyn DetectionModel>>,
    pub banknote_scorer: Option<Box<dyn LabelScores>>,
}

/// Whether the loop should keep going after a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Continue,
    Quit,
}

/// Build the perception stack described by `config`
#[must_use]
pub fn build_perception(config: &Config, backends: Backends) -> Perception {
    let vision = VisionEngine::resolve(
        &config.perception.weights,
        backends.detector,
        &config.perception.allowed_labels,
        config.perception.dummy_mode,
    );

    let labels = LabelSet::load_or_default(&config.banknote.labels);
    let classifier = probe_classifier(
        &config.banknote.model,
        backends.banknote_scorer,
        &labels,
        config.banknote.confidence_threshold,
        config.banknote.margin,
    );
    let ocr_binary = config.ocr.binary.as_deref();
    let banknote = BanknoteEngine::new(
        classifier,
        probe_ocr(config.ocr.enabled, ocr_binary),
        labels,
    );
    let price = PriceEngine::new(probe_ocr(config.ocr.enabled, ocr_binary));
    let text = TextEngine::new(probe_ocr(config.ocr.enabled, ocr_binary));

    Perception::new(
        vision,
        Reducer::new(config.perception.reducer_config()),
        banknote,
        price,
        config.perception.value_sample_stride,
    )
    .with_text(text)
}

/// Owns every stage of the pipeline
pub struct Engine<A: Announcer> {
    frames: Box<dyn FrameSource>,
    perception: Perception,
    stabilizer: Stabilizer,
    dispatcher: Dispatcher<A>,
    inputs: mpsc::UnboundedReceiver<InputEvent>,
    shutdown_policy: ShutdownPolicy,
    frame_interval: Duration,
    debug_overlay: bool,
}

impl<A: Announcer> Engine<A> {
    #[must_use]
    pub fn new(
        config: &Config,
        frames: Box<dyn FrameSource>,
        perception: Perception,
        announcer: A,
        inputs: mpsc::UnboundedReceiver<InputEvent>,
    ) -> Self {
        let dummy_mode = perception.dummy_mode();
        if dummy_mode {
            tracing::warn!("object detection is in dummy mode, results are fabricated");
        }
        Self {
            frames,
            perception,
            stabilizer: Stabilizer::new(config.stabilizer.clone()),
            dispatcher: Dispatcher::new(config.dispatch.clone(), dummy_mode, announcer),
            inputs,
            shutdown_policy: config.shutdown_policy,
            frame_interval: config.camera.frame_interval(),
            debug_overlay: config.perception.debug_overlay,
        }
    }

    #[must_use]
    pub const fn stabilizer(&self) -> &Stabilizer {
        &self.stabilizer
    }

    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher<A> {
        &self.dispatcher
    }

    /// Run one frame through the pipeline and handle pending input
    ///
    /// # Errors
    ///
    /// Returns error if the frame source failed irrecoverably
    pub fn step(&mut self, now: Instant) -> Result<Tick> {
        if let Some(frame) = self.frames.next_frame()? {
            let samples = self.perception.observe(&frame);
            if self.debug_overlay {
                for sample in &samples {
                    tracing::debug!(
                        frame = frame.index,
                        query = %sample.query,
                        label = %sample.label,
                        confidence = sample.confidence,
                        count = ?sample.count,
                        bbox = ?sample.bbox,
                        "sample"
                    );
                }
            }
            self.stabilizer.ingest_all(samples);
        }
        self.stabilizer.expire(now);

        if let Some(outcome) = self.dispatcher.poll(&self.stabilizer, now) {
            tracing::debug!(outcome = ?outcome, "queued request handled");
        }

        loop {
            match self.inputs.try_recv() {
                Ok(InputEvent::Command(request)) => {
                    let outcome = self.dispatcher.submit(request, &self.stabilizer, now);
                    tracing::debug!(
                        command = %request.command,
                        outcome = ?outcome,
                        "request handled"
                    );
                }
                Ok(InputEvent::Quit) => {
                    tracing::info!("quit requested");
                    return Ok(Tick::Quit);
                }
                Err(mpsc::error::TryRecvError::Empty) => return Ok(Tick::Continue),
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    tracing::info!("all input sources closed");
                    return Ok(Tick::Quit);
                }
            }
        }
    }

    /// Stop dispatching and release the speech device
    ///
    /// # Errors
    ///
    /// Returns error if the announcer failed to shut down cleanly
    pub fn shutdown(&mut self) -> Result<()> {
        self.dispatcher.shutdown(self.shutdown_policy)
    }

    /// Tick at the camera frame rate until quit or Ctrl-C
    ///
    /// # Errors
    ///
    /// Returns error if the frame source fails or shutdown is unclean
    pub async fn run(mut self) -> Result<()> {
        let mut interval = tokio::time::interval(self.frame_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        tracing::info!(
            interval_ms = self.frame_interval.as_millis(),
            dummy_mode = self.perception.dummy_mode(),
            "engine running"
        );

        let outcome = loop {
            tokio::select! {
                _ = &mut ctrl_c => {
                    tracing::info!("received Ctrl-C, shutting down");
                    break Ok(());
                }
                _ = interval.tick() => {
                    match self.step(Instant::now()) {
                        Ok(Tick::Continue) => {}
                        Ok(Tick::Quit) => break Ok(()),
                        Err(e) => {
                            tracing::error!(error = %e, "frame loop failed");
                            break Err(e);
                        }
                    }
                }
            }
        };

        // With the finish policy this blocks for the rest of the utterance
        let released = if tokio::runtime::Handle::current().runtime_flavor() == RuntimeFlavor::MultiThread {
            tokio::task::block_in_place(|| self.shutdown())
        } else {
            self.shutdown()
        };
        tracing::info!("engine stopped");
        outcome.and(released)
    }
}

/// What [`self_check`] observed
#[derive(Debug, Clone, Serialize)]
pub struct SelfCheckReport {
    pub passed: bool,
    pub dummy_mode: bool,
    /// Frames consumed before the check concluded
    pub frames_used: u32,
    pub frame_budget: u32,
    /// Frame at which the synthetic request was issued
    pub request_frame: Option<u32>,
    /// The decision the request was evaluated against
    pub decision: Option<StabilizedResult>,
    pub transitions: Vec<Transition>,
    pub final_state: DispatchState,
}

/// Drive the pipeline end to end on synthetic frames
///
/// Uses dummy detection and a silent speech sink, so it needs neither a camera nor
/// an audio device. Passes when an identify request walks
/// `IDLE -> AWAITING_DECISION -> ANNOUNCING -> IDLE` within `frame_budget` frames.
///
/// # Errors
///
/// Returns error if the speech worker cannot be started
pub fn self_check(config: &Config, frame_budget: u32) -> Result<SelfCheckReport> {
    let perception = Perception::new(
        VisionEngine::dummy(),
        Reducer::new(config.perception.reducer_config()),
        BanknoteEngine::new(
            Box::new(UnavailableClassifier::new("self-check")),
            Box::new(NoOcr::new("self-check")),
            LabelSet::default(),
        ),
        PriceEngine::new(Box::new(NoOcr::new("self-check"))),
        config.perception.value_sample_stride,
    )
    .with_text(TextEngine::new(Box::new(NoOcr::new("self-check"))));
    let frames = Box::new(SyntheticCamera::new(config.camera.width, config.camera.height));
    let worker = SpeechWorker::spawn(Box::new(LogSink::default()))?;
    let (tx, rx) = mpsc::unbounded_channel();

    let mut engine = Engine::new(config, frames, perception, worker, rx);
    let mut request_frame = None;
    let mut decision = None;
    let mut frames_used = 0;

    for frame in 0..frame_budget {
        let now = Instant::now();
        frames_used = frame + 1;

        if request_frame.is_none() {
            let result = engine.stabilizer().current_result(QueryType::Identify);
            if result.is_stable {
                let request =
                    CommandRequest::new(CommandId::Identify, now, RequestSource::Keyboard);
                tx.send(InputEvent::Command(request))
                    .map_err(|_| Error::Input("self-check input closed".to_string()))?;
                request_frame = Some(frame);
                decision = Some(result);
            }
        }

        engine.step(now)?;

        if request_frame.is_some() {
            match engine.dispatcher().state() {
                DispatchState::Idle => break,
                DispatchState::Announcing => std::thread::sleep(SELF_CHECK_SETTLE),
                _ => {}
            }
        }
    }

    let transitions: Vec<Transition> = engine.dispatcher().history().copied().collect();
    let final_state = engine.dispatcher().state();
    engine.shutdown()?;

    let passed = request_frame.is_some()
        && final_state == DispatchState::Idle
        && walked_announce_cycle(&transitions);
    tracing::info!(passed, frames_used, "self-check finished");

    Ok(SelfCheckReport {
        passed,
        dummy_mode: true,
        frames_used,
        frame_budget,
        request_frame,
        decision,
        transitions,
        final_state,
    })
}

/// The history contains a full announce cycle and never re-enters `ANNOUNCING`
fn walked_announce_cycle(transitions: &[Transition]) -> bool {
    let expected = [
        (DispatchState::Idle, DispatchState::AwaitingDecision),
        (DispatchState::AwaitingDecision, DispatchState::Announcing),
        (DispatchState::Announcing, DispatchState::Idle),
    ];
    let walked: Vec<(DispatchState, DispatchState)> =
        transitions.iter().map(|t| (t.from, t.to)).collect();
    let cycle = walked.windows(expected.len()).any(|w| w == expected);
    let reentered = walked
        .iter()
        .any(|&(from, to)| from == DispatchState::Announcing && to == DispatchState::Announcing);
    cycle && !reentered
}
