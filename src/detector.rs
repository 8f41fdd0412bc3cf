use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, sync_channel, Receiver, Sender, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::{
    Busy, BusyGuard, Classifier, CueGate, DetectionConfig, Embedder, Error, Fire, FrameSource,
    Label, PlayRequest,
};

/// One inference iteration's published result. Emitted every iteration,
/// whether or not anything changed.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    /// The label the classifier picked for the newest frame.
    pub label: Label,
    /// Confidence of the configured active label, not of the winner.
    pub confidence: f32,
    pub active: bool,
}

/// One iteration of the pipeline: newest frame in, verdict out, cue fired
/// through the gate.
struct Engine {
    frames: Arc<dyn FrameSource>,
    embedder: Arc<dyn Embedder>,
    classifier: Arc<Mutex<dyn Classifier>>,
    gate: CueGate,
    play: Sender<PlayRequest>,
    finished_tx: Sender<()>,
    finished_rx: Receiver<()>,
    active_label: Label,
    threshold: f32,
}

impl Engine {
    fn tick(&mut self) -> Result<Verdict, Error> {
        // Re-arm for every playback that finished since the last iteration.
        while let Ok(()) = self.finished_rx.try_recv() {
            self.gate.effect_finished();
        }

        let frame = self.frames.grab()?;
        let embedding = self.embedder.infer(&frame)?;
        let prediction = self.classifier.lock().unwrap().predict(&embedding)?;

        let confidence = prediction.confidence(&self.active_label);
        let active = prediction.label == self.active_label && confidence >= self.threshold;

        // The gate is only consulted while active; every active iteration
        // attempts, and the gate owns duplicate suppression.
        if active && self.gate.attempt_fire() == Fire::Fired {
            if self.play.send(self.finished_tx.clone()).is_err() {
                // Player gone: re-arm rather than cool forever on a cue
                // that will never finish.
                log::warn!("cue player is gone, alert not played");
                self.gate.effect_finished();
            }
        }

        Ok(Verdict {
            label: prediction.label,
            confidence,
            active,
        })
    }
}

/// Detector polls the pipeline at a fixed pace, publishes one verdict per
/// iteration and halts permanently on the first error.
pub struct Detector {
    recv: Option<Receiver<Verdict>>,
    shutdown: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Detector {
    pub fn start(
        config: &DetectionConfig,
        frames: Arc<dyn FrameSource>,
        embedder: Arc<dyn Embedder>,
        classifier: Arc<Mutex<dyn Classifier>>,
        play: Sender<PlayRequest>,
        busy: &Busy,
    ) -> Result<Self, Error> {
        let guard = busy.try_acquire()?;

        let (finished_tx, finished_rx) = channel();
        let engine = Engine {
            frames,
            embedder,
            classifier,
            gate: CueGate::new(),
            play,
            finished_tx,
            finished_rx,
            active_label: config.active_label.clone(),
            threshold: config.threshold,
        };

        let (send, recv) = sync_channel(8);
        let shutdown = Arc::new(AtomicBool::new(false));

        let shutdown2 = shutdown.clone();
        let pace = Duration::from_millis(config.pace_ms);
        let thread = Some(thread::spawn(move || {
            Detector::mainloop(engine, send, shutdown2, pace, guard);
        }));

        Ok(Self {
            recv: Some(recv),
            shutdown,
            thread,
        })
    }

    pub fn take_receiver(&mut self) -> Option<Receiver<Verdict>> {
        self.recv.take()
    }

    /// True while the loop thread is alive. A halted loop keeps the struct
    /// but not the pipeline; starting again is the operator's call.
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// Stop the loop and wait for the thread to exit.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(hnd) = self.thread.take() {
            hnd.join().ok();
        }
    }

    fn mainloop(
        mut engine: Engine,
        tx: SyncSender<Verdict>,
        shutdown: Arc<AtomicBool>,
        pace: Duration,
        guard: BusyGuard,
    ) {
        let _guard = guard;

        loop {
            if shutdown.load(Ordering::SeqCst) {
                return;
            }

            let verdict = match engine.tick() {
                Ok(verdict) => verdict,
                Err(e) => {
                    // First error halts the loop for good; restarting is a
                    // deliberate operator action.
                    log::error!("detection loop halted: {}", e);
                    return;
                }
            };

            if shutdown.load(Ordering::SeqCst) {
                return;
            }

            if let Err(e) = tx.try_send(verdict) {
                if matches!(e, TrySendError::Disconnected(_)) {
                    log::debug!("verdict receiver gone, detection loop shutting down");
                    return;
                }
            }

            // Fixed pause between iterations; at most one classification is
            // in flight at any time.
            thread::sleep(pace);
        }
    }
}

impl Drop for Detector {
    fn drop(&mut self) {
        self.stop();
    }
}
