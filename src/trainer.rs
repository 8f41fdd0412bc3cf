use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::{Busy, Classifier, Embedder, Error, FrameSource, Label, TrainingConfig};

/// Trainer captures paced batches of labelled examples from the live camera
/// and feeds them to the classifier, strictly one at a time.
pub struct Trainer {
    frames: Arc<dyn FrameSource>,
    embedder: Arc<dyn Embedder>,
    classifier: Arc<Mutex<dyn Classifier>>,
    busy: Busy,
    reps: usize,
    pace: Duration,
}

impl Trainer {
    pub fn new(
        config: &TrainingConfig,
        frames: Arc<dyn FrameSource>,
        embedder: Arc<dyn Embedder>,
        classifier: Arc<Mutex<dyn Classifier>>,
        busy: Busy,
    ) -> Self {
        Self {
            frames,
            embedder,
            classifier,
            busy,
            reps: config.reps,
            pace: Duration::from_millis(config.pace_ms),
        }
    }

    /// Run one batch for `label`: grab, embed and store examples in strict
    /// sequence, pausing between captures. `progress` is called with
    /// `(completed, total)` after each stored example.
    ///
    /// The first error aborts the batch; examples stored before it stay in
    /// the classifier.
    pub fn run_batch<F>(&self, label: &Label, mut progress: F) -> Result<(), Error>
    where
        F: FnMut(usize, usize),
    {
        let _guard = self.busy.try_acquire()?;

        log::info!("training {}: {} captures", label, self.reps);
        for i in 0..self.reps {
            let frame = self.frames.grab()?;
            let embedding = self.embedder.infer(&frame)?;
            self.classifier
                .lock()
                .unwrap()
                .add_example(embedding, label.clone())?;
            progress(i + 1, self.reps);

            if i + 1 < self.reps {
                thread::sleep(self.pace);
            }
        }
        log::info!("training {} done", label);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Embedding, Frame, Prediction, EMBEDDING_DIM};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Frames tagged with their grab order; optionally fails a given grab.
    struct FakeFrames {
        grabs: AtomicUsize,
        fail_at: Option<usize>,
    }

    impl FakeFrames {
        fn new(fail_at: Option<usize>) -> Self {
            Self {
                grabs: AtomicUsize::new(0),
                fail_at,
            }
        }
    }

    impl FrameSource for FakeFrames {
        fn grab(&self) -> Result<Frame, Error> {
            let n = self.grabs.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_at == Some(n) {
                return Err(Error::Capture("fake camera unplugged".into()));
            }
            Ok(Frame {
                seq: n as u64,
                width: 2,
                height: 2,
                pixels: vec![0; 12],
            })
        }
    }

    /// Embeds the frame's sequence number into the first component.
    struct TagEmbedder;

    impl Embedder for TagEmbedder {
        fn infer(&self, frame: &Frame) -> Result<Embedding, Error> {
            let mut values = vec![0.0f32; EMBEDDING_DIM];
            values[0] = frame.seq as f32;
            Ok(Embedding::from_slice(&values).unwrap())
        }
    }

    /// Records every example it is given.
    #[derive(Default)]
    struct RecordingClassifier {
        stored: Vec<(f32, Label)>,
    }

    impl Classifier for RecordingClassifier {
        fn add_example(&mut self, embedding: Embedding, label: Label) -> Result<(), Error> {
            self.stored.push((embedding.as_slice()[0], label));
            Ok(())
        }

        fn predict(&self, _embedding: &Embedding) -> Result<Prediction, Error> {
            Err(Error::Classifier("not under test".into()))
        }

        fn counts(&self) -> BTreeMap<Label, usize> {
            BTreeMap::new()
        }
    }

    fn trainer(
        reps: usize,
        fail_at: Option<usize>,
    ) -> (Trainer, Arc<Mutex<RecordingClassifier>>, Busy) {
        let config = TrainingConfig { reps, pace_ms: 0 };
        let recording = Arc::new(Mutex::new(RecordingClassifier::default()));
        let classifier: Arc<Mutex<dyn Classifier>> = recording.clone();
        let busy = Busy::new();
        let trainer = Trainer::new(
            &config,
            Arc::new(FakeFrames::new(fail_at)),
            Arc::new(TagEmbedder),
            classifier,
            busy.clone(),
        );
        (trainer, recording, busy)
    }

    #[test]
    fn batch_runs_reps_in_order() {
        let (trainer, recording, _busy) = trainer(5, None);
        let label = Label::new("touch");

        let mut reported = Vec::new();
        trainer
            .run_batch(&label, |done, total| reported.push((done, total)))
            .unwrap();

        let recording = recording.lock().unwrap();
        let tags: Vec<f32> = recording.stored.iter().map(|(tag, _)| *tag).collect();
        assert_eq!(tags, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!(recording.stored.iter().all(|(_, l)| l == &label));
        assert_eq!(reported, vec![(1, 5), (2, 5), (3, 5), (4, 5), (5, 5)]);
    }

    #[test]
    fn examples_stored_in_capture_order() {
        let (trainer, recording, _busy) = trainer(3, None);

        trainer.run_batch(&Label::new("no_touch"), |_, _| {}).unwrap();

        let tags: Vec<f32> = recording
            .lock()
            .unwrap()
            .stored
            .iter()
            .map(|(tag, _)| *tag)
            .collect();
        assert_eq!(tags, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn partial_batch_kept_on_capture_failure() {
        let (trainer, recording, _busy) = trainer(5, Some(3));

        let mut reported = 0;
        let err = trainer
            .run_batch(&Label::new("touch"), |_, _| reported += 1)
            .unwrap_err();

        assert!(matches!(err, Error::Capture(_)));
        // The first two examples survive the abort.
        assert_eq!(recording.lock().unwrap().stored.len(), 2);
        assert_eq!(reported, 2);
    }

    #[test]
    fn busy_pipeline_rejects_a_batch() {
        let (trainer, _recording, busy) = trainer(2, None);
        let guard = busy.try_acquire().unwrap();

        assert!(matches!(
            trainer.run_batch(&Label::new("touch"), |_, _| {}),
            Err(Error::Busy)
        ));
        drop(guard);

        // Released again: batches run back to back.
        trainer.run_batch(&Label::new("touch"), |_, _| {}).unwrap();
        trainer.run_batch(&Label::new("touch"), |_, _| {}).unwrap();
    }
}
