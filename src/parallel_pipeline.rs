// THEORY:
// The `ParallelPipeline` runs a `CoverageAnalyzer` off the capture thread. Frames come
// from a camera callback far faster than analysis can keep up, so the hand-off is
// built around three rules:
//
// 1.  **Latest only**: Frames travel through a `watch` channel. A frame that has not
//     been picked up yet is replaced by the next one, never queued behind it.
// 2.  **Generations**: Every frame is tagged with the session generation at submission.
//     `reset()` bumps the generation and tells the worker to start a new session.
//     Frames and in-flight results from an older generation are dropped, never
//     merged into the new session.
// 3.  **Single owner**: The analyzer lives on one worker task. CPU work runs on the
//     blocking pool with the analyzer moved in and handed back, so no lock ever
//     guards session state.

use crate::config::AnalyzerConfig;
use crate::core_modules::feature_extractor::FeatureExtractor;
use crate::core_modules::frame::Frame;
use crate::core_modules::matcher::DescriptorMatcher;
use crate::error::{Result, VisionError};
use crate::pipeline::{AnalysisResult, CoverageAnalyzer};
use image::RgbImage;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

const RESULT_CHANNEL_CAPACITY: usize = 4;

#[derive(Clone)]
struct TaggedFrame {
    generation: u64,
    frame: Frame,
}

enum Control {
    Reset(u64, oneshot::Sender<u64>),
    Heatmap(oneshot::Sender<Option<RgbImage>>),
    Shutdown,
}

pub struct ParallelPipeline {
    frame_sender: watch::Sender<Option<TaggedFrame>>,
    control_sender: mpsc::UnboundedSender<Control>,
    generation: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}

impl ParallelPipeline {
    /// Starts the worker. Must be called from within a tokio runtime.
    pub fn spawn(
        config: AnalyzerConfig,
        extractor: Box<dyn FeatureExtractor>,
        matcher: Box<dyn DescriptorMatcher>,
    ) -> Result<(Self, mpsc::Receiver<AnalysisResult>)> {
        let analyzer = CoverageAnalyzer::with_collaborators(config, extractor, matcher)?;
        let generation = Arc::new(AtomicU64::new(analyzer.session_id()));

        let (frame_sender, frame_receiver) = watch::channel(None);
        let (control_sender, control_receiver) = mpsc::unbounded_channel();
        let (result_sender, result_receiver) = mpsc::channel(RESULT_CHANNEL_CAPACITY);

        let worker = tokio::spawn(Self::run_worker(
            analyzer,
            frame_receiver,
            control_receiver,
            result_sender,
            generation.clone(),
        ));

        let pipeline = Self {
            frame_sender,
            control_sender,
            generation,
            worker: Some(worker),
        };
        Ok((pipeline, result_receiver))
    }

    async fn run_worker(
        mut analyzer: CoverageAnalyzer,
        mut frames: watch::Receiver<Option<TaggedFrame>>,
        mut control: mpsc::UnboundedReceiver<Control>,
        results: mpsc::Sender<AnalysisResult>,
        generation: Arc<AtomicU64>,
    ) {
        loop {
            tokio::select! {
                biased;

                command = control.recv() => match command {
                    Some(Control::Reset(session_id, done)) => {
                        if session_id > analyzer.session_id() {
                            analyzer.begin_session(session_id);
                        }
                        let _ = done.send(analyzer.session_id());
                    }
                    Some(Control::Heatmap(reply)) => {
                        let _ = reply.send(analyzer.heatmap());
                    }
                    Some(Control::Shutdown) | None => break,
                },

                changed = frames.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let Some(tagged) = frames.borrow_and_update().clone() else {
                        continue;
                    };
                    let current = generation.load(Ordering::Acquire);
                    if tagged.generation != current {
                        log::debug!(
                            "dropping frame {} from session {} (now {})",
                            tagged.frame.sequence,
                            tagged.generation,
                            current
                        );
                        continue;
                    }
                    if analyzer.session_id() < current {
                        analyzer.begin_session(current);
                    }

                    let job = tokio::task::spawn_blocking(move || {
                        let result = analyzer.analyze(&tagged.frame);
                        (analyzer, result)
                    });
                    let result = match job.await {
                        Ok((returned, result)) => {
                            analyzer = returned;
                            result
                        }
                        Err(err) => {
                            log::error!("analysis worker failed, pipeline stopped: {err}");
                            return;
                        }
                    };

                    if result.session_id != generation.load(Ordering::Acquire) {
                        log::debug!(
                            "discarding stale result for frame {} (session {})",
                            result.frame_sequence,
                            result.session_id
                        );
                        continue;
                    }
                    if results.send(result).await.is_err() {
                        log::debug!("result receiver dropped");
                    }
                }
            }
        }
        analyzer.shutdown();
    }

    /// Offers a frame for analysis. Replaces any frame the worker has not picked up yet.
    pub fn submit(&self, frame: Frame) -> Result<()> {
        let tagged = TaggedFrame {
            generation: self.generation.load(Ordering::Acquire),
            frame,
        };
        self.frame_sender
            .send(Some(tagged))
            .map_err(|_| VisionError::PipelineClosed)
    }

    /// Starts a new session and returns its id once the worker has dropped the old
    /// session's buffers. Pending and in-flight frames of the old session will not
    /// produce results.
    pub async fn reset(&self) -> Result<u64> {
        let session_id = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.frame_sender.send_replace(None);
        let (done, replaced) = oneshot::channel();
        self.control_sender
            .send(Control::Reset(session_id, done))
            .map_err(|_| VisionError::PipelineClosed)?;
        replaced.await.map_err(|_| VisionError::PipelineClosed)
    }

    pub fn session_id(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Current coverage heatmap, `None` before the session's first frame.
    pub async fn heatmap(&self) -> Result<Option<RgbImage>> {
        let (reply, response) = oneshot::channel();
        self.control_sender
            .send(Control::Heatmap(reply))
            .map_err(|_| VisionError::PipelineClosed)?;
        response.await.map_err(|_| VisionError::PipelineClosed)
    }

    /// Stops the worker and waits until the session's buffers are released.
    pub async fn shutdown(mut self) -> Result<()> {
        let _ = self.control_sender.send(Control::Shutdown);
        if let Some(worker) = self.worker.take() {
            worker.await.map_err(|_| VisionError::PipelineClosed)?;
        }
        Ok(())
    }
}

impl Drop for ParallelPipeline {
    fn drop(&mut self) {
        // Best effort shutdown on drop
        if self.worker.take().is_some() {
            let _ = self.control_sender.send(Control::Shutdown);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::frame::FeatureSet;
    use crate::core_modules::matcher::BruteForceHamming;
    use crate::pipeline::tests::{ScriptedExtractor, blank_frame, moved};
    use std::time::Duration;

    /// Delays every extraction so that resets can land while a frame is in flight.
    struct SlowExtractor {
        inner: ScriptedExtractor,
        delay: Duration,
    }

    impl FeatureExtractor for SlowExtractor {
        fn extract(&mut self, frame: &Frame) -> Result<FeatureSet> {
            std::thread::sleep(self.delay);
            self.inner.extract(frame)
        }
    }

    fn spawn_scripted(
        script: Vec<Result<FeatureSet>>,
    ) -> (ParallelPipeline, mpsc::Receiver<AnalysisResult>) {
        ParallelPipeline::spawn(
            AnalyzerConfig::default(),
            Box::new(ScriptedExtractor::new(script)),
            Box::new(BruteForceHamming),
        )
        .expect("valid config")
    }

    #[tokio::test]
    async fn rejects_invalid_config() {
        let config = AnalyzerConfig {
            max_features: 0,
            ..AnalyzerConfig::default()
        };
        let spawned = ParallelPipeline::spawn(
            config,
            Box::new(ScriptedExtractor::new(Vec::new())),
            Box::new(BruteForceHamming),
        );
        assert!(spawned.is_err());
    }

    #[tokio::test]
    async fn frames_produce_results_for_the_current_session() {
        let (pipeline, mut results) = spawn_scripted(vec![Ok(moved(0.0, 0.0)), Ok(moved(30.0, 0.0))]);
        assert_eq!(pipeline.heatmap().await.unwrap(), None);

        pipeline.submit(blank_frame(0)).unwrap();
        let first = results.recv().await.unwrap();
        assert_eq!(first.frame_sequence, 0);
        assert_eq!(first.coverage_ratio, 0.0);

        pipeline.submit(blank_frame(1)).unwrap();
        let second = results.recv().await.unwrap();
        assert_eq!(second.session_id, 0);
        assert!((second.coverage_ratio - 0.7).abs() < 1e-9);

        let heatmap = pipeline.heatmap().await.unwrap().expect("heatmap after frames");
        assert_eq!(heatmap.dimensions(), (100, 80));
        pipeline.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn unpicked_frames_are_replaced_not_queued() {
        let script = (0..5).map(|_| Ok(moved(0.0, 0.0))).collect();
        let (pipeline, mut results) = spawn_scripted(script);
        for sequence in 0..5 {
            pipeline.submit(blank_frame(sequence)).unwrap();
        }
        let mut seen = Vec::new();
        while let Some(result) = results.recv().await {
            seen.push(result.frame_sequence);
            if result.frame_sequence == 4 {
                break;
            }
        }
        assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(seen.last(), Some(&4));
        pipeline.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn reset_discards_in_flight_results() {
        let extractor = SlowExtractor {
            inner: ScriptedExtractor::new(vec![Ok(moved(0.0, 0.0)), Ok(moved(0.0, 0.0))]),
            delay: Duration::from_millis(50),
        };
        let (pipeline, mut results) = ParallelPipeline::spawn(
            AnalyzerConfig::default(),
            Box::new(extractor),
            Box::new(BruteForceHamming),
        )
        .unwrap();

        pipeline.submit(blank_frame(0)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pipeline.reset().await.unwrap(), 1);
        pipeline.submit(blank_frame(1)).unwrap();

        let result = results.recv().await.unwrap();
        assert_eq!(result.session_id, 1);
        assert_eq!(result.frame_sequence, 1);
        // A fresh session: the frame only seeded history.
        assert_eq!(result.coverage_ratio, 0.0);
        assert!(!result.is_stable);
        pipeline.shutdown().await.unwrap();
    }

    /// Holds every extraction until the test lets it go.
    struct GatedExtractor {
        started: mpsc::UnboundedSender<()>,
        release: std::sync::mpsc::Receiver<()>,
    }

    impl FeatureExtractor for GatedExtractor {
        fn extract(&mut self, _frame: &Frame) -> Result<FeatureSet> {
            let _ = self.started.send(());
            let _ = self.release.recv();
            Ok(moved(0.0, 0.0))
        }
    }

    #[tokio::test]
    async fn reset_returns_only_after_the_old_session_is_dropped() {
        let (started, mut extraction_started) = mpsc::unbounded_channel();
        let (release, gate) = std::sync::mpsc::channel();
        let (pipeline, _results) = ParallelPipeline::spawn(
            AnalyzerConfig::default(),
            Box::new(GatedExtractor { started, release: gate }),
            Box::new(BruteForceHamming),
        )
        .unwrap();

        pipeline.submit(blank_frame(0)).unwrap();
        extraction_started.recv().await.unwrap();

        {
            let reset = pipeline.reset();
            tokio::pin!(reset);
            // The analyzer is busy with the old session, so the reset cannot finish yet.
            assert!(
                tokio::time::timeout(Duration::from_millis(20), &mut reset)
                    .await
                    .is_err()
            );
            release.send(()).unwrap();
            assert_eq!(reset.await.unwrap(), 1);
        }
        // The frame analyzed in session 0 seeded a coverage map; session 1 has none.
        assert_eq!(pipeline.heatmap().await.unwrap(), None);
        pipeline.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn reset_clears_the_heatmap() {
        let (pipeline, mut results) = spawn_scripted(vec![Ok(moved(0.0, 0.0))]);
        pipeline.submit(blank_frame(0)).unwrap();
        results.recv().await.unwrap();
        assert!(pipeline.heatmap().await.unwrap().is_some());

        pipeline.reset().await.unwrap();
        assert_eq!(pipeline.session_id(), 1);
        assert_eq!(pipeline.heatmap().await.unwrap(), None);
        pipeline.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn dropping_the_pipeline_closes_the_result_stream() {
        let (pipeline, mut results) = spawn_scripted(Vec::new());
        drop(pipeline);
        assert!(results.recv().await.is_none());
    }

    #[tokio::test]
    async fn pipelines_are_independent() {
        let (a, mut results_a) = spawn_scripted(vec![Ok(moved(0.0, 0.0))]);
        let (b, _results_b) = spawn_scripted(Vec::new());
        b.reset().await.unwrap();
        a.submit(blank_frame(0)).unwrap();
        assert_eq!(results_a.recv().await.unwrap().session_id, 0);
        assert_eq!(a.session_id(), 0);
        assert_eq!(b.session_id(), 1);
        a.shutdown().await.unwrap();
        b.shutdown().await.unwrap();
    }
}
