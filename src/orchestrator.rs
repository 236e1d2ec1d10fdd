use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::baidu::{RecognitionError, Recognizer};
use crate::conditioner::{self, ConditionError, ConditionedPayload, Limits, QualityLadder};
use crate::config::OcrConfig;
use crate::error::FailureKind;
use crate::ledger::{Outcome, RunLedger};
use crate::retry::{Decision, RetryPolicy};
use crate::state_machine::{ItemState, WorkItem};

/// Knobs the orchestrator needs, resolved from [`OcrConfig`].
#[derive(Debug, Clone)]
pub struct Settings {
    pub workers: usize,
    pub limits: Limits,
    pub ladder: QualityLadder,
    pub policy: RetryPolicy,
    pub repair_factor: f64,
    /// Upper bound on a single recognition call.
    pub call_timeout: Duration,
}

impl Settings {
    pub fn from_config(config: &OcrConfig) -> Self {
        Self {
            workers: config.workers.max(1),
            limits: config.limits(),
            ladder: config.quality_ladder(),
            policy: config.retry_policy(),
            repair_factor: config.conditioning.repair_factor,
            call_timeout: config.request_timeout(),
        }
    }
}

/// Incremental progress, emitted while a run is in flight.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// An item reached its terminal outcome. `completed` increases by one
    /// with every event, in the order events are sent.
    Completed {
        id: String,
        succeeded: bool,
        completed: usize,
        total: usize,
        success_rate: f64,
    },
    Retrying {
        id: String,
        kind: FailureKind,
        attempt: u32,
        delay: Duration,
    },
    Repairing {
        id: String,
        kind: FailureKind,
        limits: Limits,
    },
}

/// Drives a batch of images through condition → recognize → retry/repair
/// with a fixed pool of workers.
pub struct BatchOrchestrator<R> {
    recognizer: Arc<R>,
    settings: Settings,
    cancel: CancellationToken,
    progress: Option<UnboundedSender<ProgressEvent>>,
}

impl<R: Recognizer + 'static> BatchOrchestrator<R> {
    pub fn new(recognizer: R, settings: Settings) -> Self {
        Self {
            recognizer: Arc::new(recognizer),
            settings,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    /// Use `token` to stop the run early.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_progress(mut self, sender: UnboundedSender<ProgressEvent>) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Process every path and return the ledger of outcomes.
    ///
    /// Every dispatched path gets exactly one outcome. After cancellation no
    /// new paths are dispatched; those never started have no entry.
    pub async fn run(&self, paths: Vec<PathBuf>) -> RunLedger {
        let total = paths.len();
        let ledger = RunLedger::new(total);
        let workers = self.settings.workers.max(1).min(total);

        info!(run_id = %ledger.run_id(), total, workers, "starting batch");

        let run = Arc::new(Run {
            recognizer: Arc::clone(&self.recognizer),
            settings: self.settings.clone(),
            cancel: self.cancel.clone(),
            progress: self.progress.clone(),
            ledger: ledger.clone(),
            queue: Mutex::new(VecDeque::from(paths)),
            tally: Mutex::new(Tally::default()),
            total,
        });

        let mut set = JoinSet::new();
        for worker in 0..workers {
            let run = Arc::clone(&run);
            set.spawn(async move { run.work(worker).await });
        }
        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "worker task failed");
            }
        }

        let summary = ledger.summary();
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            not_dispatched = summary.not_dispatched,
            "batch finished"
        );
        ledger
    }
}

#[derive(Default)]
struct Tally {
    completed: usize,
    succeeded: usize,
}

/// State shared by the workers of one run.
struct Run<R> {
    recognizer: Arc<R>,
    settings: Settings,
    cancel: CancellationToken,
    progress: Option<UnboundedSender<ProgressEvent>>,
    ledger: RunLedger,
    queue: Mutex<VecDeque<PathBuf>>,
    tally: Mutex<Tally>,
    total: usize,
}

impl<R: Recognizer> Run<R> {
    async fn work(&self, worker: usize) {
        loop {
            if self.cancel.is_cancelled() {
                debug!(worker, "cancelled, not taking more work");
                break;
            }
            let Some(path) = self.next_path() else {
                break;
            };
            let mut item = WorkItem::new(&path);
            let span = info_span!("item", id = %item.id, worker);
            let outcome = self.process(&mut item).instrument(span).await;
            debug_assert!(item.state.is_terminal(), "{} ended in {}", item.id, item.state);
            debug!(
                id = %item.id,
                state = %item.state,
                transitions = item.state_history.len(),
                last_failure = ?item.last_failure,
                "item finished"
            );
            self.finish(item.id, outcome);
        }
    }

    fn next_path(&self) -> Option<PathBuf> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    async fn process(&self, item: &mut WorkItem) -> Outcome {
        item.advance(ItemState::Conditioning);
        item.bytes = match tokio::fs::read(&item.path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return self.fail(item, FailureKind::Unclassified, format!("cannot read file: {e}"));
            }
        };

        let mut limits = self.settings.limits;
        let mut payload = match self.condition(&item.bytes, limits, false).await {
            Ok(payload) => payload,
            Err(e) => return self.fail(item, e.kind(), e.to_string()),
        };

        loop {
            if self.cancel.is_cancelled() {
                return self.cancelled(item);
            }

            item.advance(ItemState::Submitting);
            item.attempts.submissions += 1;
            debug!(attempt = item.attempts.submissions, size = payload.byte_size(), "submitting");

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return self.cancelled(item),
                result = tokio::time::timeout(
                    self.settings.call_timeout,
                    self.recognizer.recognize(&payload),
                ) => result.unwrap_or_else(|_| Err(RecognitionError::Timeout)),
            };

            let err = match result {
                Ok(recognition) => {
                    item.advance(ItemState::Succeeded);
                    let char_count = recognition.char_count();
                    debug!(
                        attempts = item.attempts.submissions,
                        char_count,
                        log_id = ?recognition.log_id,
                        direction = ?recognition.direction,
                        "recognized"
                    );
                    return Outcome::Success {
                        recognition,
                        char_count,
                        attempts: item.attempts.submissions,
                        elapsed_ms: item.elapsed_ms(),
                    };
                }
                Err(e) => e,
            };

            let kind = err.kind();
            item.record_failure(kind);

            match self.settings.policy.decide(kind, &item.attempts) {
                Decision::Retry(delay) => {
                    item.advance(ItemState::AwaitingRetry);
                    warn!(%kind, attempt = item.attempts.submissions, delay_ms = delay.as_millis() as u64, "retrying after backoff");
                    self.emit(ProgressEvent::Retrying {
                        id: item.id.clone(),
                        kind,
                        attempt: item.attempts.submissions,
                        delay,
                    });
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return self.cancelled(item),
                        _ = sleep(delay) => {}
                    }
                }
                Decision::Repair => {
                    item.advance(ItemState::Repairing);
                    item.attempts.repairs += 1;
                    limits = limits.tightened_for(&payload, self.settings.repair_factor);
                    warn!(%kind, max_dimension = limits.max_dimension, max_bytes = limits.max_payload_bytes, "repairing payload");
                    self.emit(ProgressEvent::Repairing {
                        id: item.id.clone(),
                        kind,
                        limits,
                    });
                    payload = match self.condition(&item.bytes, limits, true).await {
                        Ok(payload) => payload,
                        Err(e) => return self.fail(item, e.kind(), e.to_string()),
                    };
                }
                Decision::GiveUp => return self.fail(item, kind, err.to_string()),
            }
        }
    }

    /// Runs the conditioner on the blocking pool.
    async fn condition(
        &self,
        bytes: &[u8],
        limits: Limits,
        force: bool,
    ) -> Result<ConditionedPayload, ConditionError> {
        let bytes = bytes.to_vec();
        let ladder = self.settings.ladder;
        tokio::task::spawn_blocking(move || {
            if force {
                conditioner::condition_forced(&bytes, &limits, &ladder)
            } else {
                conditioner::condition(&bytes, &limits, &ladder)
            }
        })
        .await
        .unwrap_or_else(|e| Err(ConditionError::Encode(format!("conditioning task failed: {e}"))))
    }

    fn fail(&self, item: &mut WorkItem, kind: FailureKind, message: String) -> Outcome {
        item.advance(ItemState::Failed);
        error!(%kind, attempts = item.attempts.submissions, %message, "giving up");
        Outcome::Failure {
            kind,
            message,
            attempts: item.attempts.submissions,
            elapsed_ms: item.elapsed_ms(),
        }
    }

    fn cancelled(&self, item: &mut WorkItem) -> Outcome {
        self.fail(item, FailureKind::Unclassified, "cancelled".into())
    }

    /// Records the outcome and publishes progress under one lock so
    /// `completed` is observed in increasing order.
    fn finish(&self, id: String, outcome: Outcome) {
        let succeeded = outcome.is_success();
        let mut tally = self.tally.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.ledger.record(id.clone(), outcome) {
            warn!(%id, "duplicate outcome ignored");
            return;
        }
        tally.completed += 1;
        if succeeded {
            tally.succeeded += 1;
        }
        self.emit(ProgressEvent::Completed {
            id,
            succeeded,
            completed: tally.completed,
            total: self.total,
            success_rate: tally.succeeded as f64 / tally.completed as f64 * 100.0,
        });
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(progress) = &self.progress {
            // A dropped receiver only means nobody is watching.
            let _ = progress.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baidu::{Recognition, TextFragment};
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    /// Pops scripted results in call order, then succeeds forever.
    #[derive(Default)]
    struct ScriptedRecognizer {
        script: Mutex<VecDeque<Result<Recognition, RecognitionError>>>,
        seen: Mutex<Vec<ConditionedPayload>>,
        delay: Duration,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedRecognizer {
        fn with_script(script: Vec<Result<Recognition, RecognitionError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                ..Self::default()
            }
        }

        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }
    }

    impl Recognizer for ScriptedRecognizer {
        async fn recognize(
            &self,
            payload: &ConditionedPayload,
        ) -> Result<Recognition, RecognitionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.seen.lock().unwrap().push(payload.clone());

            if !self.delay.is_zero() {
                sleep(self.delay).await;
            }

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Ok(recognized("hello world")))
        }
    }

    fn recognized(text: &str) -> Recognition {
        Recognition {
            fragments: vec![TextFragment {
                text: text.into(),
                top: None,
            }],
            ..Recognition::default()
        }
    }

    fn settings() -> Settings {
        Settings {
            workers: 3,
            limits: Limits::default(),
            ladder: QualityLadder::default(),
            policy: RetryPolicy {
                base_delay: Duration::from_millis(2),
                ..RetryPolicy::default()
            },
            repair_factor: 0.75,
            call_timeout: Duration::from_secs(5),
        }
    }

    fn write_png(dir: &TempDir, name: &str, width: u32, height: u32) -> PathBuf {
        let img = RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x ^ y) % 256) as u8])
        });
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn retry_delays(events: &[ProgressEvent]) -> Vec<Duration> {
        events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Retrying { delay, .. } => Some(*delay),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn ten_images_all_succeed() {
        let dir = TempDir::new().unwrap();
        let paths: Vec<_> = (0..10)
            .map(|i| write_png(&dir, &format!("page-{i}.png"), 40, 30))
            .collect();

        let orch = BatchOrchestrator::new(ScriptedRecognizer::default(), settings());
        let ledger = orch.run(paths).await;
        let summary = ledger.summary();

        assert_eq!(summary.total, 10);
        assert_eq!(summary.succeeded, 10);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.success_rate, 100.0);
        assert_eq!(summary.total_chars, 10 * "hello world".len());
    }

    #[tokio::test]
    async fn success_keeps_service_metadata() {
        let dir = TempDir::new().unwrap();
        let path = write_png(&dir, "a.png", 40, 30);
        let recognizer = ScriptedRecognizer::with_script(vec![Ok(Recognition {
            log_id: Some(9001),
            direction: Some(1),
            ..recognized("rotated")
        })]);

        let orch = BatchOrchestrator::new(recognizer, settings());
        let ledger = orch.run(vec![path.clone()]).await;

        match ledger.outcome(&path.display().to_string()).unwrap() {
            Outcome::Success {
                recognition,
                char_count,
                ..
            } => {
                assert_eq!(recognition.log_id, Some(9001));
                assert_eq!(recognition.direction, Some(1));
                assert_eq!(char_count, 7);
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rate_limited_twice_then_succeeds() {
        let dir = TempDir::new().unwrap();
        let path = write_png(&dir, "a.png", 40, 30);
        let recognizer = ScriptedRecognizer::with_script(vec![
            Err(RecognitionError::RateLimited("qps".into())),
            Err(RecognitionError::RateLimited("qps".into())),
        ]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let orch = BatchOrchestrator::new(recognizer, settings()).with_progress(tx);
        let ledger = orch.run(vec![path.clone()]).await;

        let outcome = ledger.outcome(&path.display().to_string()).unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.attempts(), 3);
        assert_eq!(
            retry_delays(&drain(&mut rx)),
            vec![Duration::from_millis(2), Duration::from_millis(4)]
        );
    }

    #[tokio::test]
    async fn oversized_image_is_downscaled_without_retry() {
        let dir = TempDir::new().unwrap();
        let path = write_png(&dir, "wide.png", 300, 150);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut settings = settings();
        settings.limits.max_dimension = 100;

        let orch = BatchOrchestrator::new(ScriptedRecognizer::default(), settings).with_progress(tx);
        let ledger = orch.run(vec![path.clone()]).await;

        let outcome = ledger.outcome(&path.display().to_string()).unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.attempts(), 1);

        let seen = orch.recognizer.seen.lock().unwrap();
        assert_eq!((seen[0].width, seen[0].height), (100, 50));
        let events = drain(&mut rx);
        assert!(events.iter().all(|e| matches!(e, ProgressEvent::Completed { .. })));
    }

    #[tokio::test]
    async fn auth_error_is_not_retried() {
        let dir = TempDir::new().unwrap();
        let path = write_png(&dir, "a.png", 40, 30);
        let recognizer = ScriptedRecognizer::with_script(vec![Err(RecognitionError::Auth(
            "Access token invalid".into(),
        ))]);

        let orch = BatchOrchestrator::new(recognizer, settings());
        let ledger = orch.run(vec![path.clone()]).await;

        match ledger.outcome(&path.display().to_string()).unwrap() {
            Outcome::Failure { kind, attempts, .. } => {
                assert_eq!(kind, FailureKind::AuthError);
                assert_eq!(attempts, 1);
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(orch.recognizer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn payload_too_large_is_repaired_with_smaller_payload() {
        let dir = TempDir::new().unwrap();
        let path = write_png(&dir, "big.png", 200, 200);
        let recognizer = ScriptedRecognizer::with_script(vec![Err(
            RecognitionError::PayloadTooLarge("image size error".into()),
        )]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let orch = BatchOrchestrator::new(recognizer, settings()).with_progress(tx);
        let ledger = orch.run(vec![path.clone()]).await;

        let outcome = ledger.outcome(&path.display().to_string()).unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.attempts(), 2);

        let seen = orch.recognizer.seen.lock().unwrap();
        assert_eq!(seen[0].width, 200);
        assert_eq!(seen[1].width, 150);
        assert!(seen[1].byte_size() <= seen[0].byte_size() * 3 / 4);

        let events = drain(&mut rx);
        assert!(retry_delays(&events).is_empty());
        assert!(events.iter().any(|e| matches!(e, ProgressEvent::Repairing { .. })));
    }

    #[tokio::test]
    async fn repair_is_bounded_to_one_attempt() {
        let dir = TempDir::new().unwrap();
        let path = write_png(&dir, "big.png", 120, 80);
        let recognizer = ScriptedRecognizer::with_script(vec![
            Err(RecognitionError::DimensionExceeded("resolution".into())),
            Err(RecognitionError::DimensionExceeded("resolution".into())),
        ]);

        let orch = BatchOrchestrator::new(recognizer, settings());
        let ledger = orch.run(vec![path.clone()]).await;

        match ledger.outcome(&path.display().to_string()).unwrap() {
            Outcome::Failure { kind, attempts, .. } => {
                assert_eq!(kind, FailureKind::DimensionExceeded);
                assert_eq!(attempts, 2);
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn transient_retry_resubmits_identical_payload() {
        let dir = TempDir::new().unwrap();
        let path = write_png(&dir, "a.png", 64, 64);
        let recognizer = ScriptedRecognizer::with_script(vec![Err(RecognitionError::Timeout)]);

        let orch = BatchOrchestrator::new(recognizer, settings());
        let ledger = orch.run(vec![path]).await;

        assert_eq!(ledger.summary().succeeded, 1);
        let seen = orch.recognizer.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], seen[1]);
    }

    #[tokio::test]
    async fn network_retries_exhaust_their_budget() {
        let dir = TempDir::new().unwrap();
        let path = write_png(&dir, "a.png", 40, 30);
        let recognizer = ScriptedRecognizer::with_script(vec![
            Err(RecognitionError::Timeout),
            Err(RecognitionError::Unavailable("502".into())),
            Err(RecognitionError::Timeout),
        ]);
        let mut settings = settings();
        settings.policy.max_network_retries = 2;

        let orch = BatchOrchestrator::new(recognizer, settings);
        let ledger = orch.run(vec![path.clone()]).await;

        match ledger.outcome(&path.display().to_string()).unwrap() {
            Outcome::Failure { kind, attempts, .. } => {
                assert_eq!(kind, FailureKind::TransientNetwork);
                assert_eq!(attempts, 3);
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn bad_inputs_do_not_affect_other_items() {
        let dir = TempDir::new().unwrap();
        let good = write_png(&dir, "good.png", 40, 30);
        let garbage = dir.path().join("garbage.jpg");
        std::fs::write(&garbage, b"not an image at all").unwrap();
        let missing = dir.path().join("missing.jpg");

        let orch = BatchOrchestrator::new(ScriptedRecognizer::default(), settings());
        let ledger = orch.run(vec![garbage.clone(), missing.clone(), good.clone()]).await;

        assert_eq!(ledger.len(), 3);
        assert!(ledger.outcome(&good.display().to_string()).unwrap().is_success());
        match ledger.outcome(&garbage.display().to_string()).unwrap() {
            Outcome::Failure { kind, attempts, .. } => {
                assert_eq!(kind, FailureKind::Unrepairable);
                assert_eq!(attempts, 0);
            }
            other => panic!("expected failure, got {other:?}"),
        }
        match ledger.outcome(&missing.display().to_string()).unwrap() {
            Outcome::Failure { kind, .. } => assert_eq!(kind, FailureKind::Unclassified),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(orch.recognizer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn in_flight_calls_never_exceed_worker_count() {
        let dir = TempDir::new().unwrap();
        let paths: Vec<_> = (0..12)
            .map(|i| write_png(&dir, &format!("{i}.png"), 32, 32))
            .collect();

        let orch = BatchOrchestrator::new(
            ScriptedRecognizer::with_delay(Duration::from_millis(20)),
            settings(),
        );
        let ledger = orch.run(paths).await;

        assert_eq!(ledger.summary().succeeded, 12);
        let max = orch.recognizer.max_in_flight.load(Ordering::SeqCst);
        assert!((1..=3).contains(&max), "max in flight {max}");
    }

    #[tokio::test]
    async fn slow_call_times_out_as_transient() {
        let dir = TempDir::new().unwrap();
        let path = write_png(&dir, "a.png", 40, 30);
        let mut settings = settings();
        settings.call_timeout = Duration::from_millis(20);
        settings.policy.max_network_retries = 0;

        let orch = BatchOrchestrator::new(
            ScriptedRecognizer::with_delay(Duration::from_millis(500)),
            settings,
        );
        let ledger = orch.run(vec![path.clone()]).await;

        match ledger.outcome(&path.display().to_string()).unwrap() {
            Outcome::Failure { kind, attempts, .. } => {
                assert_eq!(kind, FailureKind::TransientNetwork);
                assert_eq!(attempts, 1);
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelled_before_start_dispatches_nothing() {
        let dir = TempDir::new().unwrap();
        let paths: Vec<_> = (0..4)
            .map(|i| write_png(&dir, &format!("{i}.png"), 16, 16))
            .collect();
        let token = CancellationToken::new();
        token.cancel();

        let orch = BatchOrchestrator::new(ScriptedRecognizer::default(), settings())
            .with_cancellation(token);
        let ledger = orch.run(paths).await;

        assert!(ledger.is_empty());
        assert_eq!(ledger.summary().not_dispatched, 4);
    }

    #[tokio::test]
    async fn cancellation_abandons_backoff() {
        let dir = TempDir::new().unwrap();
        let path = write_png(&dir, "a.png", 40, 30);
        let recognizer =
            ScriptedRecognizer::with_script(vec![Err(RecognitionError::RateLimited("qps".into()))]);
        let mut settings = settings();
        settings.policy.base_delay = Duration::from_secs(3600);
        let token = CancellationToken::new();

        let orch = BatchOrchestrator::new(recognizer, settings).with_cancellation(token.clone());
        let canceller = tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            token.cancel();
        });
        let ledger = orch.run(vec![path.clone()]).await;
        canceller.await.unwrap();

        match ledger.outcome(&path.display().to_string()).unwrap() {
            Outcome::Failure {
                kind,
                message,
                attempts,
                ..
            } => {
                assert_eq!(kind, FailureKind::Unclassified);
                assert_eq!(message, "cancelled");
                assert_eq!(attempts, 1);
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(orch.recognizer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn completed_count_increases_monotonically() {
        let dir = TempDir::new().unwrap();
        let paths: Vec<_> = (0..6)
            .map(|i| write_png(&dir, &format!("{i}.png"), 16, 16))
            .collect();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let orch = BatchOrchestrator::new(ScriptedRecognizer::default(), settings()).with_progress(tx);
        orch.run(paths).await;

        let completed: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                ProgressEvent::Completed { completed, total, .. } => {
                    assert_eq!(total, 6);
                    Some(completed)
                }
                _ => None,
            })
            .collect();
        assert_eq!(completed, vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn empty_batch_returns_empty_ledger() {
        let orch = BatchOrchestrator::new(ScriptedRecognizer::default(), settings());
        let ledger = orch.run(Vec::new()).await;
        assert!(ledger.is_empty());
    }

    #[test]
    fn settings_follow_config() {
        let mut config = OcrConfig::default();
        config.workers = 5;
        config.conditioning.repair_factor = 0.5;
        let settings = Settings::from_config(&config);
        assert_eq!(settings.workers, 5);
        assert_eq!(settings.repair_factor, 0.5);
        assert_eq!(settings.policy.base_delay, Duration::from_secs(2));
    }
}
