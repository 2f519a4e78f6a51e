//! Timer-driven capture scheduler.
//!
//! State machine `Idle -> Capturing -> Paused` with a transient `Recovering`
//! on source failure. Each tick grabs one frame, runs the change gate
//! against the last *accepted* frame (rejected frames are not remembered)
//! and emits accepted candidates downstream. Pausing releases the source
//! and clears the baseline so the next session always accepts its first
//! frame.

use crate::diffing::{is_distinct, DEFAULT_DIFF_THRESHOLD};
use crate::source::{CaptureError, SourceFactory};
use chrono::{DateTime, Utc};
use image::RgbaImage;
use parking_lot::Mutex;
use retrace_events::{EventBus, RetraceEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Backoff before the single auto-restart after the source ended.
const ENDED_RESTART_BACKOFF: Duration = Duration::from_secs(1);
/// Backoff after a transient grab error.
const TRANSIENT_RETRY_BACKOFF: Duration = Duration::from_secs(2);

pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Capturing,
    Paused,
    Recovering,
}

impl CaptureState {
    fn as_str(&self) -> &'static str {
        match self {
            CaptureState::Idle => "idle",
            CaptureState::Capturing => "capturing",
            CaptureState::Paused => "paused",
            CaptureState::Recovering => "recovering",
        }
    }
}

pub enum ControlMessage {
    Pause,
    Resume,
    Stop,
}

#[derive(Debug, Clone)]
pub struct CandidateFrame {
    pub timestamp: DateTime<Utc>,
    pub image: RgbaImage,
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub sample_interval: Duration,
    pub diff_threshold: f64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            diff_threshold: DEFAULT_DIFF_THRESHOLD,
        }
    }
}

struct Shared {
    state: Mutex<CaptureState>,
    /// The user's "capturing active" intent, distinct from the loop state:
    /// it decides whether a terminated source gets its one auto-restart.
    intent_active: AtomicBool,
    loop_running: AtomicBool,
    control_tx: Mutex<Option<Sender<ControlMessage>>>,
}

impl Shared {
    fn set_state(&self, next: CaptureState, bus: &EventBus) {
        let mut state = self.state.lock();
        if *state != next {
            debug!(from = state.as_str(), to = next.as_str(), "capture state");
            *state = next;
            bus.send(RetraceEvent::CaptureStateChanged {
                state: next.as_str().to_string(),
            });
        }
    }
}

pub struct CaptureScheduler {
    factory: Arc<SourceFactory>,
    config: CaptureConfig,
    candidate_tx: Sender<CandidateFrame>,
    bus: EventBus,
    shared: Arc<Shared>,
}

impl CaptureScheduler {
    pub fn new(
        factory: Arc<SourceFactory>,
        config: CaptureConfig,
        candidate_tx: Sender<CandidateFrame>,
        bus: EventBus,
    ) -> Self {
        Self {
            factory,
            config,
            candidate_tx,
            bus,
            shared: Arc::new(Shared {
                state: Mutex::new(CaptureState::Idle),
                intent_active: AtomicBool::new(false),
                loop_running: AtomicBool::new(false),
                control_tx: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> CaptureState {
        *self.shared.state.lock()
    }

    /// Begin (or resume) capturing. Idempotent: a second `start` while the
    /// loop is already running only re-asserts intent; it never spawns a
    /// second sampling loop.
    pub fn start(&self) {
        self.shared.intent_active.store(true, Ordering::SeqCst);

        if self.shared.loop_running.swap(true, Ordering::SeqCst) {
            if let Some(tx) = self.shared.control_tx.lock().as_ref() {
                let _ = tx.try_send(ControlMessage::Resume);
            }
            return;
        }

        let (control_tx, control_rx) = mpsc::channel(8);
        *self.shared.control_tx.lock() = Some(control_tx);

        let shared = self.shared.clone();
        let factory = self.factory.clone();
        let config = self.config.clone();
        let candidate_tx = self.candidate_tx.clone();
        let bus = self.bus.clone();
        tokio::spawn(async move {
            sampling_loop(shared.clone(), factory, config, candidate_tx, bus.clone(), control_rx)
                .await;
            shared.loop_running.store(false, Ordering::SeqCst);
            *shared.control_tx.lock() = None;
            shared.set_state(CaptureState::Idle, &bus);
        });
    }

    /// Release the source and stop producing candidates. In-flight
    /// enrichment is unaffected.
    pub fn pause(&self) {
        self.shared.intent_active.store(false, Ordering::SeqCst);
        if let Some(tx) = self.shared.control_tx.lock().as_ref() {
            let _ = tx.try_send(ControlMessage::Pause);
        }
    }

    pub fn stop(&self) {
        self.shared.intent_active.store(false, Ordering::SeqCst);
        if let Some(tx) = self.shared.control_tx.lock().as_ref() {
            let _ = tx.try_send(ControlMessage::Stop);
        }
    }
}

async fn sampling_loop(
    shared: Arc<Shared>,
    factory: Arc<SourceFactory>,
    config: CaptureConfig,
    candidate_tx: Sender<CandidateFrame>,
    bus: EventBus,
    mut control_rx: Receiver<ControlMessage>,
) {
    // Consecutive failed acquisitions; the ended-source auto-restart is a
    // single retry, not an open-ended reconnect loop.
    let mut failed_acquires = 0u32;
    // Consecutive transient grab failures, reset by any successful grab.
    let mut failed_grabs = 0u32;

    'session: loop {
        if !shared.intent_active.load(Ordering::SeqCst) {
            break;
        }

        let mut source = match (factory)() {
            Ok(source) => {
                failed_acquires = 0;
                source
            }
            Err(e) => {
                failed_acquires += 1;
                shared.set_state(CaptureState::Idle, &bus);
                if failed_acquires >= 2 || !shared.intent_active.load(Ordering::SeqCst) {
                    warn!(error = %e, "capture source unavailable, giving up");
                    shared.intent_active.store(false, Ordering::SeqCst);
                    break;
                }
                let backoff = match e {
                    CaptureError::Ended => ENDED_RESTART_BACKOFF,
                    CaptureError::Transient(_) => TRANSIENT_RETRY_BACKOFF,
                };
                warn!(error = %e, "capture source acquire failed, retrying once");
                tokio::time::sleep(backoff).await;
                continue 'session;
            }
        };

        shared.set_state(CaptureState::Capturing, &bus);
        info!("capture session started");

        // Baseline for the change gate: the last *accepted* frame only.
        let mut last_accepted: Option<RgbaImage> = None;
        let mut skipped: u64 = 0;

        let mut ticker = tokio::time::interval(config.sample_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                msg = control_rx.recv() => match msg {
                    Some(ControlMessage::Pause) => {
                        drop(source);
                        shared.set_state(CaptureState::Paused, &bus);
                        info!("capture paused, source released");
                        match wait_for_resume(&mut control_rx).await {
                            true => continue 'session,
                            false => break 'session,
                        }
                    }
                    Some(ControlMessage::Resume) => {}
                    Some(ControlMessage::Stop) | None => break 'session,
                },
                _ = ticker.tick() => {
                    match source.grab_frame() {
                        Ok(frame) => {
                            failed_grabs = 0;
                            if is_distinct(&frame, last_accepted.as_ref(), config.diff_threshold) {
                                skipped = 0;
                                let candidate = CandidateFrame {
                                    timestamp: Utc::now(),
                                    image: frame.clone(),
                                };
                                if candidate_tx.send(candidate).await.is_err() {
                                    debug!("candidate consumer gone, stopping capture");
                                    break 'session;
                                }
                                last_accepted = Some(frame);
                            } else {
                                skipped += 1;
                                if skipped % 10 == 0 {
                                    debug!(skipped, "skipped similar frames");
                                    bus.send(RetraceEvent::SamplesSkipped { count: skipped });
                                }
                            }
                        }
                        Err(CaptureError::Ended) => {
                            warn!("capture source ended");
                            shared.set_state(CaptureState::Recovering, &bus);
                            if shared.intent_active.load(Ordering::SeqCst) {
                                tokio::time::sleep(ENDED_RESTART_BACKOFF).await;
                                continue 'session;
                            }
                            break 'session;
                        }
                        Err(CaptureError::Transient(e)) => {
                            failed_grabs += 1;
                            if failed_grabs >= 3 {
                                warn!(error = %e, "repeated grab failures, ending session");
                                shared.intent_active.store(false, Ordering::SeqCst);
                                break 'session;
                            }
                            warn!(error = %e, "frame grab failed, retrying");
                            shared.set_state(CaptureState::Recovering, &bus);
                            tokio::time::sleep(TRANSIENT_RETRY_BACKOFF).await;
                            continue 'session;
                        }
                    }
                }
            }
        }
    }
}

/// Parked in `Paused` until the user resumes. Returns false on stop.
async fn wait_for_resume(control_rx: &mut Receiver<ControlMessage>) -> bool {
    loop {
        match control_rx.recv().await {
            Some(ControlMessage::Resume) => return true,
            Some(ControlMessage::Pause) => continue,
            Some(ControlMessage::Stop) | None => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use parking_lot::Mutex as PlMutex;
    use std::collections::VecDeque;

    fn frame(px: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(4, 4, Rgba(px))
    }

    /// Source replaying a script of grab results, then repeating the last
    /// okay frame forever.
    struct ScriptedSource {
        script: Arc<PlMutex<VecDeque<Result<RgbaImage, CaptureError>>>>,
        idle_frame: RgbaImage,
    }

    impl crate::source::CaptureSource for ScriptedSource {
        fn grab_frame(&mut self) -> Result<RgbaImage, CaptureError> {
            match self.script.lock().pop_front() {
                Some(result) => result,
                None => Ok(self.idle_frame.clone()),
            }
        }
    }

    fn scheduler_with_script(
        script: Vec<Result<RgbaImage, CaptureError>>,
        idle_frame: RgbaImage,
    ) -> (CaptureScheduler, Receiver<CandidateFrame>) {
        let script = Arc::new(PlMutex::new(VecDeque::from(script)));
        let factory: Arc<SourceFactory> = Arc::new(move || {
            Ok(Box::new(ScriptedSource {
                script: script.clone(),
                idle_frame: idle_frame.clone(),
            }) as Box<dyn crate::source::CaptureSource>)
        });
        let (tx, rx) = mpsc::channel(64);
        let config = CaptureConfig {
            sample_interval: Duration::from_millis(10),
            diff_threshold: 0.03,
        };
        (
            CaptureScheduler::new(factory, config, tx, EventBus::default()),
            rx,
        )
    }

    #[tokio::test]
    async fn accepts_first_frame_and_skips_identical_ones() {
        let white = frame([255, 255, 255, 255]);
        let (scheduler, mut rx) = scheduler_with_script(vec![], white);
        scheduler.start();

        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("first frame")
            .unwrap();
        assert_eq!(first.image.get_pixel(0, 0).0, [255, 255, 255, 255]);

        // All following grabs are identical: nothing else arrives.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
        scheduler.stop();
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let white = frame([255, 255, 255, 255]);
        let (scheduler, mut rx) = scheduler_with_script(vec![], white);
        scheduler.start();
        scheduler.start();
        scheduler.start();

        let _ = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("first frame");
        // A duplicated loop would re-accept the baseline frame.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
        scheduler.stop();
    }

    #[tokio::test]
    async fn distinct_frames_are_emitted() {
        let white = frame([255, 255, 255, 255]);
        let black = frame([0, 0, 0, 255]);
        let (scheduler, mut rx) =
            scheduler_with_script(vec![Ok(black.clone()), Ok(white.clone())], white);
        scheduler.start();

        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("first")
            .unwrap();
        let second = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("second")
            .unwrap();
        assert_ne!(first.image.get_pixel(0, 0), second.image.get_pixel(0, 0));
        assert!(first.timestamp <= second.timestamp);
        scheduler.stop();
    }

    #[tokio::test]
    async fn pause_clears_the_diff_baseline() {
        let white = frame([255, 255, 255, 255]);
        let (scheduler, mut rx) = scheduler_with_script(vec![], white);
        scheduler.start();

        let _ = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("first frame");

        scheduler.pause();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(scheduler.state(), CaptureState::Paused);
        while rx.try_recv().is_ok() {}

        // Same pixels again, but a fresh session has no stale baseline.
        scheduler.start();
        let reaccepted = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("frame after resume");
        assert!(reaccepted.is_some());
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn ended_source_restarts_while_intent_holds() {
        let white = frame([255, 255, 255, 255]);
        let (scheduler, mut rx) =
            scheduler_with_script(vec![Err(CaptureError::Ended)], white);
        scheduler.start();

        // The session dies on the first grab, backs off, re-acquires and
        // accepts the idle frame on its own.
        let first = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("frame after restart")
            .unwrap();
        assert_eq!(first.image.get_pixel(0, 0).0, [255, 255, 255, 255]);
        scheduler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_transient_failures_end_the_session() {
        let white = frame([255, 255, 255, 255]);
        let script = vec![
            Err(CaptureError::Transient("grab failed".into())),
            Err(CaptureError::Transient("grab failed".into())),
            Err(CaptureError::Transient("grab failed".into())),
        ];
        let (scheduler, mut rx) = scheduler_with_script(script, white);
        scheduler.start();

        // Three consecutive transient failures give up: no candidate ever
        // arrives and the loop winds down to Idle.
        assert!(tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .is_err());
        assert_eq!(scheduler.state(), CaptureState::Idle);

        // Only an explicit restart resumes capturing.
        scheduler.start();
        let first = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("frame after explicit restart")
            .unwrap();
        assert_eq!(first.image.get_pixel(0, 0).0, [255, 255, 255, 255]);
        scheduler.stop();
    }
}
