//! Transcoder Scheduler (C5): a single process-wide FIFO admission
//! queue bounded by the Tuning Policy's `max_concurrent`, wiring each
//! subprocess's terminal edge back to capacity release and session
//! state.

use crate::registry::SessionRegistry;
use dashmap::DashMap;
use domain::policy::{self, PolicyLimits};
use domain::{
    DomainError, ResourceProbe, SessionState, TranscodeJobSpec, TranscodeOutcome, TranscoderHandle,
    TranscoderProcess,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, warn};

/// Builds the job spec at admission time, not at submission time, so a
/// queued-but-not-yet-running job holds no source-stream resources.
pub type JobFactory =
    Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = Result<TranscodeJobSpec, DomainError>> + Send>> + Send>;

struct QueuedJob {
    session_id: String,
    factory: JobFactory,
}

struct SchedulerState {
    active_count: usize,
    queue: VecDeque<QueuedJob>,
}

pub struct TranscoderScheduler {
    registry: Arc<SessionRegistry>,
    transcoder: Arc<dyn TranscoderProcess>,
    resource_probe: Arc<dyn ResourceProbe>,
    limits: PolicyLimits,
    state: Mutex<SchedulerState>,
    /// Handles of currently-running transcoders, keyed by session id, so
    /// teardown can kill a session's subprocess on demand (spec.md §5:
    /// "kill the transcoder subprocess if alive").
    running: DashMap<String, Arc<AsyncMutex<Box<dyn TranscoderHandle>>>>,
}

impl TranscoderScheduler {
    pub fn new(
        registry: Arc<SessionRegistry>,
        transcoder: Arc<dyn TranscoderProcess>,
        resource_probe: Arc<dyn ResourceProbe>,
        limits: PolicyLimits,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            transcoder,
            resource_probe,
            limits,
            state: Mutex::new(SchedulerState { active_count: 0, queue: VecDeque::new() }),
            running: DashMap::new(),
        })
    }

    /// Kills `session_id`'s transcoder subprocess if one is currently
    /// running. A no-op if the session has no active transcoder.
    pub async fn kill_session(&self, session_id: &str) {
        if let Some((_, handle)) = self.running.remove(session_id) {
            handle.lock().await.kill().await;
        }
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().active_count
    }

    pub fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    async fn current_max_concurrent(&self) -> usize {
        let reading = self.resource_probe.probe().await;
        let active_sessions = self.registry.live_count();
        policy::tune(reading.memory_mb, reading.cpu_count, active_sessions, self.limits).max_concurrent
    }

    /// Enqueues `session_id`'s job and immediately attempts admission.
    pub fn submit(self: &Arc<Self>, session_id: String, factory: JobFactory) {
        self.state.lock().queue.push_back(QueuedJob { session_id, factory });
        let this = self.clone();
        tokio::spawn(async move { this.drain_admissions().await });
    }

    /// Non-blocking admission loop: while `active_count < max_concurrent`
    /// and the queue is non-empty, pop the head and start it.
    async fn drain_admissions(self: Arc<Self>) {
        loop {
            let max_concurrent = self.current_max_concurrent().await;
            let next = {
                let mut state = self.state.lock();
                if state.active_count < max_concurrent {
                    state.queue.pop_front().map(|job| {
                        state.active_count += 1;
                        job
                    })
                } else {
                    None
                }
            };

            let Some(job) = next else { break };
            self.clone().start_job(job).await;
        }
    }

    async fn start_job(self: Arc<Self>, job: QueuedJob) {
        let QueuedJob { session_id, factory } = job;

        if let Err(e) = self.registry.update(&session_id, |r| r.transition_to(SessionState::Transcoding)) {
            warn!(session_id = %session_id, error = %e, "could not mark session transcoding, skipping job");
            self.release_slot();
            return;
        }

        let spec = match factory().await {
            Ok(spec) => spec,
            Err(e) => {
                error!(session_id = %session_id, error = %e, "failed to build transcode job spec");
                let _ = self.registry.update(&session_id, |r| r.fail(e));
                self.release_slot();
                return;
            }
        };

        let handle = match self.transcoder.spawn(spec).await {
            Ok(h) => h,
            Err(e) => {
                error!(session_id = %session_id, error = %e, "failed to spawn transcoder");
                let _ = self.registry.update(&session_id, |r| r.fail(e));
                self.release_slot();
                return;
            }
        };

        let handle = Arc::new(AsyncMutex::new(handle));
        self.running.insert(session_id.clone(), handle.clone());

        info!(session_id = %session_id, "transcoder admitted");
        let this = self.clone();
        tokio::spawn(async move {
            let outcome = handle.lock().await.wait().await;
            this.running.remove(&session_id);
            match outcome {
                TranscodeOutcome::Finished => {
                    info!(session_id = %session_id, "transcoder finished");
                }
                TranscodeOutcome::Failed(message) => {
                    warn!(session_id = %session_id, %message, "transcoder failed");
                    let _ = this
                        .registry
                        .update(&session_id, |r| r.fail(DomainError::TranscoderError(message)));
                }
            }
            this.release_slot();
            this.drain_admissions().await;
        });
    }

    fn release_slot(&self) {
        let mut state = self.state.lock();
        state.active_count = state.active_count.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use domain::{ResourceReading, TranscodeInput, TranscoderHandle};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;
    use tokio::sync::Notify;

    struct FixedProbe;

    #[async_trait]
    impl ResourceProbe for FixedProbe {
        async fn probe(&self) -> ResourceReading {
            ResourceReading { memory_mb: 4000, cpu_count: 4 }
        }
    }

    struct CountingTranscoder {
        spawned: Arc<AtomicUsize>,
        release: Arc<Notify>,
    }

    struct BlockingHandle {
        release: Arc<Notify>,
        finished: bool,
    }

    #[async_trait]
    impl TranscoderHandle for BlockingHandle {
        async fn wait(&mut self) -> TranscodeOutcome {
            if !self.finished {
                self.release.notified().await;
            }
            TranscodeOutcome::Finished
        }
        async fn kill(&mut self) {}
    }

    #[async_trait]
    impl TranscoderProcess for CountingTranscoder {
        async fn spawn(&self, _spec: TranscodeJobSpec) -> Result<Box<dyn TranscoderHandle>, DomainError> {
            self.spawned.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(BlockingHandle { release: self.release.clone(), finished: false }))
        }
    }

    fn spec_factory() -> JobFactory {
        Box::new(|| {
            Box::pin(async {
                Ok(TranscodeJobSpec {
                    input: TranscodeInput::FilePath(PathBuf::from("/tmp/in.mp4")),
                    output_dir: PathBuf::from("/tmp/out"),
                    segment_duration_seconds: 4,
                    thread_count: 1,
                    mode: domain::TranscodeMode::CopyMux,
                })
            })
        })
    }

    #[tokio::test]
    async fn respects_concurrency_cap_and_admits_from_queue_on_completion() {
        let dir = tempdir().unwrap();
        let registry = Arc::new(SessionRegistry::new(dir.path().to_path_buf()));
        let spawned = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());
        let transcoder = Arc::new(CountingTranscoder { spawned: spawned.clone(), release: release.clone() });

        // 4000MB/4cpu -> per_ffmpeg_mb=512(>=700? no, 4000>=1500 so 800) memory_bound=floor(4000/960)=4, cpu_bound=2 -> max_concurrent=2
        let scheduler = TranscoderScheduler::new(registry.clone(), transcoder, Arc::new(FixedProbe), PolicyLimits::default());

        let mut ids = Vec::new();
        for _ in 0..3 {
            let id = registry.create(domain::SourceKind::Url).await.unwrap();
            registry.update(&id, |r| r.transition_to(SessionState::Resolving)).unwrap();
            registry.update(&id, |r| r.transition_to(SessionState::Queued)).unwrap();
            ids.push(id.clone());
            scheduler.submit(id, spec_factory());
        }

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(spawned.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.active_count(), 2);
        assert_eq!(scheduler.queue_len(), 1);

        release.notify_one();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(spawned.load(Ordering::SeqCst), 3);
    }
}
