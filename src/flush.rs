use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::error::JournalError;
use crate::gateway::Gateway;
use crate::session::SessionEvent;

enum Job {
    Write {
        content: String,
        started: oneshot::Sender<()>,
        done: oneshot::Sender<Result<(), JournalError>>,
    },
    Barrier(oneshot::Sender<()>),
}

// Sending half of a lane plus the number of jobs it has not finished yet
struct Lane {
    jobs: mpsc::UnboundedSender<Job>,
    pending: Arc<AtomicUsize>,
}

impl Lane {
    fn send(&self, job: Job) -> Result<(), mpsc::error::SendError<Job>> {
        self.pending.fetch_add(1, Ordering::AcqRel);
        match self.jobs.send(job) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                Err(err)
            }
        }
    }

    fn is_idle(&self) -> bool {
        self.pending.load(Ordering::Acquire) == 0
    }
}

/// Handle on one queued write.
pub struct FlushTicket {
    path: PathBuf,
    started: Option<oneshot::Receiver<()>>,
    done: oneshot::Receiver<Result<(), JournalError>>,
}

impl FlushTicket {
    /// Resolves once the gateway write has begun, which may be after earlier
    /// writes for the same path complete.
    pub async fn issued(&mut self) {
        if let Some(started) = self.started.take() {
            let _ = started.await;
        }
    }

    pub async fn finished(self) -> Result<(), JournalError> {
        match self.done.await {
            Ok(result) => result,
            Err(_) => Err(JournalError::Write {
                path: self.path,
                source: io::Error::new(io::ErrorKind::BrokenPipe, "flush lane closed"),
            }),
        }
    }
}

/// Serialises writes per path.
///
/// Every path with queued work gets its own FIFO lane drained by a background
/// task, so a slow write can finish after the caller has moved on but can
/// never land after a newer write for the same path. Writes to different paths
/// run concurrently. Lanes with nothing left to do are released.
/// Content of a failed write is retained until a later write to that path
/// succeeds.
pub struct FlushQueue<G: Gateway> {
    gateway: Arc<G>,
    lanes: HashMap<PathBuf, Lane>,
    retained: Arc<Mutex<HashMap<PathBuf, String>>>,
    events: broadcast::Sender<SessionEvent>,
}

impl<G: Gateway> FlushQueue<G> {
    pub fn new(gateway: Arc<G>, events: broadcast::Sender<SessionEvent>) -> Self {
        Self {
            gateway,
            lanes: HashMap::new(),
            retained: Arc::new(Mutex::new(HashMap::new())),
            events,
        }
    }

    pub fn enqueue(&mut self, path: PathBuf, content: String) -> FlushTicket {
        let (started_tx, started_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        let job = Job::Write {
            content,
            started: started_tx,
            done: done_tx,
        };
        debug!(path = %path.display(), "flush queued");
        self.release_idle_lanes();
        self.submit(path.clone(), job);

        FlushTicket {
            path,
            started: Some(started_rx),
            done: done_rx,
        }
    }

    /// Waits until every write already queued for `path` has completed.
    pub async fn settle(&self, path: &Path) {
        let Some(lane) = self.lanes.get(path).filter(|lane| !lane.is_idle()) else {
            return;
        };
        let (tx, rx) = oneshot::channel();
        if lane.send(Job::Barrier(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    pub async fn settle_all(&mut self) {
        let mut pending = Vec::with_capacity(self.lanes.len());
        for lane in self.lanes.values() {
            let (tx, rx) = oneshot::channel();
            if lane.send(Job::Barrier(tx)).is_ok() {
                pending.push(rx);
            }
        }
        for rx in pending {
            let _ = rx.await;
        }
        self.release_idle_lanes();
    }

    /// Content of the last failed write for `path`, if it has not been
    /// superseded by a successful one.
    pub fn retained(&self, path: &Path) -> Option<String> {
        self.retained
            .lock()
            .expect("retained buffers mutex")
            .get(path)
            .cloned()
    }

    /// Keeps `content` as the unsaved copy of `path` without writing it. It is
    /// reported and adopted exactly like the content of a failed write.
    pub fn retain(&self, path: PathBuf, content: String) {
        warn!(path = %path.display(), bytes = content.len(), "keeping unsaved buffer in memory");
        self.retained
            .lock()
            .expect("retained buffers mutex")
            .insert(path, content);
    }

    pub fn unsaved_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .retained
            .lock()
            .expect("retained buffers mutex")
            .keys()
            .cloned()
            .collect();
        paths.sort();
        paths
    }

    #[cfg(test)]
    fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    // Dropping a lane's sender ends its task once the queue is drained
    fn release_idle_lanes(&mut self) {
        self.lanes.retain(|_, lane| !lane.is_idle());
    }

    fn submit(&mut self, path: PathBuf, job: Job) {
        let job = match self.lanes.get(&path) {
            Some(lane) => match lane.send(job) {
                Ok(()) => return,
                // Lane task is gone; start a fresh one below
                Err(mpsc::error::SendError(job)) => job,
            },
            None => job,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let lane = Lane {
            jobs: tx,
            pending: Arc::new(AtomicUsize::new(0)),
        };
        tokio::spawn(drain_lane(
            Arc::clone(&self.gateway),
            path.clone(),
            rx,
            Arc::clone(&lane.pending),
            Arc::clone(&self.retained),
            self.events.clone(),
        ));
        let _ = lane.send(job);
        self.lanes.insert(path, lane);
    }
}

async fn drain_lane<G: Gateway>(
    gateway: Arc<G>,
    path: PathBuf,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    pending: Arc<AtomicUsize>,
    retained: Arc<Mutex<HashMap<PathBuf, String>>>,
    events: broadcast::Sender<SessionEvent>,
) {
    while let Some(job) = jobs.recv().await {
        let (content, started, done) = match job {
            Job::Barrier(ack) => {
                pending.fetch_sub(1, Ordering::AcqRel);
                let _ = ack.send(());
                continue;
            }
            Job::Write {
                content,
                started,
                done,
            } => (content, started, done),
        };

        let result = match issue_write(gateway.as_ref(), &path, &content, started).await {
            Ok(()) => {
                retained.lock().expect("retained buffers mutex").remove(&path);
                debug!(path = %path.display(), bytes = content.len(), "entry flushed");
                let _ = events.send(SessionEvent::Saved {
                    path: path.to_string_lossy().into_owned(),
                });
                Ok(())
            }
            Err(err) => {
                error!(
                    path = %path.display(),
                    bytes = content.len(),
                    error = %err,
                    "flush failed, buffer kept in memory"
                );
                retained
                    .lock()
                    .expect("retained buffers mutex")
                    .insert(path.clone(), content.clone());
                let _ = events.send(SessionEvent::SaveFailed {
                    path: path.to_string_lossy().into_owned(),
                    content,
                    error: err.to_string(),
                });
                Err(JournalError::Write {
                    path: path.clone(),
                    source: err,
                })
            }
        };

        pending.fetch_sub(1, Ordering::AcqRel);
        let _ = done.send(result);
    }
    debug!(path = %path.display(), "flush lane released");
}

// Reports the write as started only after its first poll, i.e. once the
// gateway call is actually under way.
async fn issue_write<G: Gateway>(
    gateway: &G,
    path: &Path,
    content: &str,
    started: oneshot::Sender<()>,
) -> io::Result<()> {
    let mut write = std::pin::pin!(gateway.write(path, content));
    let mut started = Some(started);
    std::future::poll_fn(|cx| {
        let poll = write.as_mut().poll(cx);
        if let Some(started) = started.take() {
            let _ = started.send(());
        }
        poll
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::memory::{MemoryGateway, Op};
    use std::time::Duration;

    fn queue(gateway: &Arc<MemoryGateway>) -> (FlushQueue<MemoryGateway>, broadcast::Receiver<SessionEvent>) {
        let (events, rx) = broadcast::channel(16);
        (FlushQueue::new(Arc::clone(gateway), events), rx)
    }

    #[tokio::test]
    async fn test_writes_to_same_path_land_in_order() {
        let gateway = Arc::new(MemoryGateway::with_files("/j", &[("a.md", "")]));
        gateway.delay_write("/j/a.md", Duration::from_millis(40));
        let (mut flush, _rx) = queue(&gateway);

        let first = flush.enqueue(PathBuf::from("/j/a.md"), "first".into());
        let second = flush.enqueue(PathBuf::from("/j/a.md"), "second".into());
        drop(first);

        second.finished().await.unwrap();
        assert_eq!(gateway.content("/j/a.md").as_deref(), Some("second"));
        assert_eq!(
            gateway.writes(),
            vec![
                (PathBuf::from("/j/a.md"), "first".to_string()),
                (PathBuf::from("/j/a.md"), "second".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_settle_waits_for_slow_write() {
        let gateway = Arc::new(MemoryGateway::with_files("/j", &[("a.md", "old")]));
        gateway.delay_write("/j/a.md", Duration::from_millis(40));
        let (mut flush, _rx) = queue(&gateway);

        let mut ticket = flush.enqueue(PathBuf::from("/j/a.md"), "new".into());
        ticket.issued().await;
        assert_eq!(gateway.content("/j/a.md").as_deref(), Some("old"));

        flush.settle(Path::new("/j/a.md")).await;
        assert_eq!(gateway.content("/j/a.md").as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_issued_means_gateway_write_has_begun() {
        let gateway = Arc::new(MemoryGateway::with_files("/j", &[("a.md", "old")]));
        gateway.delay_write("/j/a.md", Duration::from_millis(40));
        let (mut flush, _rx) = queue(&gateway);

        let mut ticket = flush.enqueue(PathBuf::from("/j/a.md"), "new".into());
        assert!(gateway.writes().is_empty());

        ticket.issued().await;
        assert_eq!(gateway.writes(), vec![(PathBuf::from("/j/a.md"), "new".to_string())]);
        assert_eq!(gateway.content("/j/a.md").as_deref(), Some("old"));

        ticket.finished().await.unwrap();
        assert_eq!(gateway.content("/j/a.md").as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_idle_lanes_are_released() {
        let gateway = Arc::new(MemoryGateway::new());
        gateway.add_dir("/j");
        let (mut flush, _rx) = queue(&gateway);

        for i in 0..200 {
            flush
                .enqueue(PathBuf::from(format!("/j/{i}.md")), "x".into())
                .finished()
                .await
                .unwrap();
        }
        assert!(flush.lane_count() <= 1);

        flush.settle_all().await;
        assert_eq!(flush.lane_count(), 0);

        // A released path gets a fresh lane
        flush
            .enqueue(PathBuf::from("/j/0.md"), "again".into())
            .finished()
            .await
            .unwrap();
        assert_eq!(gateway.content("/j/0.md").as_deref(), Some("again"));
    }

    #[tokio::test]
    async fn test_retain_reports_without_writing() {
        let gateway = Arc::new(MemoryGateway::new());
        let (flush, _rx) = queue(&gateway);

        flush.retain(PathBuf::from("/j/gone.md"), "draft".into());
        assert_eq!(flush.retained(Path::new("/j/gone.md")).as_deref(), Some("draft"));
        assert_eq!(flush.unsaved_paths(), vec![PathBuf::from("/j/gone.md")]);
        assert!(gateway.ops().is_empty());
    }

    #[tokio::test]
    async fn test_settle_without_lane_returns() {
        let gateway = Arc::new(MemoryGateway::new());
        let (mut flush, _rx) = queue(&gateway);
        flush.settle(Path::new("/nowhere.md")).await;
        flush.settle_all().await;
        assert!(gateway.ops().is_empty());
    }

    #[tokio::test]
    async fn test_failed_write_is_retained_until_success() {
        let gateway = Arc::new(MemoryGateway::with_files("/j", &[("a.md", "")]));
        gateway.fail_write("/j/a.md");
        let (mut flush, mut rx) = queue(&gateway);

        let err = flush
            .enqueue(PathBuf::from("/j/a.md"), "draft".into())
            .finished()
            .await
            .unwrap_err();
        assert!(matches!(err, JournalError::Write { .. }));
        assert_eq!(flush.retained(Path::new("/j/a.md")).as_deref(), Some("draft"));
        assert_eq!(flush.unsaved_paths(), vec![PathBuf::from("/j/a.md")]);

        match rx.try_recv().unwrap() {
            SessionEvent::SaveFailed { path, content, .. } => {
                assert_eq!(path, "/j/a.md");
                assert_eq!(content, "draft");
            }
            other => panic!("unexpected event {other:?}"),
        }

        gateway.heal_write("/j/a.md");
        flush
            .enqueue(PathBuf::from("/j/a.md"), "draft".into())
            .finished()
            .await
            .unwrap();
        assert!(flush.retained(Path::new("/j/a.md")).is_none());
        assert!(flush.unsaved_paths().is_empty());
        assert_eq!(gateway.content("/j/a.md").as_deref(), Some("draft"));
    }

    #[tokio::test]
    async fn test_different_paths_do_not_wait_on_each_other() {
        let gateway = Arc::new(MemoryGateway::with_files("/j", &[("a.md", ""), ("b.md", "")]));
        gateway.delay_write("/j/a.md", Duration::from_millis(200));
        let (mut flush, _rx) = queue(&gateway);

        let _slow = flush.enqueue(PathBuf::from("/j/a.md"), "a".into());
        flush
            .enqueue(PathBuf::from("/j/b.md"), "b".into())
            .finished()
            .await
            .unwrap();

        assert_eq!(gateway.content("/j/b.md").as_deref(), Some("b"));
        assert_eq!(gateway.content("/j/a.md").as_deref(), Some(""));
        assert!(gateway.ops().contains(&Op::Write(PathBuf::from("/j/a.md"), "a".into())));
    }
}
