//! Follows one file and forwards each newly appended line to the drain
//! under a fixed tag.

pub mod file_id;
pub mod follower;

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::select;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::drain::Drain;
use crate::group::{BoxError, Ready, Worker};
use crate::tailer::follower::{Follower, Poll, StartPosition};

/// Upper bound on the final flush when shutting down. Anything the
/// collector cannot take within this window is dropped.
const SHUTDOWN_FLUSH_LIMIT: Duration = Duration::from_millis(500);

pub struct Tailer {
    path: PathBuf,
    tag: String,
    drain: Arc<dyn Drain>,
    poll_interval: Duration,
    start: StartPosition,
}

impl Tailer {
    pub fn new(
        path: impl Into<PathBuf>,
        tag: impl Into<String>,
        drain: Arc<dyn Drain>,
        poll_interval: Duration,
        start: StartPosition,
    ) -> Tailer {
        Tailer {
            path: path.into(),
            tag: tag.into(),
            drain,
            poll_interval,
            start,
        }
    }

    async fn ship(&self, lines: Vec<String>) {
        for line in lines {
            if let Err(error) = self.drain.drain(&line, &self.tag).await {
                warn!(
                    path = %self.path.display(),
                    tag = self.tag,
                    %error,
                    "Failed to drain line."
                );
            }
        }
    }
}

#[async_trait]
impl Worker for Tailer {
    async fn run(self: Box<Self>, ready: Ready, cancel: CancellationToken) -> Result<(), BoxError> {
        let mut follower = match Follower::open(&self.path, self.start).await {
            Ok(follower) => follower,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                // The file vanished between discovery and startup. Exit
                // cleanly and let re-discovery deal with any successor.
                debug!(path = %self.path.display(), "File gone before following began.");
                ready.notify();
                return Ok(());
            }
            Err(error) => return Err(error.into()),
        };

        match self.start {
            StartPosition::End => {
                info!(path = %self.path.display(), tag = self.tag, "Seeked to end of file.");
            }
            StartPosition::Beginning => {
                info!(path = %self.path.display(), tag = self.tag, "Following from start of file.");
            }
        }
        ready.notify();

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = cancel.cancelled() => {
                    // Best-effort flush of lines appended since the last
                    // tick, bounded so a dead collector cannot stall
                    // shutdown.
                    let _ = timeout(SHUTDOWN_FLUSH_LIMIT, async {
                        if let Ok(Poll::Lines(lines)) = follower.poll().await {
                            self.ship(lines).await;
                        }
                    })
                    .await;
                    return Ok(());
                }

                _ = ticker.tick() => {
                    match follower.poll().await? {
                        Poll::Lines(lines) => self.ship(lines).await,
                        Poll::RotatedAway => {
                            info!(
                                path = %self.path.display(),
                                tag = self.tag,
                                "File rotated away, stopping tailer."
                            );
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drain::DrainError;
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;
    use tokio::time::sleep;

    #[derive(Default)]
    struct RecordingDrain {
        lines: Mutex<Vec<(String, String)>>,
    }

    impl RecordingDrain {
        fn recorded(&self) -> Vec<(String, String)> {
            self.lines.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Drain for RecordingDrain {
        async fn drain(&self, line: &str, tag: &str) -> Result<(), DrainError> {
            self.lines
                .lock()
                .unwrap()
                .push((line.to_string(), tag.to_string()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RefusingDrain {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl Drain for RefusingDrain {
        async fn drain(&self, _line: &str, _tag: &str) -> Result<(), DrainError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(DrainError::Send(std::io::Error::new(
                ErrorKind::BrokenPipe,
                "collector went away",
            )))
        }
    }

    fn append(path: &std::path::Path, data: &[u8]) {
        let mut file = OpenOptions::new().append(true).open(path).unwrap();
        file.write_all(data).unwrap();
        file.flush().unwrap();
    }

    async fn eventually<F: Fn() -> bool>(check: F) {
        for _ in 0..100 {
            if check() {
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
        panic!("condition never became true");
    }

    #[tokio::test]
    async fn drains_appended_lines_with_tag() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "preexisting\n").unwrap();

        let drain = Arc::new(RecordingDrain::default());
        let tailer = Tailer::new(
            &path,
            "payments",
            drain.clone(),
            Duration::from_millis(20),
            StartPosition::End,
        );

        let cancel = CancellationToken::new();
        let (ready, ready_rx) = Ready::channel();
        let task = tokio::spawn(Box::new(tailer).run(ready, cancel.clone()));
        ready_rx.await.unwrap();

        append(&path, b"hello\nworld\n");
        eventually(|| drain.recorded().len() == 2).await;

        assert_eq!(
            drain.recorded(),
            vec![
                ("hello".to_string(), "payments".to_string()),
                ("world".to_string(), "payments".to_string()),
            ]
        );

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn exits_cleanly_when_file_rotates_away() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "").unwrap();

        let drain = Arc::new(RecordingDrain::default());
        let tailer = Tailer::new(
            &path,
            "api",
            drain,
            Duration::from_millis(20),
            StartPosition::End,
        );

        let (ready, ready_rx) = Ready::channel();
        let task = tokio::spawn(Box::new(tailer).run(ready, CancellationToken::new()));
        ready_rx.await.unwrap();

        std::fs::remove_file(&path).unwrap();

        timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn missing_file_is_a_clean_exit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("never-created.log");

        let drain = Arc::new(RecordingDrain::default());
        let tailer = Tailer::new(
            &path,
            "api",
            drain,
            Duration::from_millis(20),
            StartPosition::End,
        );

        let (ready, ready_rx) = Ready::channel();
        let result = Box::new(tailer).run(ready, CancellationToken::new()).await;

        assert!(result.is_ok());
        ready_rx.await.unwrap();
    }

    #[tokio::test]
    async fn send_failures_do_not_stop_the_tailer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "").unwrap();

        let drain = Arc::new(RefusingDrain::default());
        let tailer = Tailer::new(
            &path,
            "api",
            drain.clone(),
            Duration::from_millis(20),
            StartPosition::End,
        );

        let cancel = CancellationToken::new();
        let (ready, ready_rx) = Ready::channel();
        let task = tokio::spawn(Box::new(tailer).run(ready, cancel.clone()));
        ready_rx.await.unwrap();

        append(&path, b"one\n");
        eventually(|| drain.attempts.load(Ordering::SeqCst) >= 1).await;

        append(&path, b"two\n");
        eventually(|| drain.attempts.load(Ordering::SeqCst) >= 2).await;

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn flushes_pending_lines_on_shutdown() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "").unwrap();

        let drain = Arc::new(RecordingDrain::default());
        // Poll interval far longer than the test, so delivery can only
        // come from the shutdown flush (or the immediate first tick).
        let tailer = Tailer::new(
            &path,
            "api",
            drain.clone(),
            Duration::from_secs(30),
            StartPosition::End,
        );

        let cancel = CancellationToken::new();
        let (ready, ready_rx) = Ready::channel();
        let task = tokio::spawn(Box::new(tailer).run(ready, cancel.clone()));
        ready_rx.await.unwrap();

        sleep(Duration::from_millis(50)).await;
        append(&path, b"last words\n");

        cancel.cancel();
        task.await.unwrap().unwrap();

        assert_eq!(
            drain.recorded(),
            vec![("last words".to_string(), "api".to_string())]
        );
    }
}
