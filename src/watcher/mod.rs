// SPDX-License-Identifier: Apache-2.0

//! Polling directory watcher. Each immediate subdirectory of a watched
//! root is a tag; every file directly inside a tag directory gets its
//! own tailer, registered with the process group under the file's path.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::read_dir;
use tokio::select;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::drain::Drain;
use crate::group::{BoxError, GroupError, GroupHandle, Ready, Worker};
use crate::tailer::Tailer;
use crate::tailer::follower::StartPosition;

pub struct Watcher {
    root: PathBuf,
    suffix: Option<String>,
    drain: Arc<dyn Drain>,
    group: GroupHandle,
    refresh_interval: Duration,
    poll_interval: Duration,
}

impl Watcher {
    pub fn new(
        root: impl Into<PathBuf>,
        suffix: Option<String>,
        drain: Arc<dyn Drain>,
        group: GroupHandle,
        refresh_interval: Duration,
        poll_interval: Duration,
    ) -> Watcher {
        Watcher {
            root: root.into(),
            suffix,
            drain,
            group,
            refresh_interval,
            poll_interval,
        }
    }

    async fn scan(&self, known: &mut HashSet<String>, seen_dirs: &mut HashSet<PathBuf>) {
        let mut entries = match read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(error) => {
                warn!(
                    root = %self.root.display(),
                    %error,
                    "Failed to read watch root, skipping cycle."
                );
                return;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(error) => {
                    warn!(
                        root = %self.root.display(),
                        %error,
                        "Failed to enumerate watch root, skipping cycle."
                    );
                    return;
                }
            };

            match entry.file_type().await {
                Ok(file_type) if file_type.is_dir() => {}
                // Files directly under the root carry no tag.
                _ => continue,
            }

            let tag = match entry.file_name().into_string() {
                Ok(tag) => tag,
                Err(_) => continue,
            };

            self.scan_tag_dir(&entry.path(), &tag, known, seen_dirs)
                .await;
        }
    }

    async fn scan_tag_dir(
        &self,
        dir: &Path,
        tag: &str,
        known: &mut HashSet<String>,
        seen_dirs: &mut HashSet<PathBuf>,
    ) {
        // Files already present the first time a directory is listed
        // predate the watch and are followed from end-of-file. Files
        // appearing in later listings were created under watch, so their
        // whole content is new and is followed from the beginning.
        let start = if seen_dirs.contains(dir) {
            StartPosition::Beginning
        } else {
            StartPosition::End
        };

        let mut entries = match read_dir(dir).await {
            Ok(entries) => entries,
            Err(error) => {
                warn!(
                    dir = %dir.display(),
                    %error,
                    "Failed to read tag directory, skipping it this cycle."
                );
                return;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(error) => {
                    warn!(
                        dir = %dir.display(),
                        %error,
                        "Failed to enumerate tag directory, skipping it this cycle."
                    );
                    return;
                }
            };

            let path = entry.path();
            match entry.file_type().await {
                Ok(file_type) if file_type.is_file() => {}
                // No recursion below a tag directory.
                _ => continue,
            }

            if let Some(suffix) = &self.suffix {
                let matched = path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .map_or(false, |name| name.ends_with(suffix.as_str()));
                if !matched {
                    continue;
                }
            }

            let name = path.to_string_lossy().into_owned();
            if known.contains(&name) {
                continue;
            }

            let tailer = Tailer::new(&path, tag, self.drain.clone(), self.poll_interval, start);
            match self.group.register(name.clone(), Box::new(tailer)).await {
                Ok(()) => {
                    info!(path = %path.display(), tag, "Following new file.");
                    known.insert(name);
                }
                Err(GroupError::DuplicateName(_)) => {
                    // Another watch root already covers this path.
                    debug!(path = %path.display(), "Path already followed.");
                    known.insert(name);
                }
                // Group is shutting down; our own cancellation follows.
                Err(_) => return,
            }
        }

        seen_dirs.insert(dir.to_path_buf());
    }
}

#[async_trait]
impl Worker for Watcher {
    async fn run(self: Box<Self>, ready: Ready, cancel: CancellationToken) -> Result<(), BoxError> {
        ready.notify();

        let mut known: HashSet<String> = HashSet::new();
        let mut seen_dirs: HashSet<PathBuf> = HashSet::new();

        let mut ticker = interval(self.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = cancel.cancelled() => return Ok(()),

                _ = ticker.tick() => {
                    // Tailers that exited (rotation) leave the live set;
                    // dropping them here lets a recreated path register
                    // as a fresh member.
                    known.retain(|name| self.group.is_member(name));
                    self.scan(&mut known, &mut seen_dirs).await;
                }
            }
        }
    }
}
