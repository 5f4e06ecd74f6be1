//! Process group supervision: a variable-size set of named, cancellable
//! workers run as one unit with coordinated startup and shutdown.

use crate::bounded_channel::{BoundedReceiver, BoundedSender, bounded};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub mod wait;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

const REGISTRATION_QUEUE_SIZE: usize = 64;

/// One-shot startup notification handed to each worker.
pub struct Ready(oneshot::Sender<()>);

impl Ready {
    pub fn channel() -> (Ready, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Ready(tx), rx)
    }

    pub fn notify(self) {
        let _ = self.0.send(());
    }
}

/// The one capability every group member has: run until cancelled or
/// finished, signal readiness once startup is complete, return a terminal
/// result. Tailers, directory watchers, and emitters all satisfy this.
#[async_trait]
pub trait Worker: Send + 'static {
    async fn run(self: Box<Self>, ready: Ready, cancel: CancellationToken) -> Result<(), BoxError>;
}

#[derive(Error, Debug)]
pub enum GroupError {
    #[error("duplicate member name: {0}")]
    DuplicateName(String),

    #[error("group is stopping")]
    Stopping,

    #[error("member {name} failed: {source}")]
    MemberFailed { name: String, source: BoxError },

    #[error("timed out waiting for group members to exit")]
    ShutdownTimeout,
}

#[derive(Debug, Clone)]
pub struct GroupConfig {
    /// Cancel all remaining members when any member fails.
    pub fail_fast: bool,
    /// How long members get to exit once cancelled before they are aborted.
    pub grace: Duration,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            fail_fast: true,
            grace: Duration::from_secs(5),
        }
    }
}

struct RegisterRequest {
    name: String,
    worker: Box<dyn Worker>,
    reply: oneshot::Sender<Result<(), GroupError>>,
}

struct MemberExit {
    name: String,
    result: Result<(), BoxError>,
}

/// Cloneable handle for interacting with a running group.
#[derive(Clone)]
pub struct GroupHandle {
    requests: BoundedSender<RegisterRequest>,
    live: Arc<Mutex<HashSet<String>>>,
    stop: CancellationToken,
}

impl GroupHandle {
    /// Adds a member while the group is running. Fails with `DuplicateName`
    /// if a member with this name is still live, or `Stopping` if the group
    /// is shutting down.
    pub async fn register(
        &self,
        name: impl Into<String>,
        worker: Box<dyn Worker>,
    ) -> Result<(), GroupError> {
        let (reply, reply_rx) = oneshot::channel();
        self.requests
            .send(RegisterRequest {
                name: name.into(),
                worker,
                reply,
            })
            .await
            .map_err(|_| GroupError::Stopping)?;
        reply_rx.await.map_err(|_| GroupError::Stopping)?
    }

    /// True while a member with this name is running.
    pub fn is_member(&self, name: &str) -> bool {
        self.live.lock().map(|l| l.contains(name)).unwrap_or(false)
    }

    /// Requests group shutdown. Idempotent and safe to call from any task.
    pub fn stop(&self) {
        self.stop.cancel();
    }
}

/// Runs an arbitrary, changing set of named workers as one logical unit.
///
/// Members registered before `run` launch concurrently at start; the group
/// signals its own readiness once every one of them has signalled. Further
/// members register through the [`GroupHandle`], serialized through the
/// group's command queue so uniqueness checks cannot race. When a member's
/// run loop returns it is removed from the live set; a failure in fail-fast
/// mode cancels every other member and the group returns the failure after a
/// bounded grace period.
pub struct ProcessGroup {
    config: GroupConfig,
    members: Vec<(String, Box<dyn Worker>)>,
    names: HashSet<String>,
    requests: BoundedReceiver<RegisterRequest>,
    live: Arc<Mutex<HashSet<String>>>,
    stop: CancellationToken,
}

impl ProcessGroup {
    pub fn new(config: GroupConfig) -> (Self, GroupHandle) {
        let (tx, rx) = bounded(REGISTRATION_QUEUE_SIZE);
        let live = Arc::new(Mutex::new(HashSet::new()));
        let stop = CancellationToken::new();

        let handle = GroupHandle {
            requests: tx,
            live: live.clone(),
            stop: stop.clone(),
        };

        let group = Self {
            config,
            members: Vec::new(),
            names: HashSet::new(),
            requests: rx,
            live,
            stop,
        };

        (group, handle)
    }

    /// Registers a member before the group starts. After start, register
    /// through the handle instead.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        worker: Box<dyn Worker>,
    ) -> Result<(), GroupError> {
        let name = name.into();
        if !self.names.insert(name.clone()) {
            return Err(GroupError::DuplicateName(name));
        }
        self.members.push((name, worker));
        Ok(())
    }

    /// Runs the group until cancelled, stopped, or (in fail-fast mode) a
    /// member fails. The first member error is surfaced as the terminal
    /// result.
    pub async fn run(
        self,
        ready: Ready,
        cancel: CancellationToken,
    ) -> Result<(), GroupError> {
        let ProcessGroup {
            config,
            members,
            mut names,
            mut requests,
            live,
            stop,
        } = self;

        let group_cancel = CancellationToken::new();
        let mut tasks: JoinSet<MemberExit> = JoinSet::new();
        let mut ready_set: JoinSet<()> = JoinSet::new();

        let initial = members.len();
        for (name, worker) in members {
            spawn_member(name, worker, &mut tasks, &mut ready_set, &live, &group_cancel);
        }

        let mut pending_ready = initial;
        let mut ready = Some(ready);
        if pending_ready == 0 {
            if let Some(r) = ready.take() {
                r.notify();
            }
        }

        let mut first_error: Option<GroupError> = None;
        let mut requests_open = true;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Group cancellation signaled.");
                    break;
                },
                _ = stop.cancelled() => {
                    debug!("Group stop requested.");
                    break;
                },
                Some(_) = ready_set.join_next() => {
                    // A receiver that resolves by error means the member
                    // exited before signalling; count it so a fast clean
                    // exit cannot wedge startup.
                    if pending_ready > 0 {
                        pending_ready -= 1;
                        if pending_ready == 0 {
                            if let Some(r) = ready.take() {
                                r.notify();
                            }
                        }
                    }
                },
                req = requests.next(), if requests_open => {
                    match req {
                        Some(req) => {
                            if names.contains(&req.name) {
                                let _ = req.reply.send(Err(GroupError::DuplicateName(req.name)));
                            } else {
                                names.insert(req.name.clone());
                                spawn_member(
                                    req.name,
                                    req.worker,
                                    &mut tasks,
                                    &mut ready_set,
                                    &live,
                                    &group_cancel,
                                );
                                let _ = req.reply.send(Ok(()));
                            }
                        },
                        None => requests_open = false,
                    }
                },
                Some(exit) = tasks.join_next() => {
                    let failed = record_exit(exit, &mut names, &live, &mut first_error);
                    if failed && config.fail_fast {
                        break;
                    }
                },
            }
        }

        // Shutdown: cancel everyone, give them the grace period, then abort
        // whatever is left. Registrations arriving while draining are
        // rejected so callers blocked on a reply cannot deadlock the drain.
        group_cancel.cancel();
        let deadline = Instant::now() + config.grace;

        while !tasks.is_empty() {
            tokio::select! {
                exit = timeout_at(deadline, tasks.join_next()) => {
                    match exit {
                        Err(_) => {
                            warn!(
                                remaining = tasks.len(),
                                "Group members did not exit within grace period, aborting."
                            );
                            tasks.abort_all();
                            while tasks.join_next().await.is_some() {}
                            if first_error.is_none() {
                                first_error = Some(GroupError::ShutdownTimeout);
                            }
                            break;
                        }
                        Ok(None) => break,
                        Ok(Some(exit)) => {
                            record_exit(exit, &mut names, &live, &mut first_error);
                        }
                    }
                },
                req = requests.next(), if requests_open => {
                    match req {
                        Some(req) => {
                            let _ = req.reply.send(Err(GroupError::Stopping));
                        },
                        None => requests_open = false,
                    }
                },
            }
        }

        if let Ok(mut l) = live.lock() {
            l.clear();
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Worker for ProcessGroup {
    async fn run(self: Box<Self>, ready: Ready, cancel: CancellationToken) -> Result<(), BoxError> {
        ProcessGroup::run(*self, ready, cancel)
            .await
            .map_err(Into::into)
    }
}

fn spawn_member(
    name: String,
    worker: Box<dyn Worker>,
    tasks: &mut JoinSet<MemberExit>,
    ready_set: &mut JoinSet<()>,
    live: &Arc<Mutex<HashSet<String>>>,
    group_cancel: &CancellationToken,
) {
    debug!(member = %name, "Starting group member.");

    let (ready, ready_rx) = Ready::channel();
    ready_set.spawn(async move {
        let _ = ready_rx.await;
    });

    if let Ok(mut l) = live.lock() {
        l.insert(name.clone());
    }

    let cancel = group_cancel.child_token();
    tasks.spawn(async move {
        let result = worker.run(ready, cancel).await;
        MemberExit { name, result }
    });
}

/// Removes the member from the bookkeeping sets and records the first
/// failure. Returns true if this exit was a failure.
fn record_exit(
    exit: Result<MemberExit, JoinError>,
    names: &mut HashSet<String>,
    live: &Arc<Mutex<HashSet<String>>>,
    first_error: &mut Option<GroupError>,
) -> bool {
    match exit {
        Ok(MemberExit { name, result }) => {
            names.remove(&name);
            if let Ok(mut l) = live.lock() {
                l.remove(&name);
            }
            match result {
                Ok(()) => {
                    info!(member = %name, "Group member exited.");
                    false
                }
                Err(e) => {
                    error!(member = %name, error = %e, "Group member failed.");
                    if first_error.is_none() {
                        *first_error = Some(GroupError::MemberFailed { name, source: e });
                    }
                    true
                }
            }
        }
        Err(e) => {
            if e.is_cancelled() {
                return false;
            }
            error!(error = %e, "Group member panicked.");
            if first_error.is_none() {
                *first_error = Some(GroupError::MemberFailed {
                    name: "unknown".to_string(),
                    source: e.into(),
                });
            }
            true
        }
    }
}
