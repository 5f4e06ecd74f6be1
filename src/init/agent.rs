use crate::drain::{Drain, SyslogDrainer};
use crate::emitter::Emitter;
use crate::emitter::datadog::DatadogClient;
use crate::emitter::expvar::Fetcher;
use crate::group::{BoxError, GroupConfig, ProcessGroup, Ready};
use crate::init::args::AgentRun;
use crate::init::config::Config;
use crate::tailer::Tailer;
use crate::tailer::follower::StartPosition;
use crate::watcher::Watcher;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Builds the process group described by the config file and runs it until
/// cancelled. Static sources become one tailer each; watched roots become
/// directory watchers that register tailers dynamically; expvar sources
/// become metric emitters.
pub struct Agent {
    args: Box<AgentRun>,
}

impl Agent {
    pub fn new(args: Box<AgentRun>) -> Self {
        Self { args }
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<(), BoxError> {
        let config = Config::load_file(&self.args.config)?;
        let hostname = config.hostname()?;

        info!(
            config = %self.args.config.display(),
            hostname = %hostname,
            "Starting taildrain.",
        );

        let group_config = GroupConfig {
            grace: Duration::from_secs(self.args.shutdown_grace_secs),
            ..GroupConfig::default()
        };
        let (mut group, handle) = ProcessGroup::new(group_config);

        if let Some(syslog) = &config.syslog {
            let destination = &syslog.destination;
            let drain: Arc<dyn Drain> = Arc::new(
                SyslogDrainer::connect(destination.transport, &destination.address, &hostname)
                    .await?,
            );
            info!(
                transport = ?destination.transport,
                address = %destination.address,
                "Draining to syslog.",
            );

            // Member names are paths, the same namespace the watchers
            // register under, so a static source and a watched root can
            // never follow one file twice.
            for source in &syslog.sources {
                let tailer = Tailer::new(
                    source.path.clone(),
                    source.tag.clone(),
                    drain.clone(),
                    syslog.poll_interval(),
                    StartPosition::End,
                );
                group.register(source.path.display().to_string(), Box::new(tailer))?;
            }

            for root in &syslog.source_dirs {
                let watcher = Watcher::new(
                    root.clone(),
                    syslog.suffix.clone(),
                    drain.clone(),
                    handle.clone(),
                    syslog.refresh_interval(),
                    syslog.poll_interval(),
                );
                group.register(format!("watch:{}", root.display()), Box::new(watcher))?;
            }
        }

        if let Some(expvar) = &config.expvar {
            if !expvar.sources.is_empty() {
                let http = reqwest::Client::new();
                let client = Arc::new(DatadogClient::new(
                    expvar.datadog.api_key.clone(),
                    http.clone(),
                ));

                for source in &expvar.sources {
                    let emitter = Emitter::new(
                        source.name.clone(),
                        Fetcher::new(source.url.clone(), http.clone()),
                        client.clone(),
                        expvar.interval(),
                        hostname.clone(),
                        source.tags.clone(),
                    );
                    group.register(source.name.clone(), Box::new(emitter))?;
                }
            }
        }

        let (ready, ready_rx) = Ready::channel();
        tokio::spawn(async move {
            if ready_rx.await.is_ok() {
                info!("All group members running.");
            }
        });

        group.run(ready, cancel).await?;
        Ok(())
    }
}
