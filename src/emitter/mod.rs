//! Polls an expvar endpoint on a fixed interval and republishes its
//! numeric values to Datadog as one time series per dot-joined path.

pub mod datadog;
pub mod expvar;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::select;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::emitter::datadog::{DatadogClient, Metric};
use crate::emitter::expvar::Fetcher;
use crate::group::{BoxError, Ready, Worker};

pub struct Emitter {
    source: String,
    fetcher: Fetcher,
    client: Arc<DatadogClient>,
    interval: Duration,
    hostname: String,
    tags: Vec<String>,
}

impl Emitter {
    pub fn new(
        source: impl Into<String>,
        fetcher: Fetcher,
        client: Arc<DatadogClient>,
        interval: Duration,
        hostname: impl Into<String>,
        tags: Vec<String>,
    ) -> Emitter {
        Emitter {
            source: source.into(),
            fetcher,
            client,
            interval,
            hostname: hostname.into(),
            tags,
        }
    }

    async fn emit(&self) {
        let vars = match self.fetcher.fetch().await {
            Ok(vars) => vars,
            Err(error) => {
                warn!(source = self.source, %error, "Failed to fetch expvars.");
                return;
            }
        };

        let now = Utc::now().timestamp();
        let mut series = Vec::new();
        expvar::walk(&vars, |path, value| {
            series.push(Metric {
                name: path.to_string(),
                points: vec![(now, value)],
                host: self.hostname.clone(),
                tags: self.tags.clone(),
            });
        });

        if let Err(error) = self.client.publish_series(&series).await {
            warn!(source = self.source, %error, "Failed to publish series.");
        }
    }
}

#[async_trait]
impl Worker for Emitter {
    async fn run(self: Box<Self>, ready: Ready, cancel: CancellationToken) -> Result<(), BoxError> {
        ready.notify();

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => self.emit().await,
            }
        }
    }
}
