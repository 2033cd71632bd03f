//! Push-based position sampling.
//!
//! A [`PositionSource`] yields raw fixes. [`start_watching`] rate-limits them
//! with [`SamplerOptions`] and pushes the survivors to a callback from its own
//! task, in capture order.

use std::{pin::Pin, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use field_trip_lib::{distance::distance_between, position::PositionSample};
use tokio::task::JoinHandle;

use crate::error::{Result, TrackerError};

pub type PositionStream = Pin<Box<dyn Stream<Item = Result<PositionSample>> + Send>>;

/// The device positioning capability.
#[async_trait]
pub trait PositionSource: Send + Sync {
    /// Opens a stream of raw fixes. Fails with `PermissionDenied` when the
    /// capability is refused or unreachable.
    async fn watch(&self) -> Result<PositionStream>;
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct SamplerOptions {
    #[serde(rename = "min_interval_secs", deserialize_with = "crate::config::secs")]
    pub min_interval: Duration,
    pub min_distance_m: f64,
}

impl Default for SamplerOptions {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(5),
            min_distance_m: 10.0,
        }
    }
}

/// Decides which raw fixes are delivered. A fix passes when either the time
/// since the last delivered fix or the distance from it reaches its threshold.
#[derive(Debug, Clone)]
pub struct SampleFilter {
    options: SamplerOptions,
    last: Option<PositionSample>,
}

impl SampleFilter {
    pub fn new(options: SamplerOptions) -> Self {
        Self {
            options,
            last: None,
        }
    }

    pub fn accept(&mut self, sample: &PositionSample) -> bool {
        let deliver = match &self.last {
            None => true,
            Some(last) => {
                let elapsed = (sample.timestamp - last.timestamp).to_std().unwrap_or(Duration::ZERO);
                elapsed >= self.options.min_interval
                    || distance_between(&last.position, &sample.position) >= self.options.min_distance_m
            }
        };

        if deliver {
            self.last = Some(sample.clone());
        }
        deliver
    }
}

/// A running watch. Dropping it cancels the watch.
pub struct WatchHandle {
    task: Option<JoinHandle<()>>,
}

impl WatchHandle {
    /// Cancels the watch. No callback runs after this returns.
    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Opens `source` and delivers filtered samples to `on_sample`. If the source
/// cannot be opened, or fails mid-stream, `on_error` is called once and the
/// watch ends.
pub fn start_watching<S, E>(source: Arc<dyn PositionSource>, options: SamplerOptions, on_sample: S, on_error: E) -> WatchHandle
where
    S: FnMut(PositionSample) + Send + 'static,
    E: FnOnce(TrackerError) + Send + 'static,
{
    let task = tokio::spawn(async move {
        match source.watch().await {
            Ok(stream) => run_watch(stream, options, on_sample, on_error).await,
            Err(error) => {
                tracing::warn!("Position source unavailable: {}", error);
                on_error(error);
            }
        }
    });

    WatchHandle {
        task: Some(task),
    }
}

/// Like [`start_watching`], over a stream that is already open.
pub fn watch_stream<S, E>(stream: PositionStream, options: SamplerOptions, on_sample: S, on_error: E) -> WatchHandle
where
    S: FnMut(PositionSample) + Send + 'static,
    E: FnOnce(TrackerError) + Send + 'static,
{
    WatchHandle {
        task: Some(tokio::spawn(run_watch(stream, options, on_sample, on_error))),
    }
}

async fn run_watch<S, E>(mut stream: PositionStream, options: SamplerOptions, mut on_sample: S, on_error: E)
where
    S: FnMut(PositionSample) + Send + 'static,
    E: FnOnce(TrackerError) + Send + 'static,
{
    let mut filter = SampleFilter::new(options);

    while let Some(next) = stream.next().await {
        match next {
            Ok(sample) => {
                if filter.accept(&sample) {
                    on_sample(sample);
                }
            },
            Err(error) => {
                tracing::error!("Position stream failed: {}", error);
                on_error(error);
                return;
            },
        }
    }

    tracing::debug!("Position stream ended");
}

/// Waits for a single fix from `source`.
pub async fn current_fix(source: &dyn PositionSource, timeout: Duration) -> Result<PositionSample> {
    let first = async {
        let mut stream = source.watch().await?;
        match stream.next().await {
            Some(sample) => sample,
            None => Err(TrackerError::NetworkTransient("Position stream ended without a fix".to_string())),
        }
    };

    tokio::time::timeout(timeout, first)
        .await
        .map_err(|_| TrackerError::NetworkTransient(format!("No position fix within {:?}", timeout)))?
}
