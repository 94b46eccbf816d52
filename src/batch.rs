use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result, bail};
use tokio::{
    sync::{Semaphore, mpsc},
    task::JoinHandle,
    time::sleep,
};
use tracing::{debug, info};

use crate::pagespeed::{Measurement, SpeedFetcher, SpeedSource};

/// Launch schedule for a batch of fetches.
#[derive(Debug, Clone, Default)]
pub struct BatchPlan {
    /// Pause between launching consecutive fetches.
    pub delay: Duration,
    /// Upper bound on fetches in flight; `None` launches every site.
    pub max_in_flight: Option<usize>,
}

struct TaskSet(Vec<JoinHandle<()>>);

impl Drop for TaskSet {
    fn drop(&mut self) {
        for task in &self.0 {
            task.abort();
        }
    }
}

/// Measure every site, one task per site, staggered by `plan.delay`.
///
/// Returns exactly one measurement per site in completion order. The first
/// failed fetch aborts the outstanding ones and is returned as the error.
pub async fn run_batch<S: SpeedSource>(
    fetcher: Arc<SpeedFetcher<S>>,
    sites: Vec<String>,
    plan: &BatchPlan,
) -> Result<Vec<Measurement>> {
    let total = sites.len();
    if total == 0 {
        return Ok(Vec::new());
    }

    info!(
        sites = total,
        delay_ms = plan.delay.as_millis() as u64,
        max_in_flight = ?plan.max_in_flight,
        "dispatching measurements"
    );

    let (tx, mut rx) = mpsc::channel::<Result<Measurement>>(total);
    let limiter = plan
        .max_in_flight
        .map(|limit| Arc::new(Semaphore::new(limit.max(1))));
    let mut tasks = TaskSet(Vec::with_capacity(total));

    let mut measurements = Vec::with_capacity(total);
    for (index, site) in sites.into_iter().enumerate() {
        if index > 0 && !plan.delay.is_zero() {
            let pause = sleep(plan.delay);
            tokio::pin!(pause);
            loop {
                tokio::select! {
                    _ = &mut pause => break,
                    received = rx.recv() => collect(received, &mut measurements, total)?,
                }
            }
        }
        let permit = match &limiter {
            Some(semaphore) => Some(loop {
                tokio::select! {
                    permit = Arc::clone(semaphore).acquire_owned() => {
                        break permit.context("Fetch limiter closed unexpectedly")?;
                    }
                    received = rx.recv() => collect(received, &mut measurements, total)?,
                }
            }),
            None => None,
        };

        let fetcher = Arc::clone(&fetcher);
        let tx = tx.clone();
        debug!(url = %site, index, "launching fetch");
        tasks.0.push(tokio::spawn(async move {
            let _permit = permit;
            let result = fetcher.measure(&site).await;
            let _ = tx.send(result).await;
        }));
    }
    drop(tx);

    while measurements.len() < total {
        collect(rx.recv().await, &mut measurements, total)?;
    }

    info!(measurements = measurements.len(), "batch complete");
    Ok(measurements)
}

/// Record one result from the channel; a failed fetch ends the batch.
fn collect(
    received: Option<Result<Measurement>>,
    measurements: &mut Vec<Measurement>,
    total: usize,
) -> Result<()> {
    match received {
        Some(Ok(measurement)) => {
            debug!(
                url = %measurement.url,
                received = measurements.len() + 1,
                total,
                "collected measurement"
            );
            measurements.push(measurement);
            Ok(())
        }
        Some(Err(err)) => Err(err),
        None => bail!(
            "{} of {total} measurements missing: a fetch task exited without reporting",
            total - measurements.len()
        ),
    }
}
