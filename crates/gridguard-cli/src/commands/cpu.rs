//! `gridguard cpu`: live CPU readings through the shedder's probe.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use gridguard_core::ShedderConfig;
use gridguard_shedder::{CpuProbe, CpuSampler, OverloadProbe};

pub async fn sample(config: &ShedderConfig, interval: Duration, samples: u32) -> anyhow::Result<()> {
    let sampler = Arc::new(CpuSampler::new());
    sampler.refresh();
    let probe = CpuProbe::new(sampler.clone(), config.cpu_threshold);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn({
        let sampler = sampler.clone();
        async move { sampler.run(interval, shutdown_rx).await }
    });

    println!("threshold: {}‰", config.cpu_threshold);
    for i in 1..=samples {
        tokio::time::sleep(interval).await;
        println!(
            "{i:>4}  usage {:>4}‰  {}",
            sampler.usage(),
            if probe.overloaded() { "overloaded" } else { "ok" }
        );
    }

    info!("stopping cpu sampler");
    let _ = shutdown_tx.send(true);
    task.await?;
    Ok(())
}
