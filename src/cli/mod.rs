//! Command line interface for the project packager.
//!
//! Parses arguments, wires the process-wide cache and HTTP client into a
//! [`Packager`], logs progress events and writes the finished artifact.

mod args;

pub use args::Args;

use crate::error::Result;
use crate::packager::{
    AssetCatalog, CacheStore, Error, NetClient, NetConfig, OfflineAssets, PackageOptions,
    Packager, PackagerContext, PackagerEvent, ProjectBundle,
    assets::BUILD_TAG,
    events::{self, EventReceiver},
};
use std::{path::PathBuf, sync::Arc};

/// Exit code of a run stopped with Ctrl-C
const EXIT_ABORTED: i32 = 130;

/// Main CLI entry point
pub async fn run() -> Result<i32> {
    let args = Args::parse_args();
    args.validate()?;

    let mut options = match &args.options {
        Some(path) => PackageOptions::from_file(path)?,
        None => PackageOptions::default(),
    };
    if let Some(target) = args.target {
        options.target = target;
    }

    let mut catalog = AssetCatalog::builtin(&args.asset_base);
    if let Some(path) = &args.catalog {
        catalog.apply_file(path)?;
    }
    let build_tag = args.build_tag.clone().unwrap_or_else(|| BUILD_TAG.to_string());

    let cache = if args.no_cache {
        CacheStore::in_memory()
    } else {
        let dir = args.cache_dir()?;
        log::debug!("Using asset cache {}", dir.display());
        CacheStore::open(dir, &catalog.valid_cache_keys(&build_tag)).await?
    };

    let mut net = NetConfig::default();
    if let Some(retries) = args.retries {
        net.max_retries = retries;
    }

    let mut context =
        PackagerContext::new(catalog, cache, NetClient::new(net)?)?.with_build_tag(build_tag);
    if let Some(dir) = &args.offline_dir {
        context = context.with_offline(OfflineAssets::from_dir(dir));
    }

    let bundle = ProjectBundle::from_file(&args.project).await?;
    let (tx, rx) = events::channel();
    let mut packager = Packager::new(context).with_events(tx);
    packager.configure(options)?;
    packager.set_project_bundle(bundle)?;
    let packager = Arc::new(packager);

    let observer = tokio::spawn(log_events(rx));
    let interrupt = tokio::spawn({
        let packager = packager.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Interrupted");
                packager.abort();
            }
        }
    });

    let result = packager.run().await;
    interrupt.abort();
    let _ = interrupt.await;
    drop(packager);
    let _ = observer.await;

    let artifact = match result {
        Ok(artifact) => artifact,
        Err(Error::Aborted) => return Ok(EXIT_ABORTED),
        Err(e) => return Err(e.into()),
    };

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(&artifact.suggested_filename));
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    artifact.write_to(&output).await?;
    log::info!("SHA256: {}", artifact.checksum());
    println!("{}", output.display());

    Ok(0)
}

/// Logs events until every sender is gone.
async fn log_events(mut rx: EventReceiver) {
    let mut last_percent: Option<(String, u32)> = None;
    while let Some(event) = rx.recv().await {
        match &event {
            PackagerEvent::StateChanged { state } => log::info!("State: {}", state),
            PackagerEvent::LargeAssetFetch { asset, progress } => {
                let percent = (progress * 100.0) as u32;
                let key = (asset.clone(), percent / 10);
                if last_percent.as_ref() != Some(&key) {
                    log::info!("Fetching {}: {}%", asset, percent);
                    last_percent = Some(key);
                }
            }
            PackagerEvent::ArchiveProgress { progress } => {
                log::debug!("{}: {:.0}%", event.name(), progress * 100.0)
            }
            PackagerEvent::Progress { step, overall, .. } => {
                log::debug!("{}: {:.0}% overall", step, overall * 100.0)
            }
            PackagerEvent::ArtifactReady { filename } => log::debug!("Artifact ready: {}", filename),
        }
    }
}
