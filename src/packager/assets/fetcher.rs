//! Asset retrieval: offline copies, then cache, then network.

use super::{Asset, AssetCatalog, CacheStore, OfflineAssets, verify};
use crate::packager::{
    error::{Error, Result},
    events::{EventEmitter, EventSender, PackagerEvent},
    utils::http::NetClient,
};
use bytes::Bytes;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;

/// Fetches declared assets for one packaging run.
///
/// Each asset is fetched at most once per fetcher; concurrent requests for
/// the same name share one fetch.
pub struct AssetFetcher {
    catalog: Arc<AssetCatalog>,
    cache: Arc<CacheStore>,
    offline: Arc<OfflineAssets>,
    client: NetClient,
    build_tag: String,
    events: Option<EventSender>,
    cancel: CancellationToken,
    fetched: Mutex<HashMap<String, Arc<OnceCell<Bytes>>>>,
}

impl AssetFetcher {
    /// Creates a fetcher bound to an abort signal.
    pub fn new(
        catalog: Arc<AssetCatalog>,
        cache: Arc<CacheStore>,
        offline: Arc<OfflineAssets>,
        client: NetClient,
        build_tag: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            catalog,
            cache,
            offline,
            client,
            build_tag: build_tag.into(),
            events: None,
            cancel,
            fetched: Mutex::new(HashMap::new()),
        }
    }

    /// Reports `large-asset-fetch` progress to `events`.
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Catalog in use.
    pub fn catalog(&self) -> &AssetCatalog {
        &self.catalog
    }

    /// Returns the verified bytes of asset `name`.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownAsset`] if `name` is not declared
    /// - [`Error::Integrity`] or [`Error::StaleBuild`] if verification fails
    /// - [`Error::Network`] if every source location failed
    /// - [`Error::Aborted`] if the abort signal fired
    pub async fn fetch(&self, name: &str) -> Result<Bytes> {
        let asset = self.catalog.get(name)?;
        let cell = {
            let mut fetched = self.fetched.lock().await;
            fetched.entry(name.to_string()).or_default().clone()
        };
        cell.get_or_try_init(|| self.resolve(asset)).await.cloned()
    }

    fn report(&self, asset: &Asset, progress: f64) {
        self.events.emit(PackagerEvent::LargeAssetFetch {
            asset: asset.name.clone(),
            progress,
        });
    }

    async fn resolve(&self, asset: &Asset) -> Result<Bytes> {
        if self.cancel.is_cancelled() {
            return Err(Error::Aborted);
        }
        self.report(asset, 0.0);

        if let Some(bytes) = self.offline.get(asset).await? {
            log::debug!("Using offline copy of {}", asset.name);
            self.report(asset, 1.0);
            return Ok(bytes);
        }

        let key = asset.cache_key(&self.build_tag);
        let cached = match self.cache.get(&key).await {
            Ok(hit) => hit,
            Err(e) => {
                log::warn!("Cache read for {} failed: {}", asset.name, e);
                None
            }
        };

        let (bytes, from_cache) = match cached {
            Some(bytes) => {
                log::debug!("Cache hit for {}", asset.name);
                self.report(asset, 0.5);
                (bytes, true)
            }
            None => {
                log::info!("Downloading {}", asset.name);
                (self.download(asset).await?, false)
            }
        };

        if let Err(e) = verify(asset, &bytes, &self.build_tag) {
            if from_cache {
                log::warn!("Discarding cached {}: {}", asset.name, e);
                if let Err(remove) = self.cache.remove(&key).await {
                    log::warn!("Could not remove cached {}: {}", asset.name, remove);
                }
            }
            return Err(e);
        }

        if !from_cache {
            if let Err(e) = self.cache.put(&key, &bytes).await {
                log::warn!("Could not cache {}: {}", asset.name, e);
            }
        }

        self.report(asset, 1.0);
        log::info!("✓ Fetched {} ({} bytes)", asset.name, bytes.len());
        Ok(bytes)
    }

    async fn download(&self, asset: &Asset) -> Result<Bytes> {
        let mut last_error = None;
        for url in &asset.src {
            let mut last_percent = None;
            let result = self
                .client
                .fetch(url, &self.cancel, |received, total| {
                    let total = total.unwrap_or(asset.estimated_size).max(received).max(1);
                    let progress = received as f64 / total as f64;
                    let percent = (progress * 100.0) as u32;
                    if last_percent != Some(percent) {
                        last_percent = Some(percent);
                        self.report(asset, progress.min(0.99));
                    }
                })
                .await;
            match result {
                Ok(bytes) => return Ok(bytes),
                Err(Error::Aborted) => return Err(Error::Aborted),
                Err(e @ Error::Request { status: Some(_), transient: false, .. }) => {
                    // The resource is absent or invalid; mirrors serve the same content.
                    log::warn!("{} is unavailable: {}", asset.name, e);
                    return Err(Error::Network {
                        asset: asset.name.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    log::warn!("Source {} for {} failed: {}", url, asset.name, e);
                    last_error = Some(e);
                }
            }
        }
        Err(Error::Network {
            asset: asset.name.clone(),
            reason: last_error.map_or_else(|| "no source locations declared".into(), |e| e.to_string()),
        })
    }
}
