//! Packaging run orchestration.
//!
//! A [`Packager`] drives one run through its states:
//!
//! ```text
//! idle → validating → fetching-resources → composing → (assembling-archive) → done
//! ```
//!
//! `aborted` is reachable from every non-terminal state and `failed` from any
//! state on error. A packager is single-use.

use super::progress::{ProgressTable, Step};
use crate::packager::{
    archive::{ArchiveAssembler, Icon, InnerFiles, RuntimeArchive},
    artifact::{Artifact, ArtifactData},
    assets::{AssetCatalog, AssetFetcher, BUILD_TAG, CacheStore, OfflineAssets, SCAFFOLDING},
    error::{Error, ErrorExt, Result},
    events::{self, EventEmitter, EventSender, PackagerEvent},
    optimizer::ProjectOptimizer,
    project::ProjectBundle,
    settings::{PackageOptions, Target, parse_hex_color},
    template::{DocumentTemplate, HandlebarsTemplate, ProjectSource, TemplateValues},
    utils::http::NetClient,
};
use bytes::Bytes;
use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio_util::sync::CancellationToken;

/// Lifecycle state of a [`Packager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackagerState {
    Idle,
    Validating,
    FetchingResources,
    Composing,
    AssemblingArchive,
    Done,
    Aborted,
    Failed,
}

impl PackagerState {
    /// Whether the run is over.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PackagerState::Done | PackagerState::Aborted | PackagerState::Failed
        )
    }
}

impl fmt::Display for PackagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PackagerState::Idle => "idle",
            PackagerState::Validating => "validating",
            PackagerState::FetchingResources => "fetching-resources",
            PackagerState::Composing => "composing",
            PackagerState::AssemblingArchive => "assembling-archive",
            PackagerState::Done => "done",
            PackagerState::Aborted => "aborted",
            PackagerState::Failed => "failed",
        })
    }
}

/// Process-wide collaborators shared by packaging runs.
#[derive(Clone)]
pub struct PackagerContext {
    pub catalog: Arc<AssetCatalog>,
    pub cache: Arc<CacheStore>,
    pub offline: Arc<OfflineAssets>,
    pub client: NetClient,
    pub build_tag: String,
    pub templates: Arc<HandlebarsTemplate>,
    pub document: Arc<dyn DocumentTemplate>,
}

impl PackagerContext {
    /// Context with the built-in templates, no offline copies and this
    /// packager's build tag.
    pub fn new(catalog: AssetCatalog, cache: CacheStore, client: NetClient) -> Result<Self> {
        let templates = Arc::new(HandlebarsTemplate::new()?);
        Ok(Self {
            catalog: Arc::new(catalog),
            cache: Arc::new(cache),
            offline: Arc::new(OfflineAssets::none()),
            client,
            build_tag: BUILD_TAG.to_string(),
            document: templates.clone(),
            templates,
        })
    }

    /// Uses `offline` before the cache and the network.
    pub fn with_offline(mut self, offline: OfflineAssets) -> Self {
        self.offline = Arc::new(offline);
        self
    }

    /// Requires build-tagged assets to carry `tag`.
    pub fn with_build_tag(mut self, tag: impl Into<String>) -> Self {
        self.build_tag = tag.into();
        self
    }

    /// Renders documents with `document`.
    pub fn with_document_template(mut self, document: Arc<dyn DocumentTemplate>) -> Self {
        self.document = document;
        self
    }
}

/// Packages one project with one set of options.
///
/// [`run`](Packager::run) may be called once. [`abort`](Packager::abort) may
/// be called at any time, from any task.
///
/// # Examples
///
/// ```no_run
/// use project_packager::packager::{Packager, PackagerContext, PackageOptions, ProjectBundle};
///
/// # async fn example(context: PackagerContext, options: PackageOptions) -> project_packager::packager::Result<()> {
/// let mut packager = Packager::new(context);
/// packager.configure(options)?;
/// packager.set_project_bundle(ProjectBundle::from_bytes(std::fs::read("game.sb3")?)?)?;
/// let artifact = packager.run().await?;
/// println!("{} ({} bytes)", artifact.suggested_filename, artifact.len());
/// # Ok(())
/// # }
/// ```
pub struct Packager {
    context: PackagerContext,
    options: Option<PackageOptions>,
    bundle: Option<ProjectBundle>,
    events: Option<EventSender>,
    state: Mutex<PackagerState>,
    started: AtomicBool,
    cancel: CancellationToken,
}

impl fmt::Debug for Packager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packager")
            .field("state", &self.state())
            .field("options", &self.options)
            .field("bundle", &self.bundle.as_ref().map(|b| b.kind))
            .finish()
    }
}

impl Packager {
    /// Creates an idle packager.
    pub fn new(context: PackagerContext) -> Self {
        Self {
            context,
            options: None,
            bundle: None,
            events: None,
            state: Mutex::new(PackagerState::Idle),
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    /// Sends progress and lifecycle events to `events`.
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Current state.
    pub fn state(&self) -> PackagerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.started.load(Ordering::SeqCst) {
            return Err(Error::Reuse);
        }
        Ok(())
    }

    /// Sets the options for the run.
    pub fn configure(&mut self, options: PackageOptions) -> Result<()> {
        self.ensure_idle()?;
        self.options = Some(options);
        Ok(())
    }

    /// Sets the project to package.
    pub fn set_project_bundle(&mut self, bundle: ProjectBundle) -> Result<()> {
        self.ensure_idle()?;
        self.bundle = Some(bundle);
        Ok(())
    }

    /// Stops the run. Pending fetches fail promptly and
    /// [`run`](Packager::run) returns [`Error::Aborted`]. Idempotent.
    pub fn abort(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        log::info!("Aborting packaging run");
        self.cancel.cancel();
        self.transition(PackagerState::Aborted);
    }

    fn transition(&self, next: PackagerState) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.is_terminal() || *state == next {
                return;
            }
            log::debug!("Packager state: {} -> {}", *state, next);
            *state = next;
        }
        self.events.emit(PackagerEvent::StateChanged { state: next });
    }

    fn report(&self, step: Step, fraction: f64) {
        self.events.emit(PackagerEvent::Progress {
            step,
            fraction,
            overall: ProgressTable::overall(step, fraction),
        });
    }

    /// Runs the packaging pipeline and returns the artifact.
    ///
    /// # Errors
    ///
    /// - [`Error::Reuse`] if this packager already ran
    /// - [`Error::Aborted`] if [`abort`](Packager::abort) was called
    /// - [`Error::InvalidOptions`] if options or project are missing or invalid
    /// - any fetch, optimization or assembly error
    pub async fn run(&self) -> Result<Artifact> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::Reuse);
        }
        if self.cancel.is_cancelled() {
            return Err(Error::Aborted);
        }

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Aborted),
            result = self.execute() => result,
        };

        match result {
            Ok(artifact) if !self.cancel.is_cancelled() => {
                self.transition(PackagerState::Done);
                log::info!(
                    "✓ Packaged {} ({} bytes)",
                    artifact.suggested_filename,
                    artifact.len()
                );
                self.events.emit(PackagerEvent::ArtifactReady {
                    filename: artifact.suggested_filename.clone(),
                });
                Ok(artifact)
            }
            Ok(_) | Err(Error::Aborted) => {
                self.transition(PackagerState::Aborted);
                Err(Error::Aborted)
            }
            Err(e) => {
                log::error!("Packaging failed: {}", e);
                self.transition(PackagerState::Failed);
                Err(e)
            }
        }
    }

    async fn execute(&self) -> Result<Artifact> {
        self.transition(PackagerState::Validating);
        let options = self
            .options
            .clone()
            .ok_or_else(|| Error::InvalidOptions("packager was not configured".into()))?;
        let bundle = self
            .bundle
            .clone()
            .ok_or_else(|| Error::InvalidOptions("no project bundle was set".into()))?;
        options.validate()?;
        log::info!(
            "Packaging {} for {} ({:?} project)",
            options.package_name(),
            options.target,
            bundle.kind
        );

        self.transition(PackagerState::FetchingResources);
        self.report(Step::FetchAssets, 0.0);
        let (scaffolding, runtime, icon) = self.fetch_resources(&options).await?;
        self.report(Step::FetchAssets, 1.0);

        self.transition(PackagerState::Composing);
        let optimizer = options
            .optimize
            .enabled
            .then(|| ProjectOptimizer::new(options.optimize.reserved_ids.iter().cloned()));
        let project = {
            let bundle = bundle.clone();
            blocking(move || bundle.prepare(optimizer.as_ref())).await?
        };
        self.report(Step::OptimizeProject, 1.0);

        let document = {
            let options = options.clone();
            let template = self.context.document.clone();
            let icon = icon.clone();
            let project = project.clone();
            let inline = options.target == Target::Html;
            let project_file = bundle.file_name();
            blocking(move || {
                let png = icon.to_png(64)?;
                let source = if inline {
                    ProjectSource::Inline(&project)
                } else {
                    ProjectSource::Url(project_file)
                };
                let scaffolding = String::from_utf8_lossy(&scaffolding);
                template.render(&TemplateValues::new(&options, &scaffolding, Some(&png), source)?)
            })
            .await?
        };
        self.report(Step::ComposeDocument, 1.0);

        let name = options.package_name().to_string();
        let target = options.target;
        if target == Target::Html {
            return Ok(Artifact {
                data: ArtifactData::Text(document),
                mime_type: "text/html",
                suggested_filename: format!("{name}.html"),
            });
        }

        self.transition(PackagerState::AssemblingArchive);
        let mut inner = InnerFiles::new();
        inner.push("index.html", document)?;
        inner.push(bundle.file_name(), project.to_vec())?;

        let assembler = ArchiveAssembler::new(
            options,
            icon,
            self.context.templates.clone(),
            self.events.clone(),
            self.cancel.clone(),
        );
        let archive = blocking(move || match (target, runtime) {
            (Target::Desktop(family, os), Some((asset, bytes))) => {
                let runtime = RuntimeArchive::open(&asset, bytes)?;
                assembler.assemble_desktop(family, os, runtime, &inner)
            }
            _ => assembler.assemble_zip(&inner),
        })
        .await?;

        let suggested_filename = match target {
            Target::Desktop(..) => format!("{name}-{target}.zip"),
            _ => format!("{name}.zip"),
        };
        Ok(Artifact {
            data: ArtifactData::Bytes(archive),
            mime_type: "application/zip",
            suggested_filename,
        })
    }

    /// Fetches the scaffolding, the runtime archive and the icon concurrently.
    async fn fetch_resources(
        &self,
        options: &PackageOptions,
    ) -> Result<(Bytes, Option<(String, Bytes)>, Arc<Icon>)> {
        let (tx, mut rx) = events::channel();
        let fetcher = AssetFetcher::new(
            self.context.catalog.clone(),
            self.context.cache.clone(),
            self.context.offline.clone(),
            self.context.client.clone(),
            self.context.build_tag.clone(),
            self.cancel.clone(),
        )
        .with_events(tx);
        let fetcher = &fetcher;
        let runtime_asset = options.target.runtime_asset();
        let mut fetch_progress = FetchProgress::new(
            std::iter::once(SCAFFOLDING).chain(runtime_asset),
        );

        let runtime = async {
            let runtime: Result<Option<(String, Bytes)>> = match runtime_asset {
                Some(name) => Ok(Some((name.to_string(), fetcher.fetch(name).await?))),
                None => Ok(None),
            };
            runtime
        };
        let resources = async {
            tokio::try_join!(fetcher.fetch(SCAFFOLDING), runtime, load_icon(options))
        };
        tokio::pin!(resources);

        let resources = loop {
            tokio::select! {
                fetched = &mut resources => break fetched,
                Some(event) = rx.recv() => self.forward_fetch_event(event, &mut fetch_progress),
            }
        };
        while let Ok(event) = rx.try_recv() {
            self.forward_fetch_event(event, &mut fetch_progress);
        }
        resources
    }

    fn forward_fetch_event(&self, event: PackagerEvent, fetch_progress: &mut FetchProgress) {
        if let PackagerEvent::LargeAssetFetch { asset, progress } = &event {
            if let Some(fraction) = fetch_progress.update(asset, *progress) {
                self.report(Step::FetchAssets, fraction);
            }
        }
        self.events.emit(event);
    }
}

/// Mean progress across the assets one run fetches. An asset's fraction
/// never decreases, even when a mirror restarts its download.
struct FetchProgress {
    assets: HashMap<String, f64>,
}

impl FetchProgress {
    fn new<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            assets: names.into_iter().map(|name| (name.to_string(), 0.0)).collect(),
        }
    }

    /// Records `progress` for `asset` and returns the new mean, or `None`
    /// for an asset this run did not request.
    fn update(&mut self, asset: &str, progress: f64) -> Option<f64> {
        let current = self.assets.get_mut(asset)?;
        *current = current.max(progress.clamp(0.0, 1.0));
        Some(self.assets.values().sum::<f64>() / self.assets.len() as f64)
    }
}

async fn load_icon(options: &PackageOptions) -> Result<Arc<Icon>> {
    let Some(path) = &options.app.icon else {
        let background = parse_hex_color(&options.appearance.background).unwrap_or([0, 0, 0]);
        let accent = parse_hex_color(&options.appearance.accent).unwrap_or([255, 255, 255]);
        return Ok(Arc::new(Icon::generated(background, accent)));
    };
    let bytes = tokio::fs::read(path).await.fs_context("reading icon", path)?;
    let icon = blocking(move || Icon::decode(&bytes)).await?;
    log::debug!("Loaded icon {} ({}px)", path.display(), icon.resolution());
    Ok(Arc::new(icon))
}

/// Runs `f` on the blocking worker pool.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::GenericError(format!("worker task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packager::{
        archive::testing::zip_of,
        events::{self, EventReceiver},
        settings::{Os, RuntimeFamily},
    };
    use httpmock::prelude::*;
    use std::{
        io::{Cursor, Read},
        time::Duration,
    };
    use zip::ZipArchive;

    const TAG: &str = "test-tag";

    fn project() -> ProjectBundle {
        let json = serde_json::json!({
            "targets": [{
                "isStage": true,
                "variables": {"v": ["score", 0]},
                "blocks": {"some-block": {"opcode": "event_whenflagclicked", "topLevel": true}},
                "comments": {}
            }],
            "monitors": []
        });
        ProjectBundle::from_bytes(serde_json::to_vec(&json).unwrap()).unwrap()
    }

    fn context(base_url: &str) -> PackagerContext {
        let mut offline = OfflineAssets::none();
        offline.insert(SCAFFOLDING, format!("/* build-tag: {TAG} */ window.Scaffolding = {{}};"));
        offline.insert(
            "electron-linux64",
            zip_of(&[
                ("electron-v1-linux-x64/electron", b"ELF", 0o755),
                ("electron-v1-linux-x64/resources/default_app.asar", b"asar", 0o644),
            ]),
        );
        PackagerContext::new(
            AssetCatalog::builtin(base_url),
            CacheStore::in_memory(),
            NetClient::with_defaults().unwrap(),
        )
        .unwrap()
        .with_offline(offline)
        .with_build_tag(TAG)
    }

    fn packager(target: Target) -> (Packager, EventReceiver) {
        let (tx, rx) = events::channel();
        let mut packager = Packager::new(context("http://127.0.0.1:9")).with_events(tx);
        let mut options = PackageOptions::default();
        options.app.package_name = "Maze".into();
        options.target = target;
        packager.configure(options).unwrap();
        packager.set_project_bundle(project()).unwrap();
        (packager, rx)
    }

    fn drain(rx: &mut EventReceiver) -> Vec<PackagerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn html_target_inlines_project() {
        let (packager, mut rx) = packager(Target::Html);
        let artifact = packager.run().await.unwrap();

        assert_eq!(artifact.suggested_filename, "Maze.html");
        assert_eq!(artifact.mime_type, "text/html");
        let ArtifactData::Text(document) = &artifact.data else {
            panic!("expected a text document");
        };
        assert!(document.contains("application/x-project-chunk"));
        assert!(document.contains("window.Scaffolding"));
        assert_eq!(packager.state(), PackagerState::Done);

        let events = drain(&mut rx);
        let states: Vec<PackagerState> = events
            .iter()
            .filter_map(|e| match e {
                PackagerEvent::StateChanged { state } => Some(*state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                PackagerState::Validating,
                PackagerState::FetchingResources,
                PackagerState::Composing,
                PackagerState::Done
            ]
        );
        assert!(matches!(events.last(), Some(PackagerEvent::ArtifactReady { .. })));
        let overall: Vec<f64> = events
            .iter()
            .filter_map(|e| match e {
                PackagerEvent::Progress { overall, .. } => Some(*overall),
                _ => None,
            })
            .collect();
        assert!(overall.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn zip_target_ships_document_and_project() {
        let (packager, _rx) = packager(Target::Zip);
        let artifact = packager.run().await.unwrap();
        assert_eq!(artifact.suggested_filename, "Maze.zip");

        let ArtifactData::Bytes(bytes) = artifact.data else {
            panic!("expected an archive");
        };
        let mut zip = ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut document = String::new();
        zip.by_name("index.html").unwrap().read_to_string(&mut document).unwrap();
        assert!(document.contains("project.json"));

        let mut json = Vec::new();
        zip.by_name("project.json").unwrap().read_to_end(&mut json).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert!(json["targets"][0]["blocks"].get("!").is_some());
    }

    #[tokio::test]
    async fn desktop_target_merges_runtime() {
        let (packager, _rx) = packager(Target::Desktop(RuntimeFamily::Electron, Os::Linux));
        let artifact = packager.run().await.unwrap();
        assert_eq!(artifact.suggested_filename, "Maze-electron-linux64.zip");
        assert_eq!(packager.state(), PackagerState::Done);

        let ArtifactData::Bytes(bytes) = artifact.data else {
            panic!("expected an archive");
        };
        let mut zip = ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert!(zip.by_name("Maze/Maze").is_ok());
        assert!(zip.by_name("Maze/resources/app/index.html").is_ok());
        assert!(zip.by_name("Maze/resources/app/project.json").is_ok());
    }

    #[tokio::test]
    async fn fetch_progress_advances_overall_bar() {
        let (packager, mut rx) = packager(Target::Desktop(RuntimeFamily::Electron, Os::Linux));
        packager.run().await.unwrap();

        let events = drain(&mut rx);
        let fetch_overall: Vec<f64> = events
            .iter()
            .filter_map(|e| match e {
                PackagerEvent::Progress { step: Step::FetchAssets, overall, .. } => Some(*overall),
                _ => None,
            })
            .collect();
        assert!(fetch_overall.iter().any(|&o| o > 0.0 && o < 0.4), "{fetch_overall:?}");
        assert!(fetch_overall.windows(2).all(|w| w[0] <= w[1]));
        assert!(events.iter().any(|e| matches!(
            e,
            PackagerEvent::LargeAssetFetch { asset, progress } if asset == "electron-linux64" && *progress == 1.0
        )));
    }

    #[test]
    fn fetch_progress_is_a_forward_only_mean() {
        let mut progress = FetchProgress::new(["scaffolding", "nwjs-win64"]);
        assert_eq!(progress.update("scaffolding", 1.0), Some(0.5));
        assert_eq!(progress.update("nwjs-win64", 0.5), Some(0.75));
        assert_eq!(progress.update("nwjs-win64", 0.1), Some(0.75));
        assert_eq!(progress.update("electron-mac", 1.0), None);
    }

    #[tokio::test]
    async fn second_run_is_rejected() {
        let (mut packager, _rx) = packager(Target::Html);
        packager.run().await.unwrap();
        assert!(matches!(packager.run().await, Err(Error::Reuse)));
        assert!(matches!(
            packager.configure(PackageOptions::default()),
            Err(Error::Reuse)
        ));
    }

    #[tokio::test]
    async fn invalid_options_fail_the_run() {
        let (mut packager, _rx) = packager(Target::Html);
        let mut options = PackageOptions::default();
        options.app.version = "one".into();
        packager.configure(options).unwrap();
        assert!(matches!(packager.run().await, Err(Error::InvalidOptions(_))));
        assert_eq!(packager.state(), PackagerState::Failed);
    }

    #[tokio::test]
    async fn missing_project_is_reported() {
        let mut packager = Packager::new(context("http://127.0.0.1:9"));
        packager.configure(PackageOptions::default()).unwrap();
        assert!(matches!(packager.run().await, Err(Error::InvalidOptions(_))));
    }

    #[tokio::test]
    async fn abort_mid_fetch_rejects_run() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/runtimes/electron-win64.zip");
                then.status(200)
                    .delay(Duration::from_secs(30))
                    .body("never");
            })
            .await;

        let (tx, mut rx) = events::channel();
        let mut packager = Packager::new(context(&server.base_url())).with_events(tx);
        let mut options = PackageOptions::default();
        options.target = Target::Desktop(RuntimeFamily::Electron, Os::Windows);
        packager.configure(options).unwrap();
        packager.set_project_bundle(project()).unwrap();
        let packager = Arc::new(packager);

        let run = tokio::spawn({
            let packager = packager.clone();
            async move { packager.run().await }
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(packager.state(), PackagerState::FetchingResources);
        packager.abort();
        packager.abort();

        let result = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(Error::Aborted)));
        assert_eq!(packager.state(), PackagerState::Aborted);

        let events = drain(&mut rx);
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, PackagerEvent::ArtifactReady { .. }))
        );
        assert!(matches!(
            events.last(),
            Some(PackagerEvent::StateChanged {
                state: PackagerState::Aborted
            })
        ));
    }

    #[tokio::test]
    async fn abort_before_run() {
        let (packager, _rx) = packager(Target::Html);
        packager.abort();
        assert!(matches!(packager.run().await, Err(Error::Aborted)));
        assert_eq!(packager.state(), PackagerState::Aborted);
    }
}
