//! The materialization engine.
//!
//! Runs are spawned as tokio tasks. Each run walks the state machine
//! resolve → fetch → manifest → register, observing one cancellation token
//! at every wait. At most one run per version id is accepted at a time, and
//! runs touching the same package take turns on its directories.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::catalog::{Catalog, CatalogRequest, DownloadKind, GraphQlCatalog, NeededFiles, VersionInfo};
use crate::config::{EngineConfig, UnknownGroupPolicy};
use crate::content::ContentStore;
use crate::error::{EngineError, EngineResult};
use crate::fetch::{BlobTransport, FetchJob, FileFetcher, HttpTransport, RateLimiter};
use crate::host::{ModHost, Registrar, Registration, RegistrationRequest};
use crate::import::ImportReconciler;
use crate::manifest::{write_cover, ManifestBuilder, UiDuplicate};
use crate::package::{
    canonical_dir_name, short_variant_id, slugify, InstallScope, InstalledMod, OptionSelection,
};
use crate::progress::Progress;
use crate::resolver::{DirectoryResolver, Placement};

use super::state::{TaskState, TaskStatus};
use super::types::{MaterializationOutcome, MaterializationRequest, PendingImport};

/// Result of a spawned run. The error is shared with the run's status.
pub type TaskResult = Result<MaterializationOutcome, Arc<EngineError>>;

/// A spawned run.
pub struct TaskHandle {
    status: Arc<TaskStatus>,
    cancel: CancellationToken,
    join: JoinHandle<TaskResult>,
}

impl TaskHandle {
    pub fn status(&self) -> &Arc<TaskStatus> {
        &self.status
    }

    pub fn state(&self) -> TaskState {
        self.status.state()
    }

    /// Ask the run to stop at its next wait.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the run to end.
    pub async fn wait(self) -> TaskResult {
        match self.join.await {
            Ok(result) => result,
            Err(e) => {
                let error = Arc::new(EngineError::Task(e.to_string()));
                self.status.fail(Arc::clone(&error));
                Err(error)
            }
        }
    }
}

/// Entry in the in-progress set, removed on drop.
struct InProgressGuard {
    set: Arc<DashSet<Uuid>>,
    version_id: Uuid,
}

impl InProgressGuard {
    fn acquire(set: &Arc<DashSet<Uuid>>, version_id: Uuid) -> EngineResult<Self> {
        if !set.insert(version_id) {
            return Err(EngineError::AlreadyInProgress(version_id));
        }
        Ok(Self {
            set: Arc::clone(set),
            version_id,
        })
    }
}

impl Drop for InProgressGuard {
    fn drop(&mut self) {
        self.set.remove(&self.version_id);
    }
}

fn ensure_running(cancel: &CancellationToken) -> EngineResult<()> {
    if cancel.is_cancelled() {
        Err(EngineError::Cancelled)
    } else {
        Ok(())
    }
}

/// Downloads and maintains mod directories.
#[derive(Clone)]
pub struct Engine {
    catalog: Arc<dyn Catalog>,
    host: Arc<dyn ModHost>,
    fetcher: FileFetcher,
    config: EngineConfig,
    in_progress: Arc<DashSet<Uuid>>,
    package_locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl Engine {
    /// Engine talking to the configured catalog over HTTP.
    pub fn connect(host: Arc<dyn ModHost>, config: EngineConfig) -> EngineResult<Self> {
        let catalog = GraphQlCatalog::new(&config.catalog_url, config.request_timeout)?;
        let transport = HttpTransport::new(config.request_timeout)?;
        Ok(Self::with_transport(
            Arc::new(catalog),
            host,
            Arc::new(transport),
            config,
        ))
    }

    pub fn with_transport(
        catalog: Arc<dyn Catalog>,
        host: Arc<dyn ModHost>,
        transport: Arc<dyn BlobTransport>,
        config: EngineConfig,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.max_bytes_per_second));
        let fetcher = FileFetcher::new(transport, limiter, config.retry_policy.clone());
        Self {
            catalog,
            host,
            fetcher,
            config,
            in_progress: Arc::new(DashSet::new()),
            package_locks: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The limiter shared by every download of this engine.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        self.fetcher.limiter()
    }

    /// Change the aggregate download cap. 0 means unlimited.
    pub fn set_max_bytes_per_second(&self, rate: u64) {
        self.limiter().set_rate(rate);
    }

    pub fn is_in_progress(&self, version_id: Uuid) -> bool {
        self.in_progress.contains(&version_id)
    }

    /// Managed directories under the default mod root.
    pub fn installed(&self) -> EngineResult<Vec<InstalledMod>> {
        let root = self.default_mod_root()?;
        Ok(DirectoryResolver::new(root).scan()?)
    }

    /// Spawn a run.
    ///
    /// Fails with [`EngineError::AlreadyInProgress`] if the same version is
    /// already running.
    pub fn start(&self, request: MaterializationRequest) -> EngineResult<TaskHandle> {
        self.start_with(request, CancellationToken::new())
    }

    /// Spawn a run observing `cancel`.
    pub fn start_with(&self, request: MaterializationRequest, cancel: CancellationToken) -> EngineResult<TaskHandle> {
        let guard = InProgressGuard::acquire(&self.in_progress, request.identity.version_id)?;
        Ok(self.spawn(request, guard, cancel))
    }

    /// Spawn a run and wait for it.
    pub async fn materialize(&self, request: MaterializationRequest) -> TaskResult {
        self.start(request).map_err(Arc::new)?.wait().await
    }

    fn spawn(&self, request: MaterializationRequest, guard: InProgressGuard, cancel: CancellationToken) -> TaskHandle {
        let status = Arc::new(TaskStatus::new());
        let span = tracing::info_span!(
            "materialize",
            package_id = %request.identity.package_id,
            version_id = %request.identity.version_id
        );

        let engine = self.clone();
        let task_status = Arc::clone(&status);
        let task_cancel = cancel.clone();
        let join = tokio::spawn(
            async move {
                let _guard = guard;
                engine.execute(request, &task_status, &task_cancel).await
            }
            .instrument(span),
        );

        TaskHandle { status, cancel, join }
    }

    async fn execute(&self, request: MaterializationRequest, status: &TaskStatus, cancel: &CancellationToken) -> TaskResult {
        match self.run(&request, status, cancel).await {
            Ok(outcome) => {
                status.finish();
                Ok(outcome)
            }
            Err(e) if e.is_cancelled() || cancel.is_cancelled() => {
                status.cancel();
                Err(Arc::new(EngineError::Cancelled))
            }
            Err(e) => {
                if e.is_missing_entity() {
                    tracing::info!(error = %e, "Requested entity no longer exists");
                }
                let error = Arc::new(e);
                status.fail(Arc::clone(&error));
                Err(error)
            }
        }
    }

    async fn run(
        &self,
        request: &MaterializationRequest,
        status: &TaskStatus,
        cancel: &CancellationToken,
    ) -> EngineResult<MaterializationOutcome> {
        let identity = request.identity;
        ensure_running(cancel)?;
        status.enter(TaskState::ResolvingMetadata, 0);

        let _directory_guard = self.lock_package(identity.package_id, cancel).await?;

        let mod_root = self.mod_root(request)?;
        let resolver = DirectoryResolver::new(&mod_root);
        let builder = self.manifest_builder();
        let registrar = request.register_with_host.then(|| self.registrar());

        let migrations = resolver
            .migrate_legacy(
                Some(identity.package_id),
                self.catalog.as_ref(),
                registrar.as_ref(),
                |variant| builder.display_name_for_variant(variant),
            )
            .await?;
        for migration in &migrations {
            for warning in &migration.warnings {
                status.warn(warning.to_string());
            }
        }
        ensure_running(cancel)?;

        let kind = if resolver
            .find_existing(identity.package_id)?
            .iter()
            .any(|m| m.variant_id == identity.variant_id)
        {
            DownloadKind::Update
        } else {
            DownloadKind::Install
        };
        let info = self.fetch_version(request, kind, cancel).await?;
        let (selection, unknown_groups) = self.resolve_selection(&request.scope, &info)?;
        for group in &unknown_groups {
            status.warn(format!("selection references unknown group {}", group));
        }
        let needed = info.needed_files.for_selection(&info.groups, &selection);
        let pack = builder.build(&info, &selection, request.include_tags)?;
        let dir_name = pack.sidecar.canonical_dir_name();

        let resolved = resolver.locate(info.package.id, info.variant.id, &dir_name)?;
        let registration = match (&request.adopt_from, &resolved.placement) {
            (Some(old), _) => Registration::Renamed {
                old_dir_name: old.clone(),
            },
            (None, Placement::Fresh) => Registration::Fresh,
            (None, Placement::Reinstall(_)) => Registration::Reinstall,
            (None, Placement::Rename(existing)) => Registration::Renamed {
                old_dir_name: existing.dir_name.clone(),
            },
        };
        ensure_running(cancel)?;
        resolver.apply(&resolved)?;

        let store = ContentStore::new(&resolved.path);
        store.ensure_root()?;
        let jobs = fetch_jobs(&info, &needed);
        status.enter(TaskState::FetchingFiles, jobs.len() as u32);
        let fetch = self
            .fetcher
            .fetch_all(
                &needed.base_uri,
                jobs,
                info.batch_table(),
                &store,
                self.config.download_concurrency,
                status.progress(),
                cancel,
            )
            .await?;
        ensure_running(cancel)?;
        let pruned = store.prune(&needed.hashes())?.removed.len();
        let ui_copies = link_ui_duplicates(&store, &pack.ui_duplicates)?;

        status.enter(TaskState::BuildingManifest, pack.file_count() + 1);
        pack.write(&resolved.path, &status.progress())?;
        self.write_cover(&info, &resolved.path, status, cancel).await;
        status.progress().advance();

        let mut host_warnings = Vec::new();
        if let Some(registrar) = &registrar {
            ensure_running(cancel)?;
            status.enter(TaskState::RegisteringWithHost, 0);
            let display_name = builder.display_name(&info);
            host_warnings = registrar.register(&RegistrationRequest {
                dir_name: &dir_name,
                display_name: &display_name,
                registration,
                collection: request.collection,
            });
            for warning in &host_warnings {
                status.warn(warning.to_string());
            }
        }

        tracing::info!(
            dir = %dir_name,
            downloaded = fetch.downloaded,
            reused = fetch.reused,
            pruned,
            ui_copies,
            "Materialization finished"
        );

        Ok(MaterializationOutcome {
            identity,
            dir_name,
            path: resolved.path,
            full_install: pack.sidecar.full_install,
            fetch,
            pruned,
            unknown_groups,
            host_warnings,
            migrations,
            access_code: request.access_code.clone(),
        })
    }

    /// Hash an unmanaged directory against what `request` needs.
    ///
    /// Nothing is modified. Show [`PendingImport::diff`] to the user before
    /// calling [`commit_import`](Self::commit_import).
    pub async fn prepare_import(
        &self,
        source: impl Into<PathBuf>,
        mut request: MaterializationRequest,
        progress: Arc<Progress>,
        cancel: &CancellationToken,
    ) -> EngineResult<PendingImport> {
        let source = source.into();
        let info = self.fetch_version(&request, DownloadKind::Install, cancel).await?;
        let (selection, _) = self.resolve_selection(&request.scope, &info)?;
        let needed = info.needed_files.for_selection(&info.groups, &selection);

        let plan = self
            .importer()
            .prepare(&source, &needed, progress, cancel)
            .await?;

        let dir_name = canonical_dir_name(
            info.package.id,
            &short_variant_id(&info.variant.id),
            &slugify(&info.package.name),
            &info.version,
        );
        if request.mod_root.is_none() {
            request.mod_root = source.parent().map(Path::to_path_buf);
        }
        request.adopt_from = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());

        Ok(PendingImport {
            plan,
            dir_name,
            request,
        })
    }

    /// Commit a confirmed import and spawn the run that completes it.
    pub async fn commit_import(&self, pending: PendingImport, cancel: CancellationToken) -> EngineResult<TaskHandle> {
        let guard = InProgressGuard::acquire(&self.in_progress, pending.request.identity.version_id)?;
        let directory_guard = self
            .lock_package(pending.request.identity.package_id, &cancel)
            .await?;
        let importer = self.importer();
        let PendingImport {
            plan,
            dir_name,
            request,
        } = pending;

        let report = tokio::task::spawn_blocking(move || importer.commit(&plan, &dir_name, &Progress::new()))
            .await
            .map_err(|e| EngineError::Task(e.to_string()))??;
        tracing::info!(dir = %report.path.display(), adopted = report.adopted, "Import committed");

        // The spawned run takes the lock again for its own directory work.
        drop(directory_guard);
        Ok(self.spawn(request, guard, cancel))
    }

    /// Wait for exclusive use of a package's directories.
    async fn lock_package(&self, package_id: Uuid, cancel: &CancellationToken) -> EngineResult<OwnedMutexGuard<()>> {
        let lock = self.package_locks.entry(package_id).or_default().clone();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            guard = lock.lock_owned() => Ok(guard),
        }
    }

    async fn fetch_version(
        &self,
        request: &MaterializationRequest,
        kind: DownloadKind,
        cancel: &CancellationToken,
    ) -> EngineResult<VersionInfo> {
        let (selection, full) = match &request.scope {
            InstallScope::Full => (OptionSelection::new(), true),
            InstallScope::Partial(selection) => (selection.clone(), false),
        };
        let catalog_request = CatalogRequest {
            version_id: request.identity.version_id,
            selection,
            full,
            access_code: request.access_code.clone(),
            kind,
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            info = self.catalog.version(&catalog_request) => Ok(info?),
        }
    }

    /// Selection frozen for the rest of the run, plus dropped unknown groups.
    fn resolve_selection(&self, scope: &InstallScope, info: &VersionInfo) -> EngineResult<(OptionSelection, Vec<String>)> {
        let mut selection = match scope {
            InstallScope::Full => return Ok((OptionSelection::full(&info.groups), Vec::new())),
            InstallScope::Partial(selection) => selection.clone(),
        };

        let unknown = selection.unknown_groups(&info.groups);
        if unknown.is_empty() {
            return Ok((selection, unknown));
        }
        match self.config.unknown_group_policy {
            UnknownGroupPolicy::Reject => return Err(EngineError::StaleSelection { groups: unknown }),
            UnknownGroupPolicy::Warn => {
                for group in &unknown {
                    tracing::warn!(group = %group, "Selection references unknown group");
                }
            }
            UnknownGroupPolicy::Ignore => {}
        }
        let dropped = selection.retain_known(&info.groups);
        Ok((selection, dropped))
    }

    async fn write_cover(&self, info: &VersionInfo, dir: &Path, status: &TaskStatus, cancel: &CancellationToken) {
        let image = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            image = self.catalog.cover_image(&info.package) => image,
        };
        let result = match image {
            Ok(Some(bytes)) => write_cover(dir, &bytes).map_err(|e| e.to_string()),
            Ok(None) => Ok(()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(reason) = result {
            tracing::warn!(error = %reason, "Failed to save cover image");
            status.warn(format!("cover image: {}", reason));
        }
    }

    fn mod_root(&self, request: &MaterializationRequest) -> EngineResult<PathBuf> {
        match &request.mod_root {
            Some(root) => Ok(root.clone()),
            None => self.default_mod_root(),
        }
    }

    fn default_mod_root(&self) -> EngineResult<PathBuf> {
        match &self.config.mod_root_override {
            Some(root) => Ok(root.clone()),
            None => Ok(self.host.mod_root()?),
        }
    }

    fn manifest_builder(&self) -> ManifestBuilder {
        ManifestBuilder::new()
            .with_title_prefix(self.config.title_prefix.clone())
            .with_hide_default_variant(self.config.hide_default_variant)
    }

    fn registrar(&self) -> Registrar {
        Registrar::new(Arc::clone(&self.host))
            .with_folder(self.config.host_folder.clone())
            .with_replace_sort_name(self.config.replace_sort_name)
    }

    fn importer(&self) -> ImportReconciler {
        ImportReconciler::new(self.config.hash_concurrency)
    }
}

/// Create the numbered UI copies the descriptors point at and drop any left
/// from an earlier selection.
fn link_ui_duplicates(store: &ContentStore, duplicates: &[UiDuplicate]) -> EngineResult<usize> {
    let mut keep = HashSet::new();
    for duplicate in duplicates {
        for index in 1..=duplicate.copies {
            store.link_duplicate(&duplicate.hash, &duplicate.extension, index)?;
            keep.insert(ContentStore::duplicate_name(&duplicate.hash, &duplicate.extension, index));
        }
    }
    let removed = store.remove_stale_duplicates(&keep)?;
    if removed > 0 {
        tracing::debug!(removed, "Removed stale UI copies");
    }
    Ok(keep.len())
}

fn fetch_jobs(info: &VersionInfo, needed: &NeededFiles) -> Vec<FetchJob> {
    needed
        .files
        .keys()
        .map(|hash| {
            FetchJob::new(hash.clone(), needed.extensions_for(hash))
                .with_expected_size(info.uncompressed_size(hash))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_support::{single_group, version_info, MockCatalog};
    use crate::catalog::FileDestination;
    use crate::content::hash_bytes;
    use crate::fetch::join_url;
    use crate::fetch::transport::tests::MockTransport;
    use crate::host::tests::RecordingHost;
    use crate::manifest::META_FILE;
    use crate::package::{ModManifest, PackageIdentity};
    use tempfile::TempDir;

    const BASE: &str = "https://cdn.example/files/v3";

    struct Fixture {
        _temp: TempDir,
        root: PathBuf,
        engine: Engine,
        host: Arc<RecordingHost>,
        transport: Arc<MockTransport>,
        hashes: Vec<String>,
    }

    fn identity() -> PackageIdentity {
        PackageIdentity::new(Uuid::from_u128(1), Uuid::from_u128(2), Uuid::from_u128(3))
    }

    fn fixture(config: EngineConfig, game_path: &str) -> Fixture {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("mods");
        let blobs: [&[u8]; 3] = [b"hat model", b"red texture", b"blue texture"];
        let hashes: Vec<String> = blobs.iter().map(|b| hash_bytes(b)).collect();

        let needed = NeededFiles {
            base_uri: BASE.to_string(),
            files: [
                (hashes[0].clone(), vec![FileDestination::default_file(game_path)]),
                (
                    hashes[1].clone(),
                    vec![FileDestination::new(Some("Color"), Some("Red"), "chara/hat_red.tex")],
                ),
                (
                    hashes[2].clone(),
                    vec![FileDestination::new(Some("Color"), Some("Blue"), "chara/hat_blue.tex")],
                ),
            ]
            .into_iter()
            .collect(),
        }
        .normalized();
        let info = version_info(vec![single_group("Color", 0, &["Red", "Blue"])], needed);

        let mut transport = MockTransport::default();
        for (hash, blob) in hashes.iter().zip(blobs) {
            transport = transport.with_body(&join_url(BASE, hash), zstd::encode_all(blob, 3).unwrap());
        }
        let transport = Arc::new(transport);
        let host = Arc::new(RecordingHost::new(&root));
        let engine = Engine::with_transport(
            Arc::new(MockCatalog::default().with_version(info)),
            host.clone(),
            transport.clone(),
            config,
        );

        Fixture {
            _temp: temp,
            root,
            engine,
            host,
            transport,
            hashes,
        }
    }

    fn config() -> EngineConfig {
        EngineConfig::new().with_download_concurrency(2)
    }

    #[tokio::test]
    async fn test_full_install() {
        let fx = fixture(config(), "chara/hat.mdl");
        let outcome = fx
            .engine
            .materialize(MaterializationRequest::new(identity(), InstallScope::Full))
            .await
            .unwrap();

        assert!(outcome.full_install);
        assert_eq!(outcome.fetch.downloaded, 3);
        assert_eq!(outcome.path, fx.root.join(&outcome.dir_name));

        let store = ContentStore::new(&outcome.path);
        assert!(store.has(&fx.hashes[0], "mdl", None));
        assert!(store.has(&fx.hashes[1], "tex", None));
        assert!(store.has(&fx.hashes[2], "tex", None));
        assert!(outcome.path.join(META_FILE).is_file());

        let sidecar = ModManifest::load(&outcome.path).unwrap().unwrap();
        assert!(sidecar.full_install);
        assert_eq!(sidecar.version_id, identity().version_id);

        let calls = fx.host.calls();
        assert!(calls.contains(&format!("add_mod:{}", outcome.dir_name)));
        assert!(!fx.engine.is_in_progress(identity().version_id));
    }

    #[tokio::test]
    async fn test_partial_install_skips_unselected_files() {
        let fx = fixture(config(), "chara/hat.mdl");
        let selection = OptionSelection::new().with("Color", "Red");
        let request = MaterializationRequest::new(identity(), InstallScope::Partial(selection))
            .with_register_with_host(false);

        let outcome = fx.engine.materialize(request).await.unwrap();
        assert!(!outcome.full_install);
        assert_eq!(outcome.fetch.downloaded, 2);

        let store = ContentStore::new(&outcome.path);
        assert!(!store.has(&fx.hashes[2], "tex", None));
        assert!(fx.host.calls().is_empty());
    }

    #[tokio::test]
    async fn test_second_run_downloads_nothing() {
        let fx = fixture(config(), "chara/hat.mdl");
        let request = MaterializationRequest::new(identity(), InstallScope::Full);

        fx.engine.materialize(request.clone()).await.unwrap();
        let calls = fx.transport.calls.load(std::sync::atomic::Ordering::SeqCst);

        let again = fx.engine.materialize(request).await.unwrap();
        assert_eq!(again.fetch.downloaded, 0);
        assert_eq!(again.fetch.reused, 3);
        assert_eq!(fx.transport.calls.load(std::sync::atomic::Ordering::SeqCst), calls);
        assert!(fx
            .host
            .calls()
            .contains(&format!("reload_mod:{}", again.dir_name)));
    }

    #[tokio::test]
    async fn test_duplicate_version_rejected() {
        let fx = fixture(config(), "chara/hat.mdl");
        let request = MaterializationRequest::new(identity(), InstallScope::Full);

        let first = fx.engine.start(request.clone()).unwrap();
        match fx.engine.start(request.clone()) {
            Err(EngineError::AlreadyInProgress(id)) => assert_eq!(id, identity().version_id),
            other => panic!("expected AlreadyInProgress, got {:?}", other.map(|h| h.state())),
        }
        first.wait().await.unwrap();

        // The slot is released once the run ends.
        fx.engine.start(request).unwrap().wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_run() {
        let fx = fixture(config(), "chara/hat.mdl");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let handle = fx
            .engine
            .start_with(MaterializationRequest::new(identity(), InstallScope::Full), cancel)
            .unwrap();
        let status = Arc::clone(handle.status());
        let result = handle.wait().await;

        assert!(matches!(result, Err(ref e) if e.is_cancelled()));
        assert_eq!(status.state(), TaskState::Cancelled);
        assert!(status.error().is_none());
        assert_eq!(fx.transport.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reject_unknown_groups() {
        let fx = fixture(
            config().with_unknown_group_policy(UnknownGroupPolicy::Reject),
            "chara/hat.mdl",
        );
        let selection = OptionSelection::new().with("Colour", "Red");
        let handle = fx
            .engine
            .start(MaterializationRequest::new(identity(), InstallScope::Partial(selection)))
            .unwrap();
        let status = Arc::clone(handle.status());

        let err = handle.wait().await.unwrap_err();
        assert!(matches!(&*err, EngineError::StaleSelection { groups } if groups == &vec!["Colour".to_string()]));
        assert_eq!(status.state(), TaskState::Errored);
    }

    #[tokio::test]
    async fn test_warn_unknown_groups_reported() {
        let fx = fixture(config(), "chara/hat.mdl");
        let selection = OptionSelection::new().with("Color", "Blue").with("Colour", "Red");
        let outcome = fx
            .engine
            .materialize(MaterializationRequest::new(identity(), InstallScope::Partial(selection)))
            .await
            .unwrap();
        assert_eq!(outcome.unknown_groups, vec!["Colour".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_version() {
        let fx = fixture(config(), "chara/hat.mdl");
        let missing = PackageIdentity::new(Uuid::from_u128(1), Uuid::from_u128(2), Uuid::from_u128(99));
        let err = fx
            .engine
            .materialize(MaterializationRequest::new(missing, InstallScope::Full))
            .await
            .unwrap_err();
        assert!(err.is_missing_entity());
    }

    #[tokio::test]
    async fn test_path_escape_fails_before_download() {
        let fx = fixture(config(), "../../outside.mdl");
        let err = fx
            .engine
            .materialize(MaterializationRequest::new(identity(), InstallScope::Full))
            .await
            .unwrap_err();
        assert!(matches!(&*err, EngineError::PathEscape(_)));
        assert_eq!(fx.transport.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_host_failures_are_warnings() {
        let temp = TempDir::new().unwrap();
        let fx = fixture(config().with_mod_root(temp.path()), "chara/hat.mdl");
        let failing = Arc::new(RecordingHost::new(temp.path()).failing("add_mod"));
        let engine = Engine {
            host: failing.clone(),
            ..fx.engine.clone()
        };

        let outcome = engine
            .materialize(MaterializationRequest::new(identity(), InstallScope::Full))
            .await
            .unwrap();
        assert_eq!(outcome.host_warnings.len(), 1);
        assert_eq!(outcome.host_warnings[0].operation, "add_mod");
        assert!(outcome.path.starts_with(temp.path()));
    }

    #[tokio::test]
    async fn test_shared_ui_file_linked_per_option() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("mods");
        let icon = b"icon pixels";
        let hash = hash_bytes(icon);
        let needed = NeededFiles {
            base_uri: BASE.to_string(),
            files: [(
                hash.clone(),
                vec![
                    FileDestination::new(Some("Color"), Some("Red"), "ui/icon/red.tex"),
                    FileDestination::new(Some("Color"), Some("Blue"), "ui/icon/blue.tex"),
                ],
            )]
            .into_iter()
            .collect(),
        }
        .normalized();
        let info = version_info(vec![single_group("Color", 0, &["Red", "Blue"])], needed);
        let transport = Arc::new(
            MockTransport::default().with_body(&join_url(BASE, &hash), zstd::encode_all(&icon[..], 3).unwrap()),
        );
        let engine = Engine::with_transport(
            Arc::new(MockCatalog::default().with_version(info)),
            Arc::new(RecordingHost::new(&root)),
            transport,
            config(),
        );

        let outcome = engine
            .materialize(MaterializationRequest::new(identity(), InstallScope::Full).with_register_with_host(false))
            .await
            .unwrap();
        let store = ContentStore::new(&outcome.path);
        let stored = store.path_for(&hash, "tex").unwrap();
        let first = store.root().join(ContentStore::duplicate_name(&hash, "tex", 1));
        let second = store.root().join(ContentStore::duplicate_name(&hash, "tex", 2));
        assert!(crate::content::fs::same_file(&stored, &first));
        assert!(crate::content::fs::same_file(&stored, &second));

        // Narrowing the selection drops the copies again.
        let request = MaterializationRequest::new(
            identity(),
            InstallScope::Partial(OptionSelection::new().with("Color", "Red")),
        )
        .with_register_with_host(false);
        let outcome = engine.materialize(request).await.unwrap();
        assert_eq!(outcome.fetch.downloaded, 0);
        assert!(store.has(&hash, "tex", None));
        assert!(!first.exists());
        assert!(!second.exists());
    }

    #[tokio::test]
    async fn test_import_commit_waits_for_package_lock() {
        let fx = fixture(config(), "chara/hat.mdl");
        let source = fx.root.join("Hat (manual)");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("hat.mdl"), b"hat model").unwrap();
        std::fs::write(source.join("readme.txt"), b"thanks").unwrap();

        let request = MaterializationRequest::new(identity(), InstallScope::Full);
        let no_cancel = CancellationToken::new();
        let pending = fx
            .engine
            .prepare_import(&source, request.clone(), Arc::new(Progress::new()), &no_cancel)
            .await
            .unwrap();
        assert_eq!(pending.diff().have, 1);

        // Another run owns the package's directories.
        let held = fx
            .engine
            .package_locks
            .entry(identity().package_id)
            .or_default()
            .clone()
            .lock_owned()
            .await;

        let cancel = CancellationToken::new();
        let engine = fx.engine.clone();
        let waiting = tokio::spawn({
            let cancel = cancel.clone();
            async move { engine.commit_import(pending, cancel).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!waiting.is_finished());
        assert!(source.join("readme.txt").is_file());

        cancel.cancel();
        let err = waiting.await.unwrap().err().unwrap();
        assert!(err.is_cancelled());
        assert!(source.join("readme.txt").is_file());
        assert!(!fx.engine.is_in_progress(identity().version_id));

        // Once the lock is free the commit goes through.
        let pending = fx
            .engine
            .prepare_import(&source, request, Arc::new(Progress::new()), &no_cancel)
            .await
            .unwrap();
        let engine = fx.engine.clone();
        let committing =
            tokio::spawn(async move { engine.commit_import(pending, CancellationToken::new()).await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        drop(held);

        let outcome = committing.await.unwrap().unwrap().wait().await.unwrap();
        assert!(!source.exists());
        assert_eq!(outcome.fetch.reused, 1);
        assert_eq!(outcome.fetch.downloaded, 2);
    }
}
