use super::*;
use crate::archive::{ArchiveDecoder, ArchiveFormat, Listing, ListingStyle};
use crate::error::ErrorKind;
use crate::progress::{Silent, TransferResult};
use crate::source::{DownloadOptions, GitAuth, GitRef, GitSource};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

type SideEffect = Box<dyn Fn() + Send + Sync>;

/// Serves a fixed body in 64 KiB chunks
struct FakeTransport {
    body: Vec<u8>,
    accessible: bool,
    downloads: AtomicUsize,
    side_effect: Option<SideEffect>,
}

impl FakeTransport {
    fn serving(body: Vec<u8>) -> Self {
        Self {
            body,
            accessible: true,
            downloads: AtomicUsize::new(0),
            side_effect: None,
        }
    }

    fn inaccessible() -> Self {
        Self {
            accessible: false,
            ..Self::serving(Vec::new())
        }
    }

    fn with_side_effect(mut self, effect: impl Fn() + Send + Sync + 'static) -> Self {
        self.side_effect = Some(Box::new(effect));
        self
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn download(
        &self,
        _url: &Url,
        _options: &DownloadOptions,
        dest: &Path,
        monitor: &Monitor<'_>,
    ) -> Result<TransferResult> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if let Some(effect) = &self.side_effect {
            effect();
        }
        let total = self.body.len() as u64;
        let mut written = Vec::new();
        for chunk in self.body.chunks(64 * 1024) {
            written.extend_from_slice(chunk);
            std::fs::write(dest, &written).unwrap();
            if !monitor.tick(written.len() as u64, Some(total)) {
                return Err(AcquireError::Cancelled("download cancelled".to_string()));
            }
        }
        std::fs::write(dest, &written).unwrap();
        Ok(TransferResult::new(total))
    }

    async fn is_accessible(&self, _url: &Url, _options: &DownloadOptions) -> bool {
        self.accessible
    }

    async fn remote_size(&self, _url: &Url, _options: &DownloadOptions) -> Option<u64> {
        Some(self.body.len() as u64)
    }
}

/// Extracts a fixed set of `(path, contents)` entries; paths ending in `/` are directories
struct FakeDecoder {
    entries: Vec<(&'static str, &'static str)>,
    valid: bool,
}

impl FakeDecoder {
    fn with_entries(entries: Vec<(&'static str, &'static str)>) -> Self {
        Self {
            entries,
            valid: true,
        }
    }

    fn corrupt() -> Self {
        Self {
            entries: Vec::new(),
            valid: false,
        }
    }
}

#[async_trait]
impl ArchiveDecoder for FakeDecoder {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn supports(&self, _format: ArchiveFormat) -> bool {
        true
    }

    async fn test(&self, _archive: &Path, _format: ArchiveFormat) -> bool {
        self.valid
    }

    async fn list(&self, _archive: &Path, _format: ArchiveFormat) -> Result<Listing> {
        let names: Vec<&str> = self.entries.iter().map(|(name, _)| *name).collect();
        Ok(Listing::new(names.join("\n"), ListingStyle::PerLine))
    }

    async fn extract(&self, _archive: &Path, _format: ArchiveFormat, dest: &Path) -> Result<()> {
        write_entries(dest, &self.entries);
        Ok(())
    }
}

/// Records every call; clones write a fixed tree including `.git`
struct FakeVcs {
    entries: Vec<(&'static str, &'static str)>,
    fail_clone: bool,
    fail_init: bool,
    calls: Mutex<Vec<String>>,
}

impl FakeVcs {
    fn with_entries(entries: Vec<(&'static str, &'static str)>) -> Self {
        Self {
            entries,
            fail_clone: false,
            fail_init: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn checkout(&self, source: &GitSource, dest: &Path) -> Result<TransferResult> {
        if self.fail_clone {
            return Err(AcquireError::CloneFailure(
                "Authentication failed".to_string(),
            ));
        }
        std::fs::create_dir_all(dest.join(".git/refs")).unwrap();
        std::fs::write(dest.join(".git/HEAD"), format!("{:?}", source.reference)).unwrap();
        write_entries(dest, &self.entries);
        Ok(TransferResult::new(self.entries.len() as u64))
    }
}

#[async_trait]
impl VersionControlClient for FakeVcs {
    async fn clone_repository(
        &self,
        source: &GitSource,
        dest: &Path,
        _monitor: &Monitor<'_>,
    ) -> Result<TransferResult> {
        self.record(format!(
            "clone {} shallow={} {:?}",
            source.url, source.shallow, source.reference
        ));
        self.checkout(source, dest)
    }

    async fn clone_with_auth(
        &self,
        source: &GitSource,
        auth: &GitAuth,
        dest: &Path,
        _monitor: &Monitor<'_>,
    ) -> Result<TransferResult> {
        let kind = match auth {
            GitAuth::Credentials { .. } => "credentials",
            GitAuth::SshKey { .. } => "ssh-key",
        };
        self.record(format!("clone_with_auth {} {}", source.url, kind));
        self.checkout(source, dest)
    }

    async fn strip_metadata(&self, dir: &Path) -> anyhow::Result<()> {
        self.record("strip".to_string());
        crate::vcs::remove_metadata(dir).await
    }

    async fn init_repository(&self, dir: &Path) -> anyhow::Result<()> {
        self.record("init".to_string());
        if self.fail_init {
            anyhow::bail!("git init failed: permission denied");
        }
        std::fs::create_dir_all(dir.join(".git"))?;
        Ok(())
    }

    async fn configure_identity(
        &self,
        _dir: &Path,
        name: Option<&str>,
        email: Option<&str>,
    ) -> anyhow::Result<()> {
        self.record(format!("identity {:?} {:?}", name, email));
        Ok(())
    }

    async fn add_remote(&self, _dir: &Path, name: &str, url: &str) -> anyhow::Result<()> {
        self.record(format!("remote {} {}", name, url));
        Ok(())
    }
}

/// Records stages and counts progress calls; optionally declines from the first call
#[derive(Default)]
struct RecordingSink {
    stages: Mutex<Vec<Stage>>,
    progress_calls: AtomicUsize,
    decline: bool,
}

impl RecordingSink {
    fn declining() -> Self {
        Self {
            decline: true,
            ..Self::default()
        }
    }

    fn stages(&self) -> Vec<Stage> {
        self.stages.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingSink {
    fn on_progress(&self, _current: u64, _total: Option<u64>) -> bool {
        self.progress_calls.fetch_add(1, Ordering::SeqCst);
        !self.decline
    }

    fn on_stage(&self, stage: Stage) {
        self.stages.lock().unwrap().push(stage);
    }
}

struct RecordingHook {
    seen: Mutex<Vec<PathBuf>>,
    fail: bool,
}

#[async_trait]
impl PopulateHook for RecordingHook {
    async fn populate(
        &self,
        project: &Materialized,
        _request: &AcquireRequest,
    ) -> anyhow::Result<()> {
        self.seen.lock().unwrap().push(project.project_root.clone());
        if self.fail {
            anyhow::bail!("template text unavailable");
        }
        std::fs::write(project.project_root.join("README.md"), "# generated\n")?;
        Ok(())
    }
}

fn write_entries(dest: &Path, entries: &[(&str, &str)]) {
    for (name, contents) in entries {
        let path = dest.join(name);
        if name.ends_with('/') {
            std::fs::create_dir_all(&path).unwrap();
        } else {
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, contents).unwrap();
        }
    }
}

fn template_entries() -> Vec<(&'static str, &'static str)> {
    vec![
        ("template/", ""),
        ("template/CMakeLists.txt", "project(template LANGUAGES CXX)\n"),
        ("template/src/", ""),
        ("template/src/main.cpp", "int main() { return 0; }\n"),
    ]
}

/// Temporary workspace: `out/` holds destinations, `staging/` holds staging areas
struct Workspace {
    dir: tempfile::TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("out")).unwrap();
        Self { dir }
    }

    fn destination(&self, name: &str) -> Destination {
        Destination::new(self.dir.path().join("out").join(name))
    }

    fn staging_parent(&self) -> PathBuf {
        self.dir.path().join("staging")
    }

    fn config(&self) -> AcquireConfig {
        AcquireConfig::default()
            .with_staging_parent(self.staging_parent())
            .with_poll_interval(Duration::from_millis(10))
    }

    /// No staging area is left behind (the parent may not even exist)
    fn staging_is_clean(&self) -> bool {
        match std::fs::read_dir(self.staging_parent()) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => true,
        }
    }

    fn archive_pipeline(&self, transport: Arc<FakeTransport>, decoder: FakeDecoder) -> AcquisitionPipeline {
        let codec = ArchiveCodec::new(Duration::from_millis(10)).with_decoder(Arc::new(decoder));
        AcquisitionPipeline::with_components(codec, transport, None, self.config())
    }

    fn git_pipeline(&self, vcs: Arc<FakeVcs>) -> AcquisitionPipeline {
        AcquisitionPipeline::with_components(
            ArchiveCodec::new(Duration::from_millis(10)),
            Arc::new(FakeTransport::serving(Vec::new())),
            Some(vcs),
            self.config(),
        )
    }
}

const TEMPLATE_URL: &str = "https://example.com/releases/template.tar.gz";

#[tokio::test]
async fn test_remote_archive_is_unwrapped_into_destination() {
    let ws = Workspace::new();
    let transport = Arc::new(FakeTransport::serving(vec![1u8; 1024]));
    let pipeline = ws.archive_pipeline(transport.clone(), FakeDecoder::with_entries(template_entries()));
    let destination = ws.destination("my-app");
    let request = AcquireRequest::new(SourceSpec::remote_archive(TEMPLATE_URL), destination.clone());
    let sink = RecordingSink::default();

    assert!(!destination.exists());
    let done = pipeline
        .run(&request, &sink, &CancellationToken::new())
        .await
        .unwrap();

    let root = destination.final_path();
    assert_eq!(done.project_root, root);
    assert!(root.join("CMakeLists.txt").is_file());
    assert!(root.join("src/main.cpp").is_file());
    assert!(!root.join("template").exists());
    assert_eq!(done.units, 2);
    assert!(done.warnings.is_empty());
    assert_eq!(transport.downloads.load(Ordering::SeqCst), 1);
    assert!(ws.staging_is_clean());

    let stages = sink.stages();
    assert_eq!(
        stages,
        vec![
            Stage::ValidatingSource,
            Stage::Acquiring,
            Stage::Verifying,
            Stage::Staged,
            Stage::RootLocated,
            Stage::StructureValidated,
            Stage::Relocated,
            Stage::PostProcessed,
            Stage::Done,
            Stage::CleaningUp,
        ]
    );
}

#[tokio::test]
async fn test_local_archive_is_materialized() {
    let ws = Workspace::new();
    let archive = ws.dir.path().join("starter.zip");
    std::fs::write(&archive, b"PK").unwrap();
    let transport = Arc::new(FakeTransport::serving(Vec::new()));
    let pipeline = ws.archive_pipeline(transport.clone(), FakeDecoder::with_entries(template_entries()));
    let destination = ws.destination("local-app");

    pipeline
        .run(
            &AcquireRequest::new(SourceSpec::local_archive(&archive), destination.clone()),
            &Silent,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(destination.final_path().join("src/main.cpp").is_file());
    assert_eq!(transport.downloads.load(Ordering::SeqCst), 0);
    // Local archives are never consumed
    assert!(archive.is_file());
    assert!(ws.staging_is_clean());
}

#[tokio::test]
async fn test_shallow_branch_clone_has_no_metadata() {
    let ws = Workspace::new();
    let vcs = Arc::new(FakeVcs::with_entries(vec![
        ("CMakeLists.txt", "project(upstream)\n"),
        ("src/main.cpp", ""),
    ]));
    let pipeline = ws.git_pipeline(vcs.clone());
    let destination = ws.destination("from-git");
    let source = GitSource::new("https://github.com/user/repo.git")
        .shallow(true)
        .reference(GitRef::Branch("develop".to_string()));

    let done = pipeline
        .run(
            &AcquireRequest::new(SourceSpec::git(source), destination.clone()),
            &Silent,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(destination.final_path().join("CMakeLists.txt").is_file());
    assert!(!destination.final_path().join(".git").exists());
    assert!(done.warnings.is_empty());
    assert_eq!(
        vcs.calls(),
        vec![
            "clone https://github.com/user/repo.git shallow=true Branch(\"develop\")".to_string(),
            "strip".to_string(),
        ]
    );
    assert!(ws.staging_is_clean());
}

#[tokio::test]
async fn test_preserved_history_keeps_metadata_and_skips_init() {
    let ws = Workspace::new();
    let vcs = Arc::new(FakeVcs::with_entries(vec![("main.cc", "")]));
    let pipeline = ws.git_pipeline(vcs.clone());
    let destination = ws.destination("with-history");
    let request = AcquireRequest::new(
        SourceSpec::git(GitSource::new("git@github.com:user/repo.git")),
        destination.clone(),
    )
    .with_post_process(PostProcessOptions {
        preserve_history: true,
        init_repository: true,
        ..Default::default()
    });

    pipeline
        .run(&request, &Silent, &CancellationToken::new())
        .await
        .unwrap();

    assert!(destination.final_path().join(".git/HEAD").is_file());
    assert_eq!(vcs.calls().len(), 1);
}

#[tokio::test]
async fn test_preserved_history_keeps_clone_root_over_child_project() {
    let ws = Workspace::new();
    let vcs = Arc::new(FakeVcs::with_entries(vec![
        ("README.md", "# monorepo\n"),
        ("engine/CMakeLists.txt", "project(engine)\n"),
        ("engine/src/main.cpp", ""),
    ]));
    let pipeline = ws.git_pipeline(vcs);
    let destination = ws.destination("monorepo");
    let request = AcquireRequest::new(
        SourceSpec::git(GitSource::new("https://github.com/user/monorepo.git")),
        destination.clone(),
    )
    .with_post_process(PostProcessOptions {
        preserve_history: true,
        ..Default::default()
    });

    pipeline
        .run(&request, &Silent, &CancellationToken::new())
        .await
        .unwrap();

    let root = destination.final_path();
    assert!(root.join(".git/HEAD").is_file());
    assert!(root.join("README.md").is_file());
    assert!(root.join("engine/CMakeLists.txt").is_file());
    assert!(ws.staging_is_clean());
}

#[tokio::test]
async fn test_clone_with_root_sources_is_kept_whole() {
    let ws = Workspace::new();
    let vcs = Arc::new(FakeVcs::with_entries(vec![
        ("premake5.lua", ""),
        ("src/main.cpp", ""),
        ("include/lib.hpp", ""),
        ("docs/Makefile", "html:\n"),
    ]));
    let pipeline = ws.git_pipeline(vcs);
    let destination = ws.destination("premake-app");

    let done = pipeline
        .run(
            &AcquireRequest::new(
                SourceSpec::git(GitSource::new("https://github.com/user/premake-app.git")),
                destination.clone(),
            ),
            &Silent,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let root = destination.final_path();
    assert!(root.join("premake5.lua").is_file());
    assert!(root.join("src/main.cpp").is_file());
    assert!(root.join("docs/Makefile").is_file());
    assert!(!root.join("Makefile").exists());
    assert!(done.warnings.is_empty());
}

#[tokio::test]
async fn test_credentials_use_authenticated_clone() {
    let ws = Workspace::new();
    let vcs = Arc::new(FakeVcs::with_entries(vec![("main.cpp", "")]));
    let pipeline = ws.git_pipeline(vcs.clone());
    let source = GitSource::new("https://gitlab.com/team/app.git").auth(GitAuth::Credentials {
        username: "bot".to_string(),
        password: "token".to_string(),
    });

    pipeline
        .run(
            &AcquireRequest::new(SourceSpec::git(source), ws.destination("auth")),
            &Silent,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(
        vcs.calls()[0],
        "clone_with_auth https://gitlab.com/team/app.git credentials"
    );
}

#[tokio::test]
async fn test_reinitialisation_configures_identity_and_remote() {
    let ws = Workspace::new();
    let vcs = Arc::new(FakeVcs::with_entries(vec![("CMakeLists.txt", "project(x)\n")]));
    let pipeline = ws.git_pipeline(vcs.clone());
    let request = AcquireRequest::new(
        SourceSpec::git(GitSource::new("https://github.com/user/repo")),
        ws.destination("fresh"),
    )
    .with_post_process(PostProcessOptions {
        init_repository: true,
        user_name: Some("Ada".to_string()),
        user_email: Some("ada@example.com".to_string()),
        remote_url: Some("git@github.com:ada/fresh.git".to_string()),
        ..Default::default()
    });

    let done = pipeline
        .run(&request, &Silent, &CancellationToken::new())
        .await
        .unwrap();

    assert!(done.warnings.is_empty());
    assert_eq!(
        vcs.calls()[1..],
        [
            "strip".to_string(),
            "init".to_string(),
            "identity Some(\"Ada\") Some(\"ada@example.com\")".to_string(),
            "remote origin git@github.com:ada/fresh.git".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_post_process_failure_is_a_warning() {
    let ws = Workspace::new();
    let vcs = Arc::new(FakeVcs {
        fail_init: true,
        ..FakeVcs::with_entries(vec![("main.cpp", "")])
    });
    let pipeline = ws.git_pipeline(vcs.clone());
    let destination = ws.destination("warned");
    let request = AcquireRequest::new(
        SourceSpec::git(GitSource::new("https://github.com/user/repo.git")),
        destination.clone(),
    )
    .with_post_process(PostProcessOptions {
        init_repository: true,
        remote_url: Some("https://example.com/x.git".to_string()),
        ..Default::default()
    });

    let done = pipeline
        .run(&request, &Silent, &CancellationToken::new())
        .await
        .unwrap();

    assert!(destination.final_path().join("main.cpp").is_file());
    assert_eq!(done.warnings.len(), 1);
    assert!(matches!(
        &done.warnings[0],
        Warning::PostProcess { step: "initialise repository", detail } if detail.contains("permission denied")
    ));
    // Nothing after the failed init runs
    assert!(!vcs.calls().iter().any(|c| c.starts_with("remote")));
}

#[tokio::test]
async fn test_name_adaptation_and_populate_hook() {
    let ws = Workspace::new();
    let hook = Arc::new(RecordingHook {
        seen: Mutex::new(Vec::new()),
        fail: false,
    });
    let pipeline = ws
        .archive_pipeline(
            Arc::new(FakeTransport::serving(vec![0u8; 10])),
            FakeDecoder::with_entries(template_entries()),
        )
        .with_hook(hook.clone());
    let destination = ws.destination("my-app");
    let request = AcquireRequest::new(SourceSpec::remote_archive(TEMPLATE_URL), destination.clone())
        .with_post_process(PostProcessOptions {
            adapt_project_name: true,
            ..Default::default()
        });

    let done = pipeline
        .run(&request, &Silent, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        done.name_adaptation,
        Some(NameAdaptation::Renamed {
            from: "template".to_string(),
            to: "my-app".to_string()
        })
    );
    let cmake = std::fs::read_to_string(destination.final_path().join("CMakeLists.txt")).unwrap();
    assert!(cmake.starts_with("project(my-app LANGUAGES CXX)"));
    assert_eq!(*hook.seen.lock().unwrap(), vec![destination.final_path().to_path_buf()]);
    assert!(destination.final_path().join("README.md").is_file());
}

#[tokio::test]
async fn test_failing_hook_is_a_warning() {
    let ws = Workspace::new();
    let hook = Arc::new(RecordingHook {
        seen: Mutex::new(Vec::new()),
        fail: true,
    });
    let pipeline = ws
        .archive_pipeline(
            Arc::new(FakeTransport::serving(vec![0u8; 10])),
            FakeDecoder::with_entries(template_entries()),
        )
        .with_hook(hook);
    let destination = ws.destination("hooked");

    let done = pipeline
        .run(
            &AcquireRequest::new(SourceSpec::remote_archive(TEMPLATE_URL), destination.clone()),
            &Silent,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(destination.exists());
    assert!(matches!(
        &done.warnings[..],
        [Warning::PostProcess { step: "populate project files", .. }]
    ));
}

#[tokio::test]
async fn test_non_cpp_tree_is_kept_with_warning() {
    let ws = Workspace::new();
    let pipeline = ws.archive_pipeline(
        Arc::new(FakeTransport::serving(vec![0u8; 10])),
        FakeDecoder::with_entries(vec![("site/", ""), ("site/index.js", "")]),
    );
    let destination = ws.destination("web");

    let done = pipeline
        .run(
            &AcquireRequest::new(SourceSpec::remote_archive(TEMPLATE_URL), destination.clone()),
            &Silent,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(destination.final_path().join("site/index.js").is_file());
    assert_eq!(
        done.warnings,
        vec![Warning::NonCppProject {
            path: destination.final_path().to_path_buf()
        }]
    );
}

#[tokio::test]
async fn test_existing_destination_fails_without_side_effects() {
    let ws = Workspace::new();
    let transport = Arc::new(FakeTransport::serving(vec![0u8; 10]));
    let pipeline = ws.archive_pipeline(transport.clone(), FakeDecoder::with_entries(template_entries()));
    let destination = ws.destination("taken");
    std::fs::create_dir(destination.final_path()).unwrap();
    std::fs::write(destination.final_path().join("keep.txt"), "mine").unwrap();
    let sink = RecordingSink::default();

    let err = pipeline
        .run(
            &AcquireRequest::new(SourceSpec::remote_archive(TEMPLATE_URL), destination.clone()),
            &sink,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    assert_eq!(
        std::fs::read_to_string(destination.final_path().join("keep.txt")).unwrap(),
        "mine"
    );
    assert!(!ws.staging_parent().exists());
    assert_eq!(transport.downloads.load(Ordering::SeqCst), 0);
    assert_eq!(sink.stages(), vec![Stage::ValidatingSource, Stage::Failed]);
}

async fn expect_clean_failure(
    ws: &Workspace,
    pipeline: &AcquisitionPipeline,
    source: SourceSpec,
    sink: &dyn ProgressSink,
    expected: ErrorKind,
) -> AcquireError {
    let destination = ws.destination("my-app");
    let err = pipeline
        .run(
            &AcquireRequest::new(source, destination.clone()),
            sink,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), expected, "unexpected error: {}", err);
    assert!(!destination.exists(), "destination left behind for {}", expected);
    assert!(ws.staging_is_clean(), "staging left behind for {}", expected);
    err
}

#[tokio::test]
async fn test_unknown_format_is_invalid_source() {
    let ws = Workspace::new();
    let transport = Arc::new(FakeTransport::serving(vec![0u8; 10]));
    let pipeline = ws.archive_pipeline(transport.clone(), FakeDecoder::with_entries(template_entries()));

    expect_clean_failure(
        &ws,
        &pipeline,
        SourceSpec::remote_archive("https://example.com/archive.dat"),
        &Silent,
        ErrorKind::InvalidSource,
    )
    .await;
    assert_eq!(transport.downloads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_invalid_git_url_is_invalid_source() {
    let ws = Workspace::new();
    let pipeline = ws.git_pipeline(Arc::new(FakeVcs::with_entries(Vec::new())));

    expect_clean_failure(
        &ws,
        &pipeline,
        SourceSpec::git(GitSource::new("http://example.com")),
        &Silent,
        ErrorKind::InvalidSource,
    )
    .await;
}

#[tokio::test]
async fn test_missing_local_archive_is_invalid_source() {
    let ws = Workspace::new();
    let pipeline = ws.archive_pipeline(
        Arc::new(FakeTransport::serving(Vec::new())),
        FakeDecoder::with_entries(template_entries()),
    );

    expect_clean_failure(
        &ws,
        &pipeline,
        SourceSpec::local_archive(ws.dir.path().join("absent.tar.gz")),
        &Silent,
        ErrorKind::InvalidSource,
    )
    .await;
    assert!(!ws.staging_parent().exists());
}

#[tokio::test]
async fn test_missing_tools_are_tool_unavailable() {
    let ws = Workspace::new();
    let no_decoders = AcquisitionPipeline::with_components(
        ArchiveCodec::new(Duration::from_millis(10)),
        Arc::new(FakeTransport::serving(vec![0u8; 10])),
        None,
        ws.config(),
    );

    expect_clean_failure(
        &ws,
        &no_decoders,
        SourceSpec::remote_archive(TEMPLATE_URL),
        &Silent,
        ErrorKind::ToolUnavailable,
    )
    .await;
    expect_clean_failure(
        &ws,
        &no_decoders,
        SourceSpec::git(GitSource::new("https://github.com/user/repo.git")),
        &Silent,
        ErrorKind::ToolUnavailable,
    )
    .await;
}

#[tokio::test]
async fn test_ftp_without_curl_is_tool_unavailable() {
    let ws = Workspace::new();
    let codec = ArchiveCodec::new(Duration::from_millis(10))
        .with_decoder(Arc::new(FakeDecoder::with_entries(template_entries())));
    let pipeline = AcquisitionPipeline::with_components(
        codec,
        Arc::new(HttpTransport::new(&ws.config()).unwrap()),
        None,
        ws.config(),
    );

    expect_clean_failure(
        &ws,
        &pipeline,
        SourceSpec::remote_archive("ftp://ftp.example.com/pub/template.tar.gz"),
        &Silent,
        ErrorKind::ToolUnavailable,
    )
    .await;
    assert!(!ws.staging_parent().exists());
}

#[tokio::test]
async fn test_inaccessible_url_is_network_failure() {
    let ws = Workspace::new();
    let transport = Arc::new(FakeTransport::inaccessible());
    let pipeline = ws.archive_pipeline(transport.clone(), FakeDecoder::with_entries(template_entries()));

    expect_clean_failure(
        &ws,
        &pipeline,
        SourceSpec::remote_archive(TEMPLATE_URL),
        &Silent,
        ErrorKind::NetworkFailure,
    )
    .await;
    assert_eq!(transport.downloads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_corrupt_archive_never_extracts() {
    let ws = Workspace::new();
    let pipeline = ws.archive_pipeline(
        Arc::new(FakeTransport::serving(vec![0u8; 10])),
        FakeDecoder::corrupt(),
    );

    expect_clean_failure(
        &ws,
        &pipeline,
        SourceSpec::remote_archive(TEMPLATE_URL),
        &Silent,
        ErrorKind::CorruptArchive,
    )
    .await;
}

#[tokio::test]
async fn test_traversal_entry_is_rejected() {
    let ws = Workspace::new();
    let pipeline = ws.archive_pipeline(
        Arc::new(FakeTransport::serving(vec![0u8; 10])),
        FakeDecoder::with_entries(vec![("template/CMakeLists.txt", ""), ("../../evil", "pwned")]),
    );

    let err = expect_clean_failure(
        &ws,
        &pipeline,
        SourceSpec::remote_archive(TEMPLATE_URL),
        &Silent,
        ErrorKind::PathTraversal,
    )
    .await;
    assert!(err.detail().contains("evil"));
    assert!(!ws.dir.path().join("evil").exists());
    assert!(!ws.staging_parent().join("evil").exists());
}

#[tokio::test]
async fn test_rejected_clone_is_clone_failure() {
    let ws = Workspace::new();
    let vcs = Arc::new(FakeVcs {
        fail_clone: true,
        ..FakeVcs::with_entries(vec![("main.cpp", "")])
    });
    let pipeline = ws.git_pipeline(vcs);
    let source = GitSource::new("https://github.com/user/private.git").auth(GitAuth::Credentials {
        username: "bot".to_string(),
        password: "wrong".to_string(),
    });

    expect_clean_failure(
        &ws,
        &pipeline,
        SourceSpec::git(source),
        &Silent,
        ErrorKind::CloneFailure,
    )
    .await;
}

#[tokio::test]
async fn test_empty_archive_is_empty_project() {
    let ws = Workspace::new();
    let pipeline = ws.archive_pipeline(
        Arc::new(FakeTransport::serving(vec![0u8; 10])),
        FakeDecoder::with_entries(Vec::new()),
    );

    expect_clean_failure(
        &ws,
        &pipeline,
        SourceSpec::remote_archive(TEMPLATE_URL),
        &Silent,
        ErrorKind::EmptyProject,
    )
    .await;
}

#[tokio::test]
async fn test_metadata_only_clone_is_empty_project() {
    let ws = Workspace::new();
    let pipeline = ws.git_pipeline(Arc::new(FakeVcs::with_entries(Vec::new())));

    expect_clean_failure(
        &ws,
        &pipeline,
        SourceSpec::git(GitSource::new("https://github.com/user/empty.git")),
        &Silent,
        ErrorKind::EmptyProject,
    )
    .await;
}

#[tokio::test]
async fn test_failed_move_is_relocation_failed() {
    let ws = Workspace::new();
    let out = ws.dir.path().join("out");
    // The destination's parent disappears while the archive is downloading
    let transport = Arc::new(
        FakeTransport::serving(vec![0u8; 10]).with_side_effect(move || {
            let _ = std::fs::remove_dir_all(&out);
        }),
    );
    let pipeline = ws.archive_pipeline(transport, FakeDecoder::with_entries(template_entries()));

    expect_clean_failure(
        &ws,
        &pipeline,
        SourceSpec::remote_archive(TEMPLATE_URL),
        &Silent,
        ErrorKind::RelocationFailed,
    )
    .await;
}

#[tokio::test]
async fn test_destination_created_mid_run_is_not_replaced() {
    let ws = Workspace::new();
    let destination = ws.destination("raced");
    let raced = destination.final_path().to_path_buf();
    let transport = Arc::new(
        FakeTransport::serving(vec![0u8; 10]).with_side_effect(move || {
            let _ = std::fs::create_dir(&raced);
        }),
    );
    let pipeline = ws.archive_pipeline(transport, FakeDecoder::with_entries(template_entries()));

    let err = pipeline
        .run(
            &AcquireRequest::new(SourceSpec::remote_archive(TEMPLATE_URL), destination.clone()),
            &Silent,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    // The directory created by someone else is left alone, and stays empty
    assert!(!destination.final_path().join("CMakeLists.txt").exists());
    assert!(ws.staging_is_clean());
}

#[tokio::test]
async fn test_declining_sink_cancels_large_download() {
    let ws = Workspace::new();
    let pipeline = ws.archive_pipeline(
        Arc::new(FakeTransport::serving(vec![0u8; 10 * 1024 * 1024])),
        FakeDecoder::with_entries(template_entries()),
    );
    let sink = RecordingSink::declining();

    expect_clean_failure(
        &ws,
        &pipeline,
        SourceSpec::remote_archive(TEMPLATE_URL),
        &sink,
        ErrorKind::Cancelled,
    )
    .await;
    assert_eq!(sink.progress_calls.load(Ordering::SeqCst), 1);
    assert_eq!(sink.stages().last(), Some(&Stage::CleaningUp));
    assert!(sink.stages().contains(&Stage::Failed));
}

#[tokio::test]
async fn test_cancelled_token_stops_before_acquiring() {
    let ws = Workspace::new();
    let transport = Arc::new(FakeTransport::serving(vec![0u8; 10]));
    let pipeline = ws.archive_pipeline(transport.clone(), FakeDecoder::with_entries(template_entries()));
    let token = CancellationToken::new();
    token.cancel();
    let destination = ws.destination("never");

    let err = pipeline
        .run(
            &AcquireRequest::new(SourceSpec::remote_archive(TEMPLATE_URL), destination.clone()),
            &Silent,
            &token,
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(!destination.exists());
    assert!(ws.staging_is_clean());
    assert_eq!(transport.downloads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_concurrent_runs_use_separate_staging() {
    let ws = Workspace::new();
    let pipeline = ws.archive_pipeline(
        Arc::new(FakeTransport::serving(vec![0u8; 256 * 1024])),
        FakeDecoder::with_entries(template_entries()),
    );
    let first = AcquireRequest::new(SourceSpec::remote_archive(TEMPLATE_URL), ws.destination("one"));
    let second = AcquireRequest::new(SourceSpec::remote_archive(TEMPLATE_URL), ws.destination("two"));
    let token = CancellationToken::new();

    let (a, b) = tokio::join!(
        pipeline.run(&first, &Silent, &token),
        pipeline.run(&second, &Silent, &token)
    );

    assert!(a.unwrap().project_root.join("src/main.cpp").is_file());
    assert!(b.unwrap().project_root.join("src/main.cpp").is_file());
    assert!(ws.staging_is_clean());
}
