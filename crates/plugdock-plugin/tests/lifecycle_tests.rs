use plugdock_core::{HostConfig, Side, ENTRY_FILE};
use plugdock_plugin::{
    start_import, ImportError, ImportEvent, ImportHandle, ImportRequest, ImportedPlugin,
    Installer, JobOutcome,
    LifecycleManager, Panel, PanelHandle, PanelHost, PluginLoader, PluginState, ProjectSettings,
    UserMessage,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

#[derive(Default)]
struct Host {
    next: u64,
    mounted: Vec<(String, String, Side)>,
    unmounted: Vec<String>,
}

impl PanelHost for Host {
    fn mount_panel(&mut self, panel: &Panel, plugin_label: &str, side: Side) -> PanelHandle {
        self.next += 1;
        self.mounted
            .push((plugin_label.to_string(), panel.id.clone(), side));
        PanelHandle::new(self.next)
    }

    fn unmount_all_panels_for_plugin(&mut self, name: &str) {
        self.unmounted.push(name.to_string());
    }
}

const DEMO_SCRIPT: &str = r#"
local M = {
    tabs = {
        { id = "main", title = "Demo", side = "right" },
        { id = "log", title = "Log" },
    },
}

function M.remove()
    local marker = io.open(host.plugin_dir .. "/removed.marker", "w")
    marker:write("removed")
    marker:close()
end

return M
"#;

fn manifest(name: &str, version: &str) -> String {
    format!("name = \"{name}\"\nversion = \"{version}\"\nauthor = \"tests\"\n")
}

fn write_tar_gz(path: &Path, entries: &[(String, String)]) {
    let file = fs::File::create(path).unwrap();
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, body) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, name, body.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

fn demo_archive(dir: &Path, file_name: &str, prefix: &str, version: &str) -> PathBuf {
    let path = dir.join(file_name);
    write_tar_gz(
        &path,
        &[
            (format!("{prefix}{ENTRY_FILE}"), manifest("demo", version)),
            (format!("{prefix}main.lua"), DEMO_SCRIPT.to_string()),
            (format!("{prefix}data/readme.txt"), "demo data".to_string()),
        ],
    );
    path
}

fn install_directly(root: &Path, name: &str) {
    let dir = root.join(name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(ENTRY_FILE), manifest(name, "1.0")).unwrap();
    fs::write(dir.join("main.lua"), DEMO_SCRIPT).unwrap();
}

struct Fixture {
    temp: TempDir,
    config: HostConfig,
    loader: Arc<PluginLoader>,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let mut config = HostConfig::new(temp.path().join("plugins"));
        config.scratch_root = Some(temp.path().join("scratch"));
        let loader = Arc::new(PluginLoader::new(&config.plugins_root));
        Self {
            temp,
            config,
            loader,
        }
    }

    fn manager(&self) -> LifecycleManager<Host> {
        LifecycleManager::new(self.loader.clone(), Host::default())
    }

    fn plugins_root(&self) -> &Path {
        &self.config.plugins_root
    }
}

fn event_kind(event: &ImportEvent) -> &'static str {
    match event {
        ImportEvent::UnarchiveFinished => "unarchive-finished",
        ImportEvent::UnarchiveFailed { .. } => "unarchive-failed",
        ImportEvent::Finalizing { .. } => "finalizing",
        ImportEvent::ImportFinished(_) => "import-finished",
        ImportEvent::ImportFailed(_) => "import-failed",
        ImportEvent::ImportCancelled => "import-cancelled",
    }
}

async fn drive(
    mut handle: ImportHandle,
    manager: &mut LifecycleManager<Host>,
) -> (Vec<&'static str>, Vec<UserMessage>, JobOutcome) {
    let mut kinds = Vec::new();
    let mut messages = Vec::new();
    while let Some(event) = handle.events.recv().await {
        kinds.push(event_kind(&event));
        if let Some(message) = manager.handle_import_event(event) {
            messages.push(message);
        }
    }
    let outcome = handle.join().await;
    (kinds, messages, outcome)
}

/// Run a job to completion without a manager, granting every name claim.
async fn finish_unmanaged(mut handle: ImportHandle) -> (Vec<ImportedPlugin>, JobOutcome) {
    let mut imported = Vec::new();
    while let Some(event) = handle.events.recv().await {
        match event {
            ImportEvent::Finalizing { claim, .. } => {
                claim.grant();
            }
            ImportEvent::ImportFinished(plugin) => imported.push(plugin),
            _ => {}
        }
    }
    let outcome = handle.join().await;
    (imported, outcome)
}

#[tokio::test]
async fn test_import_demo_archive() {
    let fixture = Fixture::new();
    let archive = demo_archive(fixture.temp.path(), "demo.plugin", "", "1.0");
    let mut manager = fixture.manager();

    let handle = start_import(
        ImportRequest::new(&archive),
        fixture.loader.clone(),
        &fixture.config,
    );
    let (kinds, messages, outcome) = drive(handle, &mut manager).await;

    assert_eq!(
        kinds,
        vec!["unarchive-finished", "finalizing", "import-finished"]
    );
    assert!(messages.is_empty());
    assert_eq!(
        outcome,
        JobOutcome::Succeeded {
            name: "demo".into()
        }
    );

    let managed = fixture.plugins_root().join("demo");
    assert!(managed.join(ENTRY_FILE).is_file());
    assert!(managed.join("main.lua").is_file());
    assert!(managed.join("data").join("readme.txt").is_file());

    assert!(manager.registry().get("demo").is_some());
    assert_eq!(manager.state("demo"), PluginState::Active);
    assert_eq!(
        manager.host().mounted,
        vec![
            ("demo".to_string(), "main".to_string(), Side::Right),
            ("demo".to_string(), "log".to_string(), Side::Left),
        ]
    );

    // Scratch directories do not outlive the job.
    let scratch = fixture.temp.path().join("scratch");
    assert_eq!(fs::read_dir(&scratch).unwrap().count(), 0);
}

#[tokio::test]
async fn test_import_wrapped_archive_named_by_metadata() {
    let fixture = Fixture::new();
    let archive = demo_archive(fixture.temp.path(), "download (1).plugin", "demo-1.0/", "1.0");
    let mut manager = fixture.manager();

    let handle = start_import(
        ImportRequest::new(&archive),
        fixture.loader.clone(),
        &fixture.config,
    );
    let (_, messages, outcome) = drive(handle, &mut manager).await;

    assert!(messages.is_empty());
    assert!(matches!(outcome, JobOutcome::Succeeded { .. }));
    assert!(fixture.plugins_root().join("demo").join("main.lua").is_file());
    assert!(!fixture.plugins_root().join("download (1)").exists());
}

#[tokio::test]
async fn test_reimport_replaces_content_and_is_not_fresh() {
    let fixture = Fixture::new();
    let loader = fixture.loader.clone();

    let v1 = demo_archive(fixture.temp.path(), "v1.plugin", "", "1.0");
    let handle = start_import(ImportRequest::new(&v1), loader.clone(), &fixture.config);
    let (first, _) = finish_unmanaged(handle).await;
    let mut fresh: Vec<bool> = first.iter().map(|p| p.fresh_install).collect();

    fs::write(
        fixture.plugins_root().join("demo").join("stale.lua"),
        "return {}",
    )
    .unwrap();

    let v2 = demo_archive(fixture.temp.path(), "v2.plugin", "", "2.0");
    let handle = start_import(ImportRequest::new(&v2), loader.clone(), &fixture.config);
    let (second, _) = finish_unmanaged(handle).await;
    for imported in &second {
        assert_eq!(imported.descriptor.version, "2.0");
        fresh.push(imported.fresh_install);
    }

    assert_eq!(fresh, vec![true, false]);
    assert!(!fixture.plugins_root().join("demo").join("stale.lua").exists());
}

#[tokio::test]
async fn test_import_corrupted_archive() {
    let fixture = Fixture::new();
    let archive = fixture.temp.path().join("broken.plugin");
    fs::write(&archive, b"definitely not a compressed archive").unwrap();
    let mut manager = fixture.manager();

    let handle = start_import(
        ImportRequest::new(&archive),
        fixture.loader.clone(),
        &fixture.config,
    );
    let (kinds, messages, outcome) = drive(handle, &mut manager).await;

    assert_eq!(kinds, vec!["unarchive-failed", "import-failed"]);
    assert!(matches!(outcome, JobOutcome::Failed { .. }));
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].title, "Corrupted archive");
    assert!(messages[0].message.contains("broken.plugin"));

    assert!(!fixture.plugins_root().exists());
    assert!(manager.registry().is_empty());
}

#[tokio::test]
async fn test_import_without_metadata() {
    let fixture = Fixture::new();
    let archive = fixture.temp.path().join("empty.plugin");
    write_tar_gz(&archive, &[("main.lua".to_string(), "return {}".to_string())]);
    let mut manager = fixture.manager();

    let handle = start_import(
        ImportRequest::new(&archive),
        fixture.loader.clone(),
        &fixture.config,
    );
    let (kinds, messages, _) = drive(handle, &mut manager).await;

    assert_eq!(kinds, vec!["unarchive-finished", "import-failed"]);
    assert_eq!(messages[0].title, "Missing plugin metadata");
    assert!(!fixture.plugins_root().exists());
}

#[tokio::test]
async fn test_cancel_before_extraction() {
    let fixture = Fixture::new();
    let archive = demo_archive(fixture.temp.path(), "demo.plugin", "", "1.0");
    let mut manager = fixture.manager();

    let handle = start_import(
        ImportRequest::new(&archive),
        fixture.loader.clone(),
        &fixture.config,
    );
    handle.cancel();
    let (kinds, messages, outcome) = drive(handle, &mut manager).await;

    assert_eq!(kinds, vec!["import-cancelled"]);
    assert!(messages.is_empty());
    assert_eq!(outcome, JobOutcome::Cancelled);
    assert!(manager.registry().is_empty());
    assert!(!fixture.plugins_root().join("demo").exists());
}

#[tokio::test]
async fn test_unwritable_scratch_reports_unarchive_failure() {
    let mut fixture = Fixture::new();
    let archive = demo_archive(fixture.temp.path(), "demo.plugin", "", "1.0");

    // A regular file where the scratch directory should go.
    let blocked = fixture.temp.path().join("not-a-dir");
    fs::write(&blocked, b"file").unwrap();
    fixture.config.scratch_root = Some(blocked.clone());
    let mut manager = fixture.manager();

    let mut handle = start_import(
        ImportRequest::new(&archive),
        fixture.loader.clone(),
        &fixture.config,
    );
    let mut kinds = Vec::new();
    let mut reasons = Vec::new();
    let mut messages = Vec::new();
    while let Some(event) = handle.events.recv().await {
        kinds.push(event_kind(&event));
        if let ImportEvent::UnarchiveFailed { archive: failed, reason } = &event {
            assert_eq!(failed, &archive);
            reasons.push(reason.clone());
        }
        if let Some(message) = manager.handle_import_event(event) {
            messages.push(message);
        }
    }
    let outcome = handle.join().await;

    assert_eq!(kinds, vec!["unarchive-failed", "import-failed"]);
    assert_eq!(reasons.len(), 1);
    assert!(!reasons[0].is_empty());
    assert!(matches!(outcome, JobOutcome::Failed { .. }));
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].title, "Extraction failed");
    assert!(blocked.is_file());
    assert!(!fixture.plugins_root().join("demo").exists());
}

#[tokio::test]
async fn test_cancel_after_extraction_installs_nothing() {
    let fixture = Fixture::new();
    let archive = demo_archive(fixture.temp.path(), "demo.plugin", "", "1.0");
    let mut manager = fixture.manager();

    let mut handle = start_import(
        ImportRequest::new(&archive),
        fixture.loader.clone(),
        &fixture.config,
    );
    let mut kinds = Vec::new();
    let mut messages = Vec::new();
    while let Some(event) = handle.events.recv().await {
        if matches!(event, ImportEvent::UnarchiveFinished) {
            handle.cancel();
        }
        kinds.push(event_kind(&event));
        if let Some(message) = manager.handle_import_event(event) {
            messages.push(message);
        }
    }
    let outcome = handle.join().await;

    assert_eq!(outcome, JobOutcome::Cancelled);
    assert_eq!(kinds.first(), Some(&"unarchive-finished"));
    assert_eq!(kinds.last(), Some(&"import-cancelled"));
    assert!(!kinds.contains(&"import-finished"));
    assert!(messages.is_empty());
    assert!(!fixture.plugins_root().join("demo").exists());
    assert!(manager.registry().is_empty());
    assert_eq!(manager.state("demo"), PluginState::Absent);

    // The claim is released, so the name is usable again.
    assert!(!manager.delete_plugin_files("demo").unwrap());

    let scratch = fixture.temp.path().join("scratch");
    assert_eq!(fs::read_dir(&scratch).unwrap().count(), 0);
}

#[tokio::test]
async fn test_installer_allows_one_import_at_a_time() {
    let fixture = Fixture::new();
    let archive = demo_archive(fixture.temp.path(), "demo.plugin", "", "1.0");
    let mut installer = Installer::new(fixture.loader.clone(), fixture.config.clone());

    let bad = fixture.temp.path().join("demo.zip");
    fs::write(&bad, b"x").unwrap();
    assert!(matches!(
        installer.start(&bad),
        Err(ImportError::InvalidExtension { .. })
    ));

    let first = installer.start(&archive).unwrap();
    assert!(installer.is_busy());
    assert!(matches!(
        installer.start(&archive),
        Err(ImportError::InProgress)
    ));

    let (_, outcome) = finish_unmanaged(first).await;
    assert!(matches!(outcome, JobOutcome::Succeeded { .. }));
    assert!(!installer.is_busy());

    let second = installer.start(&archive).unwrap();
    let (_, outcome) = finish_unmanaged(second).await;
    assert!(matches!(outcome, JobOutcome::Succeeded { .. }));
}

#[test]
fn test_project_switch_keeps_shared_plugins() {
    let fixture = Fixture::new();
    for name in ["a", "b", "c"] {
        install_directly(fixture.plugins_root(), name);
    }
    let mut manager = fixture.manager();

    let first = manager.reload_all_for_project(&["a".to_string(), "b".to_string()]);
    assert_eq!(first.activated, vec!["a", "b"]);
    assert!(first.is_clean());
    assert_eq!(manager.host().mounted.len(), 4);

    let second = manager.reload_all_for_project(&["b".to_string(), "c".to_string()]);
    assert_eq!(second.deactivated, vec!["a"]);
    assert_eq!(second.activated, vec!["c"]);

    assert_eq!(manager.registry().list_active(), vec!["b", "c"]);
    assert_eq!(manager.host().unmounted, vec!["a"]);
    assert_eq!(manager.host().mounted.len(), 6);
    assert!(fixture
        .plugins_root()
        .join("a")
        .join("removed.marker")
        .is_file());
    assert!(!fixture
        .plugins_root()
        .join("b")
        .join("removed.marker")
        .exists());
}

#[test]
fn test_project_switch_reports_failures_and_continues() {
    let fixture = Fixture::new();
    install_directly(fixture.plugins_root(), "good");
    let mut manager = fixture.manager();

    let report = manager.reload_all_for_project(&["missing".to_string(), "good".to_string()]);
    assert_eq!(report.activated, vec!["good"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "missing");
    assert_eq!(manager.state("missing"), PluginState::Absent);
}

#[test]
fn test_reload_keeps_single_instance_without_remove() {
    let fixture = Fixture::new();
    install_directly(fixture.plugins_root(), "demo");
    let mut manager = fixture.manager();

    manager.add_or_reload_plugin("demo").unwrap();
    manager.add_or_reload_plugin("demo").unwrap();

    assert_eq!(manager.registry().list_active(), vec!["demo"]);
    assert!(!fixture
        .plugins_root()
        .join("demo")
        .join("removed.marker")
        .exists());
}

#[test]
fn test_uninstall_runs_remove_and_deletes_files() {
    let fixture = Fixture::new();
    install_directly(fixture.plugins_root(), "demo");
    let mut manager = fixture.manager();
    manager.add_or_reload_plugin("demo").unwrap();

    assert!(manager.uninstall_plugin("demo").unwrap());
    assert!(manager.registry().get("demo").is_none());
    assert!(!fixture.plugins_root().join("demo").exists());
}

#[test]
fn test_reload_for_project_uses_settings() {
    let fixture = Fixture::new();
    install_directly(fixture.plugins_root(), "demo");

    let mut settings = ProjectSettings::new(fixture.temp.path().join("settings.toml"));
    let descriptor = fixture
        .loader
        .resolve_entry_metadata(&fixture.plugins_root().join("demo"))
        .unwrap();
    settings.enable("default", &descriptor);

    let mut manager = fixture.manager();
    let report = manager.reload_for_project(&settings, "default");
    assert_eq!(report.activated, vec!["demo"]);

    let report = manager.reload_for_project(&settings, "empty");
    assert_eq!(report.deactivated, vec!["demo"]);
    assert!(manager.registry().is_empty());
}
