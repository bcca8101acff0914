//! plugdock - Plugin lifecycle manager and archive installer.
//!
//! Usage:
//!   plugdock install <ARCHIVE>          Import a .plugin archive and enable it
//!   plugdock list                       Show installed plugins
//!   plugdock activate --project <NAME>  Activate a project's plugins
//!   plugdock remove <NAME>              Remove a plugin and delete its files
//!   plugdock --help                     Show help

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{bail, Context, Result};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use plugdock_core::{HostConfig, PluginDescriptor, Side};
use plugdock_plugin::{
    ImportEvent, Installer, JobOutcome, LifecycleManager, Panel, PanelHandle, PanelHost,
    PluginLoader, ProjectSettings, UserMessage,
};

const DEFAULT_PROJECT: &str = "default";

#[derive(Parser)]
#[command(
    name = "plugdock",
    version,
    about = "Plugin lifecycle manager and archive installer",
    long_about = "plugdock installs packaged .plugin archives into a managed plugins \
                  directory and activates the plugins enabled for a project."
)]
struct Cli {
    /// Host configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Managed plugins directory (overrides the configuration)
    #[arg(long, global = true)]
    plugins_dir: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import a plugin archive and enable it for a project
    Install {
        /// Path to the .plugin archive
        archive: PathBuf,

        /// Project to enable the plugin for
        #[arg(short, long, default_value = DEFAULT_PROJECT)]
        project: String,
    },

    /// List installed plugins
    List {
        /// Project whose enabled plugins are marked
        #[arg(short, long, default_value = DEFAULT_PROJECT)]
        project: String,
    },

    /// Activate every plugin enabled for a project
    Activate {
        /// Project to activate
        #[arg(short, long)]
        project: String,
    },

    /// Remove a plugin and disable it for a project
    Remove {
        /// Plugin name
        name: String,

        /// Project to disable the plugin for
        #[arg(short, long, default_value = DEFAULT_PROJECT)]
        project: String,

        /// Keep the installed files
        #[arg(long)]
        keep_files: bool,
    },
}

/// Panel host that prints mounts to the console.
#[derive(Default)]
struct ConsoleHost {
    next_handle: u64,
}

impl PanelHost for ConsoleHost {
    fn mount_panel(&mut self, panel: &Panel, plugin_label: &str, side: Side) -> PanelHandle {
        self.next_handle += 1;
        println!(
            "  [{}] panel '{}' ({}) mounted on the {} side",
            plugin_label, panel.title, panel.id, side
        );
        PanelHandle::new(self.next_handle)
    }

    fn unmount_all_panels_for_plugin(&mut self, name: &str) {
        println!("  [{}] panels unmounted", name);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_deref(), cli.plugins_dir.clone())?;
    debug!(plugins_root = %config.plugins_root.display(), "Using plugins directory");

    match cli.command {
        Command::Install { archive, project } => run_install(config, &archive, &project).await,
        Command::List { project } => run_list(&config, &project),
        Command::Activate { project } => run_activate(&config, &project),
        Command::Remove {
            name,
            project,
            keep_files,
        } => run_remove(&config, &name, &project, keep_files),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("PLUGDOCK_LOG").unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>, plugins_dir: Option<PathBuf>) -> Result<HostConfig> {
    let config = match path {
        Some(path) => HostConfig::from_toml_file(path)
            .wrap_err_with(|| format!("Failed to load config from {}", path.display()))?,
        None => HostConfig::default(),
    };

    Ok(match plugins_dir {
        Some(dir) => config.with_plugins_root(dir),
        None => config,
    })
}

fn load_settings(config: &HostConfig) -> Result<ProjectSettings> {
    let path = config.settings_file();
    ProjectSettings::load(&path)
        .wrap_err_with(|| format!("Failed to load project settings from {}", path.display()))
}

fn new_manager(loader: Arc<PluginLoader>) -> LifecycleManager<ConsoleHost> {
    LifecycleManager::new(loader, ConsoleHost::default())
}

fn print_message(message: &UserMessage) {
    eprintln!("{}: {}", message.title, message.message);
    if let Some(detail) = &message.detail {
        for line in detail.lines() {
            eprintln!("  {}", line);
        }
    }
}

/// Import an archive, activate it and enable it for `project`.
async fn run_install(config: HostConfig, archive: &Path, project: &str) -> Result<()> {
    let mut settings = load_settings(&config)?;
    let loader = Arc::new(PluginLoader::new(&config.plugins_root));
    let mut manager = new_manager(loader.clone());
    let mut installer = Installer::new(loader, config);

    let mut handle = match installer.start(archive) {
        Ok(handle) => handle,
        Err(e) => {
            print_message(&UserMessage::from(&e));
            bail!(e);
        }
    };
    let cancel = handle.cancel_token();

    eprintln!("Importing {}...", archive.display());

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;
    let mut imported: Option<PluginDescriptor> = None;
    let mut failed = false;

    loop {
        tokio::select! {
            event = handle.events.recv() => {
                let Some(event) = event else { break };
                match &event {
                    ImportEvent::UnarchiveFinished => eprintln!("  archive extracted"),
                    ImportEvent::UnarchiveFailed { archive, reason } => {
                        eprintln!("  could not extract {}: {}", archive.display(), reason)
                    }
                    ImportEvent::Finalizing { name, .. } => eprintln!("  installing '{}'", name),
                    ImportEvent::ImportFinished(plugin) => {
                        imported = Some(plugin.descriptor.clone());
                    }
                    ImportEvent::ImportFailed(_) => failed = true,
                    ImportEvent::ImportCancelled => eprintln!("  import cancelled"),
                }
                if let Some(message) = manager.handle_import_event(event) {
                    failed = true;
                    print_message(&message);
                }
            }
            result = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                } else {
                    eprintln!("Cancelling import...");
                    cancel.cancel();
                }
            }
        }
    }

    let outcome = handle.join().await;
    debug!(?outcome, "Import job finished");

    let result = match (outcome, imported) {
        (JobOutcome::Succeeded { name }, Some(descriptor)) if !failed => {
            settings.enable(project, &descriptor);
            settings.save().wrap_err("Failed to save project settings")?;
            println!("Installed {} (enabled for project '{}')", descriptor, project);
            debug!(plugin = %name, "Plugin recorded in project settings");
            Ok(())
        }
        (JobOutcome::Cancelled, _) => Ok(()),
        (JobOutcome::Failed { reason }, _) => Err(color_eyre::eyre::eyre!(reason)),
        _ => Err(color_eyre::eyre::eyre!("Plugin could not be activated")),
    };

    manager.shutdown();
    result
}

/// Print installed plugins with their size on disk.
fn run_list(config: &HostConfig, project: &str) -> Result<()> {
    let settings = load_settings(config)?;
    let loader = PluginLoader::new(&config.plugins_root);
    let installed = loader.installed();

    if installed.is_empty() {
        println!("No plugins installed in {}", config.plugins_root.display());
        return Ok(());
    }

    println!("{}", "─".repeat(60));
    println!(" {} ({} installed)", config.plugins_root.display(), installed.len());
    println!("{}", "─".repeat(60));

    for descriptor in &installed {
        let size = loader
            .managed_dir(&descriptor.name)
            .map(|dir| plugdock_ops::dir_size(&dir))
            .unwrap_or(0);
        let marker = if settings.is_enabled(project, &descriptor.name) {
            "*"
        } else {
            " "
        };
        println!(
            " {} {:<24} {:>10} {:>12}  {}",
            marker,
            truncate(&descriptor.name, 24),
            descriptor.version,
            format_size(size),
            descriptor.author
        );
    }

    println!();
    println!(" * enabled for project '{}'", project);
    Ok(())
}

/// Activate a project's plugins, report the result, then close them.
fn run_activate(config: &HostConfig, project: &str) -> Result<()> {
    let settings = load_settings(config)?;
    let loader = Arc::new(PluginLoader::new(&config.plugins_root));
    let mut manager = new_manager(loader);

    println!("Activating plugins for project '{}'", project);
    let report = manager.reload_for_project(&settings, project);

    for (name, err) in &report.failed {
        eprintln!("Plugin '{}' failed:", name);
        print_message(&UserMessage::from(err));
    }
    println!(
        "{} active, {} failed",
        manager.registry().len(),
        report.failed.len()
    );

    manager.shutdown();

    if report.is_clean() {
        Ok(())
    } else {
        bail!("{} plugin(s) failed to activate", report.failed.len())
    }
}

/// Run a plugin's remove hook, delete its files and disable it.
fn run_remove(config: &HostConfig, name: &str, project: &str, keep_files: bool) -> Result<()> {
    let mut settings = load_settings(config)?;
    let loader = Arc::new(PluginLoader::new(&config.plugins_root));
    let mut manager = new_manager(loader.clone());

    let managed = match loader.managed_dir(name) {
        Ok(dir) => dir,
        Err(e) => {
            print_message(&UserMessage::from(&e));
            bail!(e);
        }
    };

    if managed.is_dir() {
        // The remove hook needs a live instance.
        if let Err(e) = manager.add_or_reload_plugin(name) {
            warn!(plugin = %name, error = %e, "Could not activate plugin before removal");
        }
    }

    if keep_files {
        manager.remove_plugin(name).wrap_err("Failed to remove plugin")?;
    } else {
        match manager.uninstall_plugin(name) {
            Ok(true) => println!("Deleted {}", managed.display()),
            Ok(false) => println!("No installed files for '{}'", name),
            Err(e) => {
                print_message(&UserMessage::from(&e));
                bail!(e);
            }
        }
    }

    if settings.disable(project, name) {
        settings.save().wrap_err("Failed to save project settings")?;
        println!("Disabled '{}' for project '{}'", name, project);
    }

    manager.shutdown();
    Ok(())
}

fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

/// Truncate a string to max length.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
