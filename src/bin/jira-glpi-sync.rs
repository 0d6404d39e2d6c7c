use clap::{Parser, Subcommand};

use jira_glpi_sync::{JiraGlpiSync, JsonFileStore, SyncMode, SyncPolicy, SyncStatus};

#[derive(Parser)]
#[command(name = "jira-glpi-sync", about = "Two-way ticket sync between Jira and GLPI")]
struct Cli {
    /// Database path (default: ~/.jira-glpi-sync/sync.db)
    #[arg(long)]
    db: Option<String>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Progress reporter that writes to stderr.
struct StderrProgress;

impl jira_glpi_sync::SyncProgress for StderrProgress {
    fn on_pass_start(&self, pass: jira_glpi_sync::sync::Pass) {
        eprintln!("Running {pass} pass...");
    }

    fn on_fetched(&self, system: jira_glpi_sync::SourceSystem, count: usize) {
        eprintln!("  Fetched {count} {system} tickets");
    }

    fn on_pass_complete(&self, report: &jira_glpi_sync::SyncReport) {
        eprintln!("  Done: {:?}", report.status);
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile tickets between Jira and GLPI
    Sync {
        /// jira2glpi, glpi2jira, both, deletions or all
        #[arg(default_value = "both")]
        mode: SyncMode,
        /// Log intended changes without sending them
        #[arg(long)]
        dry_run: bool,
        /// Allow deleting counterparts of removed tickets
        #[arg(long, conflicts_with = "no_deletion")]
        allow_deletion: bool,
        /// Never delete anything, whatever the configuration says
        #[arg(long)]
        no_deletion: bool,
        /// Keep links in a JSON map file instead of the database
        #[arg(long)]
        map_file: Option<String>,
    },
    /// Manage the Jira reporter -> GLPI user map
    Users {
        #[command(subcommand)]
        action: UsersAction,
    },
    /// Inspect and move the Jira <-> GLPI links
    Links {
        #[command(subcommand)]
        action: LinksAction,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show link and user counts and recent runs
    Status,
}

#[derive(Subcommand)]
enum UsersAction {
    /// Rebuild the map from GLPI users
    Refresh,
    /// List mapped identities
    List,
    /// Map an identity (display name or email) to a GLPI user id
    Set { identity: String, glpi_user_id: u64 },
}

#[derive(Subcommand)]
enum LinksAction {
    /// List all links
    List,
    /// Merge links from a JSON map file
    Import { path: String },
    /// Write all links to a JSON map file
    Export { path: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// List all config values
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let db = match &cli.db {
        Some(path) => jira_glpi_sync::Database::open_at(path).await?,
        None => jira_glpi_sync::Database::open().await?,
    };
    let app = JiraGlpiSync::new(db);

    match cli.command {
        Commands::Status => print_status(&app).await?,
        Commands::Config { action } => handle_config(&app, action).await?,
        Commands::Links { action } => handle_links(&app, action).await?,
        Commands::Users { action } => handle_users(&app, action).await?,
        Commands::Sync {
            mode,
            dry_run,
            allow_deletion,
            no_deletion,
            map_file,
        } => {
            let settings = jira_glpi_sync::Settings::from_env()?;
            let mut policy = app.policy(SyncPolicy::from(&settings)).await?;
            if dry_run {
                policy.dry_run = true;
            }
            if allow_deletion {
                policy.allow_deletion = true;
            }
            if no_deletion {
                policy.allow_deletion = false;
            }
            log::info!("Running {mode:?} with {policy:?}");

            let file_store = map_file.map(JsonFileStore::new);
            let store = file_store
                .as_ref()
                .map(|s| s as &dyn jira_glpi_sync::CorrespondenceStore);
            let reports = app
                .sync(&settings, mode, &policy, store, &StderrProgress)
                .await?;
            for report in &reports {
                print_sync_report(report);
                println!();
            }
            if reports.iter().any(|r| r.status == SyncStatus::Failed) {
                anyhow::bail!("one or more passes failed");
            }
        }
    }

    Ok(())
}

async fn print_status(app: &JiraGlpiSync) -> anyhow::Result<()> {
    let status = app.status(5).await?;
    println!("Sync Status");
    println!("  Links: {}", status.links);
    println!("  Users: {}", status.users);
    if status.recent_runs.is_empty() {
        println!("  Last runs: never");
        return Ok(());
    }
    println!("  Last runs:");
    for run in &status.recent_runs {
        println!(
            "    {} {:<10} {:<9} +{} ~{} -{} !{}{}",
            run.started_at,
            run.pass,
            run.status,
            run.created,
            run.updated,
            run.deleted,
            run.failed,
            if run.dry_run { " (dry run)" } else { "" }
        );
    }
    Ok(())
}

async fn handle_config(app: &JiraGlpiSync, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => match app.config_get(&key).await? {
            Some(v) => println!("{key} = {v}"),
            None => println!("{key} is not set"),
        },
        ConfigAction::Set { key, value } => {
            app.config_set(&key, &value).await?;
            println!("Config updated.");
        }
        ConfigAction::List => {
            let items = app.config_list().await?;
            if items.is_empty() {
                println!("No configuration set.");
            } else {
                for (k, v) in items {
                    println!("{k} = {v}");
                }
            }
        }
    }
    Ok(())
}

async fn handle_links(app: &JiraGlpiSync, action: LinksAction) -> anyhow::Result<()> {
    match action {
        LinksAction::List => {
            let links = app.links().await?;
            if links.is_empty() {
                println!("No links.");
            }
            for link in links {
                let origin = link.origin.map(|o| o.to_string()).unwrap_or_else(|| "-".into());
                println!("Jira {:<12} <-> GLPI {:<8} (origin: {origin})", link.jira_id, link.glpi_id);
            }
        }
        LinksAction::Import { path } => {
            let added = app.import_links(&path).await?;
            println!("Imported {added} links from {path}.");
        }
        LinksAction::Export { path } => {
            let written = app.export_links(&path).await?;
            println!("Exported {written} links to {path}.");
        }
    }
    Ok(())
}

async fn handle_users(app: &JiraGlpiSync, action: UsersAction) -> anyhow::Result<()> {
    match action {
        UsersAction::Refresh => {
            let settings = jira_glpi_sync::Settings::from_env()?;
            let written = app.refresh_users(&settings).await?;
            println!("Mapped {written} identities from GLPI.");
        }
        UsersAction::List => {
            let users = app.list_users().await?;
            if users.is_empty() {
                println!("No users mapped. Run 'jira-glpi-sync users refresh' first.");
            }
            for user in users {
                println!("{:<40} {:>6}  ({})", user.identity, user.glpi_user_id, user.source);
            }
        }
        UsersAction::Set {
            identity,
            glpi_user_id,
        } => {
            app.set_user(&identity, glpi_user_id).await?;
            println!("Mapped '{identity}' to GLPI user {glpi_user_id}.");
        }
    }
    Ok(())
}

fn print_sync_report(report: &jira_glpi_sync::SyncReport) {
    println!("Pass: {}{}", report.pass, if report.dry_run { " (dry run)" } else { "" });
    println!("  Status:  {:?}", report.status);
    println!("  Seen:    {} items", report.items_seen);
    println!("  Created: {}", report.created);
    println!("  Updated: {}", report.updated);
    println!("  Deleted: {}", report.deleted);
    println!("  Skipped: {}", report.skipped);
    println!("  Failed:  {}", report.failed);
    if let Some(ref err) = report.error {
        println!("  Error:   {err}");
    }
}
