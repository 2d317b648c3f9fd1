//! AddrSync command-line tool.
//!
//! Generates and validates configuration files, looks users up in the
//! configured directory, runs (or previews) the login-time identity
//! reconciliation by hand, and lists stored identities.

mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use tracing_subscriber::EnvFilter;

use addrsync_core::config::AppConfig;
use addrsync_core::db::Database;
use addrsync_core::directory::{DirectoryConnector, DirectoryLookup, LdapConnector, SearchQuery};
use addrsync_core::identity::{parse, IdentityStore};
use addrsync_core::sync_engine::{LoginEvent, SyncOrchestrator, SyncOutcome, SyncPlan};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// AddrSync command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "addrsync",
    version,
    about = "Keep mail identities in sync with an LDAP directory"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(
        short,
        long,
        global = true,
        default_value = "/etc/addrsync/config.toml"
    )]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./addrsync.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,

    /// Look a user up in the directory and show the parsed identity.
    Lookup {
        /// Username (`uid`) to look up.
        username: String,

        /// IMAP host the user logs in to.
        #[arg(long)]
        host: String,

        /// Substring search across the configured search fields instead of
        /// an exact `uid` match.
        #[arg(long)]
        any_field: bool,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Reconcile one user's identities as a login would.
    Sync {
        /// Username (`uid`) of the account.
        username: String,

        /// IMAP host the user logs in to.
        #[arg(long)]
        host: String,

        /// Local user id owning the identities.
        #[arg(long)]
        user_id: i64,

        /// Show what would change without writing anything.
        #[arg(long)]
        dry_run: bool,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// List the stored identities of a user.
    Identities {
        /// Local user id.
        #[arg(long)]
        user_id: i64,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{:#}", e)));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = expand_tilde(&cli.config);

    match cli.command {
        Commands::Init { output } => {
            init_logging(None);
            cmd_init(&output)
        }
        Commands::Validate => {
            init_logging(None);
            cmd_validate(&config_path)
        }
        command => {
            let config = load_config(&config_path)?;
            init_logging(Some(&config.general.log_level));

            match command {
                Commands::Lookup {
                    username,
                    host,
                    any_field,
                    json,
                } => cmd_lookup(&config, &username, &host, any_field, json).await,
                Commands::Sync {
                    username,
                    host,
                    user_id,
                    dry_run,
                    json,
                } => {
                    let event = LoginEvent::new(username, host, user_id);
                    cmd_sync(&config, &event, dry_run, json).await
                }
                Commands::Identities { user_id } => cmd_identities(&config, user_id),
                Commands::Init { .. } | Commands::Validate => Ok(()),
            }
        }
    }
}

/// `RUST_LOG` wins, then the configured level, then `warn`.
fn init_logging(level: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.unwrap_or("warn")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn load_config(path: &Path) -> Result<AppConfig> {
    AppConfig::load_and_resolve(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

fn open_database(config: &AppConfig) -> Result<Database> {
    let db = Database::new(config.general.database_path()).context("failed to open database")?;
    db.initialize().context("failed to initialize database")?;
    Ok(db)
}

/// Expand a leading `~/` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

const DEFAULT_CONFIG: &str = r#"# AddrSync configuration

[general]
log_level = "info"
data_dir = "/var/lib/addrsync"

[directory]
# Address book used for synchronization.
addressbook = "corp"
# Log LDAP filters and result counts at info level.
debug = false
# One domain for every host, or a table:
# [directory.mail_domain]
# "imap.example.com" = "example.com"
mail_domain = "example.com"

[directory.addressbooks.corp]
url = "ldaps://ldap.example.com:636"
# %d expands to the mail domain, %dc to its dc= components.
base_dn = "ou=people,%dc"
bind_dn = "cn=reader,%dc"
bind_password_env = "ADDRSYNC_LDAP_PASSWORD"
filter = "(objectClass=inetOrgPerson)"
scope = "sub"
timeout_secs = 5
search_fields = ["mail", "cn"]
fieldmap = [
  { field = "firstname", attribute = "givenName" },
  { field = "surname",   attribute = "sn" },
  { field = "email",     attribute = "mail" },
  { field = "aliases",   attribute = "mailAlternateAddress" },
]

[hooks]
# Only create identities in these domains; empty allows every domain.
allowed_domains = []
"#;

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, DEFAULT_CONFIG).context("failed to write config file")?;

    println!(
        "{}",
        style::success(&format!("Default configuration written to {}", output.display()))
    );
    println!();
    println!("Next steps:");
    println!("  1. Edit the directory section for your LDAP server");
    println!("  2. Export the bind password variable (ADDRSYNC_LDAP_PASSWORD)");
    println!(
        "  3. Validate with: addrsync validate --config {}",
        output.display()
    );

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("{}", style::success("TOML structure is valid"));

    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    println!("{}", style::success("Environment variable references processed"));

    if let Err(e) = config.validate() {
        println!("{}", style::error(&format!("Validation error: {}", e)));
        anyhow::bail!("configuration validation failed");
    }
    println!("{}", style::success("All required fields are valid"));

    let directory = &config.directory;
    println!();
    println!("{}", style::header("Configuration summary"));
    println!("  Address book  : {}", directory.addressbook);
    if let Some(book) = directory.selected() {
        println!("  LDAP URL      : {}", book.url);
        println!("  Base DN       : {}", book.base_dn);
        println!(
            "  Bind DN       : {}",
            book.bind_dn.as_deref().unwrap_or("(anonymous)")
        );
        if book.bind_dn.is_some() && book.bind_password.is_none() {
            println!("{}", style::warn("  Bind password is NOT SET"));
        }
        println!("  Timeout       : {}s", book.timeout_secs);
        println!(
            "  Field map     : {}",
            book.fieldmap
                .iter()
                .map(|m| format!("{}={}", m.field, m.attribute))
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    println!(
        "  Allowed domains: {}",
        if config.hooks.allowed_domains.is_empty() {
            "(all)".to_string()
        } else {
            config.hooks.allowed_domains.join(", ")
        }
    );
    println!("  Database      : {}", config.general.database_path().display());
    println!();
    println!("Configuration is valid.");

    Ok(())
}

async fn cmd_lookup(
    config: &AppConfig,
    username: &str,
    host: &str,
    any_field: bool,
    json: bool,
) -> Result<()> {
    let connector = LdapConnector::from_config(&config.directory)
        .context("selected address book is not configured")?;
    let mail_domain = config.directory.mail_domain(host);

    let mut client = connector
        .connect(&mail_domain)
        .await
        .with_context(|| format!("failed to connect to directory for {}", mail_domain))?;

    let query = if any_field {
        SearchQuery::any_field(username, false)
    } else {
        SearchQuery::exact("uid", username)
    };
    let results = client.search(&query).await.context("directory search failed")?;

    let parsed: Vec<_> = results
        .records
        .iter()
        .map(|record| (record.id.clone(), parse(record)))
        .collect();

    if json {
        let entries: Vec<serde_json::Value> = parsed
            .iter()
            .map(|(dn, identity)| serde_json::json!({ "dn": dn, "identity": identity }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if parsed.is_empty() {
        println!("{}", style::warn(&format!("No directory entry matches '{}'", username)));
        return Ok(());
    }

    for (dn, identity) in &parsed {
        println!();
        println!("{}", style::header(dn.as_deref().unwrap_or("(no DN)")));
        println!("  Name     : {}", identity.display_name);
        println!(
            "  Primary  : {}",
            identity.primary_email.as_deref().unwrap_or("(none)")
        );
        for email in &identity.email_list {
            println!("  Address  : {}", email);
        }
    }
    println!();

    if parsed.len() > 1 {
        println!(
            "{}",
            style::warn(&format!(
                "{} entries match; a login would not synchronize",
                parsed.len()
            ))
        );
    }

    Ok(())
}

async fn cmd_sync(config: &AppConfig, event: &LoginEvent, dry_run: bool, json: bool) -> Result<()> {
    let db = open_database(config)?;
    let orchestrator = SyncOrchestrator::from_config(&db, config)
        .context("failed to set up the orchestrator")?;

    if dry_run {
        let plan = orchestrator
            .plan(event)
            .await
            .context("failed to plan reconciliation")?;

        if json {
            println!("{}", serde_json::to_string_pretty(&plan)?);
            return Ok(());
        }

        match plan {
            SyncPlan::Aborted(reason) => {
                println!("{}", style::warn(&format!("Would abort: {}", reason)));
            }
            SyncPlan::Ready { identity, diff } => {
                println!("{}", style::header(&format!("Plan for {}", identity.display_name)));
                if diff.is_empty() {
                    println!("  {}", style::dim("identities are up to date"));
                }
                for create in &diff.to_create {
                    let label = if create.standard {
                        format!("{} (standard)", create.email)
                    } else {
                        create.email.clone()
                    };
                    println!("  {}", style::added(&label));
                }
                for stale in &diff.to_delete {
                    println!("  {}", style::removed(&stale.email));
                }
            }
        }
        return Ok(());
    }

    let outcome = orchestrator
        .on_login(event)
        .await
        .context("reconciliation failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    match outcome {
        SyncOutcome::Aborted(reason) => {
            println!("{}", style::warn(&format!("Aborted: {}", reason)));
        }
        SyncOutcome::Applied(stats) => {
            println!(
                "{}",
                style::success(&format!(
                    "Synchronized {}: {} created, {} deleted, {} vetoed, {} already stored",
                    event.username, stats.created, stats.deleted, stats.vetoed, stats.existing
                ))
            );
        }
    }

    Ok(())
}

fn cmd_identities(config: &AppConfig, user_id: i64) -> Result<()> {
    let db = open_database(config)?;
    let identities = db
        .list_emails(user_id)
        .context("failed to list identities")?;

    if identities.is_empty() {
        println!("No identities found for user {}.", user_id);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["ID", "Email", "Name", "Standard"]);

    for identity in &identities {
        let standard = if identity.standard {
            Cell::new("✓").fg(Color::Green)
        } else {
            Cell::new("")
        };
        table.add_row(vec![
            Cell::new(identity.identity_id),
            Cell::new(&identity.email),
            Cell::new(&identity.name),
            standard,
        ]);
    }

    println!("{}", table);
    println!("{} identit(ies) shown", identities.len());

    Ok(())
}
