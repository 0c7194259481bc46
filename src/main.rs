mod auth;
mod config;
mod db;
mod gmail;
mod models;
mod rules;
mod store;
mod sync;

use crate::config::{Config, DEFAULT_CONFIG_PATH};
use crate::db::Database;
use crate::gmail::GmailClient;
use crate::rules::{ActionExecutor, EngineOptions, RuleEngine, RuleSet};
use crate::store::{MailProvider, MessageSelector, MessageStore};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use google_gmail1::Gmail;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(
    name = "gmail-rules",
    version,
    about = "Sync Gmail into a local database and apply filtering rules to it"
)]
struct Cli {
    /// Settings file.
    #[clap(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Verbose logging (same as RUST_LOG=debug).
    #[clap(long, global = true)]
    debug: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the local database schema.
    InitDb,

    /// Fetch new mail for an account into the local database.
    UpdateMails(AccountArgs),

    /// Apply a rule file to an account's stored mail.
    ProcessRules(ProcessRulesArgs),

    /// Validate a rule file without touching any mail.
    CheckRules {
        #[clap(long)]
        rules_file: PathBuf,
    },

    /// Forget the cached OAuth token for an account.
    ResetToken {
        #[clap(long)]
        email: String,
    },
}

#[derive(Args, Debug)]
struct AccountArgs {
    #[clap(long)]
    email: String,

    /// OAuth client secret; defaults to `credentials_file` from settings.
    #[clap(long)]
    creds_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ProcessRulesArgs {
    #[clap(flatten)]
    account: AccountArgs,

    #[clap(long)]
    rules_file: PathBuf,

    /// Report what would change without changing anything.
    #[clap(long)]
    dry_run: bool,

    /// Only update the local database, never Gmail.
    #[clap(long)]
    local_only: bool,

    /// Print the full run report as JSON.
    #[clap(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::InitDb => {
            open_database(&config).await?;
            println!("Database ready at {}", config.database_url);
        }
        Commands::UpdateMails(args) => {
            let db = open_database(&config).await?;
            let client = connect(&config, &args).await?;
            let report = sync::update_mails(&client, &db, &args.email, config.sync.page_size).await?;
            println!(
                "Stored {} new messages ({} listed, {} ignored, {} failed)",
                report.stored, report.listed, report.skipped, report.failed
            );
        }
        Commands::ProcessRules(args) => return process_rules(&config, args).await,
        Commands::CheckRules { rules_file } => {
            let rules = load_rules(&rules_file)?;
            println!("{}: {} rules OK", rules_file.display(), rules.len());
        }
        Commands::ResetToken { email } => {
            if auth::RingStorage::new(&email).clear_token()? {
                println!("Token cleared for {}. The next run will ask you to sign in again.", email);
            } else {
                println!("No stored token for {}", email);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn process_rules(config: &Config, args: ProcessRulesArgs) -> Result<ExitCode> {
    // Rule files are validated before anything else is opened.
    let rules = load_rules(&args.rules_file)?;
    if rules.is_empty() {
        warn!(file = %args.rules_file.display(), "Rule file has no rules");
    }

    let store: Arc<dyn MessageStore> = Arc::new(open_database(config).await?);

    let provider: Option<Arc<dyn MailProvider>> =
        if args.local_only || args.dry_run || !config.rules.sync_remote {
            info!("Gmail will not be updated");
            None
        } else {
            Some(Arc::new(connect(config, &args.account).await?))
        };

    let executor = ActionExecutor::new(store.clone(), provider, config.rules.provider_timeout())
        .dry_run(args.dry_run);
    let engine = RuleEngine::new(
        store,
        executor,
        EngineOptions {
            first_match_wins: config.rules.first_match_wins,
        },
    );

    let report = engine
        .run_selected(&rules, &MessageSelector::for_account(&args.account.email))
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for msg in report.messages.iter().filter(|m| !m.matched.is_empty()) {
            for matched in &msg.matched {
                for result in &matched.execution.actions {
                    println!("{}  [{}] {} -> {:?}", msg.message_id, matched.rule, result.action, result.outcome);
                }
            }
        }
        println!("{}", report.summary());
    }

    Ok(if report.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn load_rules(path: &Path) -> Result<RuleSet> {
    RuleSet::load(path).with_context(|| format!("Invalid rule file {}", path.display()))
}

async fn open_database(config: &Config) -> Result<Database> {
    let db = Database::new(&config.database_url).await?;
    db.run_migrations().await?;
    Ok(db)
}

async fn connect(config: &Config, args: &AccountArgs) -> Result<GmailClient> {
    let creds = args
        .creds_file
        .as_deref()
        .unwrap_or(config.credentials_file.as_path());
    let secret = auth::Authenticator::load_secret(creds).await?;
    let authenticator = auth::Authenticator::authenticate(secret, &args.email).await?;

    let hub = Gmail::new(
        hyper::Client::builder().build(
            hyper_rustls::HttpsConnectorBuilder::new()
                .with_native_roots()
                .context("Failed to load native TLS roots")?
                .https_only()
                .enable_http1()
                .build(),
        ),
        authenticator,
    );

    Ok(GmailClient::new(hub))
}
