use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use qw_broker::accounts::{
    change_password, deprovision_account, provision_new_account, strong_password,
};
use qw_config::{GuardianConfig, LoadedConfig, ResolvedSecrets};
use qw_daemon::wiring;
use qw_db::{PgPool, PgStore, Store};
use qw_reconcile::TickReport;

#[derive(Parser)]
#[command(name = "qw")]
#[command(about = "queue-warden operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Print the effective config hash + canonical JSON
    ConfigHash,

    /// Run a single reconciliation pass and print what changed
    Tick,

    /// Owner management
    Owner {
        #[command(subcommand)]
        cmd: OwnerCmd,
    },

    /// Broker account management
    Account {
        #[command(subcommand)]
        cmd: AccountCmd,
    },

    /// Mirrored queue management
    Queue {
        #[command(subcommand)]
        cmd: QueueCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    /// Apply SQL migrations
    Migrate,
}

#[derive(Subcommand)]
enum OwnerCmd {
    /// Register a person who can own accounts
    Add {
        email: String,
        /// Receives monitoring alerts
        #[arg(long, default_value_t = false)]
        admin: bool,
    },
    List,
}

#[derive(Subcommand)]
enum AccountCmd {
    /// Create the broker user and its record
    Create {
        username: String,
        /// Owner email (repeatable); owners must already exist
        #[arg(long = "owner", required = true)]
        owners: Vec<String>,
        #[arg(long)]
        password: String,
    },
    /// Delete the broker user, then the record and its queues
    Delete { username: String },
    ChangePassword {
        username: String,
        #[arg(long)]
        password: String,
    },
    AddOwner { username: String, email: String },
    RemoveOwner { username: String, email: String },
    List,
}

#[derive(Subcommand)]
enum QueueCmd {
    List,
    /// Exempt a queue from deletion (warnings still apply)
    Unbounded { name: String, state: Toggle },
    /// Send this queue's notifications to an extra address
    Subscribe { name: String, email: String },
    Unsubscribe { name: String, email: String },
    /// Live broker bindings of a queue, marked with whether they are mirrored
    Bindings { name: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let loaded = qw_config::load_from_env()?;
    let secrets = qw_config::resolve_secrets(|k| std::env::var(k).ok());
    let cfg = &loaded.config;

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = connect(cfg, &secrets).await?;
            match cmd {
                DbCmd::Status => {
                    let s = qw_db::status(&pool).await?;
                    println!("db_ok={} has_queues_table={}", s.ok, s.has_queues_table);
                }
                DbCmd::Migrate => {
                    qw_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash => print_config(&loaded),

        Commands::Tick => {
            let store: Arc<dyn Store> = Arc::new(PgStore::new(connect(cfg, &secrets).await?));
            let broker = wiring::broker_from_config(cfg, &secrets)?;
            let notifier = wiring::notifier_from_config(cfg, &secrets)?;
            let engine = wiring::engine_from_config(cfg, broker, store, notifier)?;
            let report = engine.tick().await.context("tick failed")?;
            print_report(&report);
        }

        Commands::Owner { cmd } => {
            if let OwnerCmd::Add { email, .. } = &cmd {
                check_email(email)?;
            }
            let store = PgStore::new(connect(cfg, &secrets).await?);
            match cmd {
                OwnerCmd::Add { email, admin } => {
                    let owner = store.create_owner(&email, admin).await?;
                    println!(
                        "owner_id={} email={} admin={}",
                        owner.id, owner.email, owner.admin
                    );
                }
                OwnerCmd::List => {
                    for o in store.list_owners().await? {
                        println!("owner_id={} email={} admin={}", o.id, o.email, o.admin);
                    }
                }
            }
        }

        Commands::Account { cmd } => run_account(cmd, cfg, &secrets).await?,

        Commands::Queue { cmd } => {
            if let QueueCmd::Subscribe { email, .. } = &cmd {
                check_email(email)?;
            }
            let store = PgStore::new(connect(cfg, &secrets).await?);
            match cmd {
                QueueCmd::List => {
                    for q in store.list_queues().await? {
                        let account = q
                            .account_id
                            .map(|id| id.to_string())
                            .unwrap_or_else(|| "none".to_string());
                        println!(
                            "queue={} size={} durable={} unbounded={} warned={} account_id={}",
                            q.name, q.size, q.durable, q.unbounded, q.warned, account
                        );
                    }
                }
                QueueCmd::Unbounded { name, state } => {
                    let on = matches!(state, Toggle::On);
                    store.set_queue_unbounded(&name, on).await?;
                    println!("queue={name} unbounded={on}");
                }
                QueueCmd::Subscribe { name, email } => {
                    require_queue(&store, &name).await?;
                    store.add_queue_notification(&name, &email).await?;
                    println!("queue={name} subscribed={}", qw_schemas::normalize_email(&email));
                }
                QueueCmd::Unsubscribe { name, email } => {
                    store.remove_queue_notification(&name, &email).await?;
                    println!("queue={name} unsubscribed={}", qw_schemas::normalize_email(&email));
                }
                QueueCmd::Bindings { name } => {
                    let broker = wiring::broker_from_config(cfg, &secrets)?;
                    let live =
                        qw_broker::tracked_queue_bindings(broker.as_ref(), &cfg.rabbit.vhost, &name)
                            .await?;
                    let stored = store.queue_bindings(&name).await?;
                    for b in &live {
                        let mirrored = stored.iter().any(|r| r.pair() == b.pair());
                        println!(
                            "exchange={} routing_key={} mirrored={}",
                            b.source, b.routing_key, mirrored
                        );
                    }
                }
            }
        }
    }

    Ok(())
}

async fn run_account(cmd: AccountCmd, cfg: &GuardianConfig, secrets: &ResolvedSecrets) -> Result<()> {
    let vhost = cfg.rabbit.vhost.as_str();
    match cmd {
        AccountCmd::Create {
            username,
            owners,
            password,
        } => {
            // Name and password checks run before touching the database.
            check_account_name(cfg, &username)?;
            if !strong_password(&password) {
                bail!("password must be at least 6 characters and contain a digit and a letter");
            }

            let store = PgStore::new(connect(cfg, secrets).await?);
            if store.account_by_username(&username).await?.is_some() {
                bail!("account {username} already exists");
            }
            let mut owner_ids = Vec::with_capacity(owners.len());
            for email in &owners {
                match store.owner_by_email(email).await? {
                    Some(o) => owner_ids.push(o.id),
                    None => bail!("unknown owner {email}; register it with `qw owner add`"),
                }
            }

            let broker = wiring::broker_from_config(cfg, secrets)?;
            if !provision_new_account(broker.as_ref(), vhost, &username, &password).await? {
                bail!("broker user {username} already exists");
            }
            let account = store.create_account(&username, &owner_ids).await?;
            println!("account_id={} username={}", account.id, account.username);
        }

        AccountCmd::Delete { username } => {
            let store = PgStore::new(connect(cfg, secrets).await?);
            let account = require_account(&store, &username).await?;
            let broker = wiring::broker_from_config(cfg, secrets)?;
            deprovision_account(broker.as_ref(), &username).await?;
            store.delete_account(account.id).await?;
            println!("account_deleted={username}");
        }

        AccountCmd::ChangePassword { username, password } => {
            if !strong_password(&password) {
                bail!("password must be at least 6 characters and contain a digit and a letter");
            }
            let store = PgStore::new(connect(cfg, secrets).await?);
            require_account(&store, &username).await?;
            let broker = wiring::broker_from_config(cfg, secrets)?;
            change_password(broker.as_ref(), vhost, &username, &password).await?;
            println!("password_changed={username}");
        }

        AccountCmd::AddOwner { username, email } => {
            let store = PgStore::new(connect(cfg, secrets).await?);
            let account = require_account(&store, &username).await?;
            let owner = require_owner(&store, &email).await?;
            store.add_account_owner(account.id, owner.id).await?;
            println!("account={username} owner_added={}", owner.email);
        }

        AccountCmd::RemoveOwner { username, email } => {
            let store = PgStore::new(connect(cfg, secrets).await?);
            let account = require_account(&store, &username).await?;
            let owner = require_owner(&store, &email).await?;
            store.remove_account_owner(account.id, owner.id).await?;
            println!("account={username} owner_removed={}", owner.email);
        }

        AccountCmd::List => {
            let store = PgStore::new(connect(cfg, secrets).await?);
            for a in store.list_accounts().await? {
                let owners: Vec<String> = store
                    .account_owners(a.id)
                    .await?
                    .into_iter()
                    .map(|o| o.email)
                    .collect();
                println!(
                    "account_id={} username={} owners={}",
                    a.id,
                    a.username,
                    owners.join(",")
                );
            }
        }
    }
    Ok(())
}

fn check_account_name(cfg: &GuardianConfig, username: &str) -> Result<()> {
    if username.is_empty() || username.contains('/') {
        bail!("invalid account name {username:?}");
    }
    if let Some(reserved) = cfg.reserved.compile()? {
        if reserved.is_reserved(username) {
            bail!("{}", reserved.rejection_message());
        }
    }
    Ok(())
}

/// Addresses are checked with the same parser the SMTP notifier uses.
fn check_email(email: &str) -> Result<()> {
    let normalized = qw_schemas::normalize_email(email);
    normalized
        .parse::<lettre::Address>()
        .map_err(|e| anyhow::anyhow!("invalid email address {email:?}: {e}"))?;
    Ok(())
}

async fn connect(cfg: &GuardianConfig, secrets: &ResolvedSecrets) -> Result<PgPool> {
    let url = secrets.require_database_url()?;
    qw_db::connect(url, cfg.database.max_connections).await
}

async fn require_account(store: &PgStore, username: &str) -> Result<qw_schemas::Account> {
    store
        .account_by_username(username)
        .await?
        .with_context(|| format!("unknown account {username}"))
}

async fn require_owner(store: &PgStore, email: &str) -> Result<qw_schemas::Owner> {
    store
        .owner_by_email(email)
        .await?
        .with_context(|| format!("unknown owner {email}"))
}

async fn require_queue(store: &PgStore, name: &str) -> Result<()> {
    if store.queue_by_name(name).await?.is_none() {
        bail!("unknown queue {name}");
    }
    Ok(())
}

fn print_config(loaded: &LoadedConfig) {
    println!("config_hash={}", loaded.config_hash);
    println!("{}", loaded.canonical_json);
}

fn print_report(r: &TickReport) {
    println!("observed={}", r.observed);
    println!("created={}", r.created);
    println!("accounts_created={}", r.accounts_created);
    println!("warned={}", r.warned);
    println!("normal={}", r.normal);
    println!("deleted={}", r.deleted);
    println!("vanished={}", r.vanished);
    println!("bindings_added={}", r.bindings_added);
    println!("bindings_removed={}", r.bindings_removed);
    println!("skipped={}", r.skipped);
}
