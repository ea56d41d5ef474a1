//! Portal CLI - command-line access to the client portal
//!
//! Signs in against the hosted backend, keeps the session in the local data
//! directory and lists the caller's projects, payments, quotes and PV documents.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use portal_applications::{
    BootstrapOutcome, FileLocalStore, LoginOutcome, PortalServices, ProjectStatus,
    ResilientClient, SessionManager, SessionManagerConfig,
};
use portal_backend::{ApiClientConfig, HttpBackend};
use portal_core::{
    init_logging, log_operation_error, log_operation_start, log_operation_success, PortalConfig,
};
use serde::Serialize;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "portal")]
#[command(about = "Client portal from the command line")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with email and password
    Login {
        /// Account email
        email: String,

        /// Password. When omitted it is read from stdin, and the terminal
        /// echoes what you type; pipe it in to keep it off screen.
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Sign out and forget the local session
    Logout,

    /// Show the signed-in user and role
    Whoami,

    /// Dashboard summary of everything visible to you
    Overview,

    /// List projects
    Projects {
        /// Only projects with this status (planned, in_progress, ...)
        #[arg(long)]
        status: Option<String>,
    },

    /// List payments
    Payments {
        /// Only payments of this project
        #[arg(long)]
        project: Option<String>,

        /// Show the outstanding total only
        #[arg(long)]
        outstanding: bool,
    },

    /// List quotes, or answer one
    Quotes {
        /// Accept the quote with this id
        #[arg(long, conflicts_with = "reject")]
        accept: Option<String>,

        /// Reject the quote with this id
        #[arg(long)]
        reject: Option<String>,
    },

    /// List PV documents, or sign one
    Pv {
        /// Sign the document with this id
        #[arg(long, requires = "signer")]
        sign: Option<String>,

        /// Name written on the signature
        #[arg(long)]
        signer: Option<String>,
    },

    /// Manage configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,

        /// Initialize default configuration
        #[arg(long)]
        init: bool,

        /// Validate current configuration
        #[arg(long)]
        validate: bool,
    },
}

/// Everything a signed-in command needs
struct Portal {
    manager: SessionManager,
    services: PortalServices,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    let mut logging_config = config.logging.clone();
    if cli.verbose {
        logging_config.level = "debug".to_string();
        logging_config.filter_directives = vec![
            "portal_core=debug".to_string(),
            "portal_backend=debug".to_string(),
            "portal_applications=debug".to_string(),
        ];
    }
    init_logging(&logging_config)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Starting portal CLI v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Config {
            show,
            init,
            validate,
        } => handle_config(&config, cli.config.as_deref(), show, init, validate),
        Commands::Login { email, password } => handle_login(&config, &email, password).await,
        Commands::Logout => handle_logout(&config).await,
        Commands::Whoami => handle_whoami(&config, cli.json).await,
        Commands::Overview => {
            let portal = signed_in(&config).await?;
            let overview = portal.services.overview().await?;
            if cli.json {
                return print_json(&overview);
            }
            println!("📁 Projects:  {} ({} active)", overview.projects.len(), overview.active_projects());
            println!("💰 Payments:  {} ({:.2} outstanding)", overview.payments.len(), overview.outstanding_amount());
            println!("📝 Quotes:    {}", overview.quotes.len());
            println!("✍️  Documents: {} ({} awaiting signature)", overview.documents.len(), overview.pending_signatures());
            Ok(())
        }
        Commands::Projects { status } => {
            let portal = signed_in(&config).await?;
            let projects = match status {
                Some(status) => {
                    let status = parse_project_status(&status)?;
                    portal.services.projects.list_by_status(status).await?
                }
                None => portal.services.projects.list().await?,
            };
            if cli.json {
                return print_json(&projects);
            }
            for project in &projects {
                println!("{:<38} {:<12} {}", project.id, format!("{:?}", project.status), project.name);
            }
            println!("{} project(s)", projects.len());
            Ok(())
        }
        Commands::Payments {
            project,
            outstanding,
        } => {
            let portal = signed_in(&config).await?;
            if outstanding {
                let total = portal.services.payments.outstanding_total().await?;
                if cli.json {
                    return print_json(&serde_json::json!({ "outstanding": total }));
                }
                println!("💰 Outstanding: {:.2}", total);
                return Ok(());
            }

            let payments = match project {
                Some(project_id) => portal.services.payments.list_for_project(&project_id).await?,
                None => portal.services.payments.list().await?,
            };
            if cli.json {
                return print_json(&payments);
            }
            for payment in &payments {
                println!("{:<38} {:>12.2} {:?}", payment.id, payment.amount, payment.status);
            }
            println!("{} payment(s)", payments.len());
            Ok(())
        }
        Commands::Quotes { accept, reject } => {
            let portal = signed_in(&config).await?;
            let answer = accept.map(|id| (id, true)).or(reject.map(|id| (id, false)));

            if let Some((id, accepted)) = answer {
                log_operation_start!("answer_quote", quote_id = %id, accepted = accepted);
                let quote = portal.services.quotes.respond(&id, accepted).await.map_err(|e| {
                    log_operation_error!("answer_quote", e, quote_id = %id);
                    e
                })?;
                log_operation_success!("answer_quote", quote_id = %id);
                println!("✅ Quote {} is now {:?}", quote.id, quote.status);
                return Ok(());
            }

            let quotes = portal.services.quotes.list().await?;
            if cli.json {
                return print_json(&quotes);
            }
            for quote in &quotes {
                println!(
                    "{:<38} {:>12.2} {:<9} {}",
                    quote.id,
                    quote.amount,
                    format!("{:?}", quote.status),
                    quote.valid_until.map(|d| d.to_string()).unwrap_or_default()
                );
            }
            println!("{} quote(s)", quotes.len());
            Ok(())
        }
        Commands::Pv { sign, signer } => {
            let portal = signed_in(&config).await?;

            if let (Some(id), Some(signer)) = (sign, signer) {
                log_operation_start!("sign_document", document_id = %id);
                let document = portal.services.documents.sign(&id, &signer).await.map_err(|e| {
                    log_operation_error!("sign_document", e, document_id = %id);
                    e
                })?;
                log_operation_success!("sign_document", document_id = %id);
                println!("✍️  {} signed by {}", document.title, signer);
                return Ok(());
            }

            let documents = portal.services.documents.list().await?;
            if cli.json {
                return print_json(&documents);
            }
            for document in &documents {
                println!("{:<38} {:<8} {}", document.id, format!("{:?}", document.status), document.title);
            }
            println!("{} document(s)", documents.len());
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<PortalConfig> {
    let config = match path {
        Some(path) => PortalConfig::from_file(path)
            .with_context(|| format!("Loading configuration from {}", path.display()))?,
        None => {
            let default_path = PortalConfig::default_path();
            if default_path.exists() {
                PortalConfig::from_file(&default_path)?
            } else {
                PortalConfig::default()
            }
        }
    };
    Ok(config.with_env_overrides())
}

/// Wire the HTTP backend, local session storage and session manager together
fn build_portal(config: &PortalConfig) -> anyhow::Result<Portal> {
    let data_dir = config.storage.resolved_data_dir();
    debug!(data_dir = %data_dir.display(), "Opening local storage");
    let local = Arc::new(FileLocalStore::open(&data_dir)?);

    let backend = Arc::new(HttpBackend::new(
        ApiClientConfig::from_portal_config(config),
        local.clone(),
    )?);
    let data = ResilientClient::from_config(backend.clone(), &config.access);

    let manager = SessionManager::new(
        backend,
        data.clone(),
        local,
        SessionManagerConfig::from_portal_config(config),
    );
    let services = PortalServices::new(data, manager.store().clone());

    Ok(Portal { manager, services })
}

/// Restore the persisted session and settle the role, or fail
async fn signed_in(config: &PortalConfig) -> anyhow::Result<Portal> {
    let portal = build_portal(config)?;

    match portal.manager.bootstrap().await {
        BootstrapOutcome::Authenticated { .. } => {}
        BootstrapOutcome::Unauthenticated => bail!("Not signed in. Run `portal login <email>` first"),
        BootstrapOutcome::Failed { message } => bail!("Session check failed: {}", message),
        BootstrapOutcome::TimedOut => bail!("Session check timed out, try again"),
    }

    portal.manager.refresh_role().await;
    Ok(portal)
}

async fn handle_login(
    config: &PortalConfig,
    email: &str,
    password: Option<String>,
) -> anyhow::Result<()> {
    let password = match password {
        Some(password) => password,
        None => read_password()?,
    };

    let portal = build_portal(config)?;
    match portal.manager.login(email, &password).await {
        LoginOutcome::Success { session } => {
            let role = portal.manager.refresh_role().await.map(|r| r.role);
            println!(
                "✅ Signed in as {}",
                session.user.email.as_deref().unwrap_or(&session.user.id)
            );
            if let Some(role) = role {
                println!("🔑 Role: {}", role);
            }
            Ok(())
        }
        LoginOutcome::Failure { message } => bail!("Sign-in failed: {}", message),
    }
}

async fn handle_logout(config: &PortalConfig) -> anyhow::Result<()> {
    let portal = build_portal(config)?;
    portal.manager.bootstrap().await;

    let outcome = portal.manager.logout().await;
    if let Some(error) = outcome.error {
        println!("⚠️  Backend sign-out failed: {}", error);
    }
    println!("👋 Signed out, local session cleared");
    Ok(())
}

async fn handle_whoami(config: &PortalConfig, json: bool) -> anyhow::Result<()> {
    let portal = signed_in(config).await?;
    let snapshot = portal.manager.snapshot();

    if json {
        return print_json(&serde_json::json!({
            "user_id": snapshot.user_id(),
            "email": snapshot.user.as_ref().and_then(|u| u.email.clone()),
            "role": snapshot.role.map(|r| r.to_string()),
        }));
    }

    if let Some(user) = &snapshot.user {
        println!("👤 {}", user.display_string());
    }
    match snapshot.role {
        Some(role) => println!("🔑 Role: {}", role),
        None => println!("🔑 Role: unknown"),
    }
    Ok(())
}

fn handle_config(
    config: &PortalConfig,
    path: Option<&Path>,
    show: bool,
    init: bool,
    validate: bool,
) -> anyhow::Result<()> {
    if init {
        let config_path = path.map(Path::to_path_buf).unwrap_or_else(PortalConfig::default_path);
        if config_path.exists() {
            bail!("Configuration already exists at {}", config_path.display());
        }
        PortalConfig::default().save_to_file(&config_path)?;
        println!("✅ Configuration initialized at: {}", config_path.display());
        println!("📝 Set backend.url and backend.anon_key before signing in.");
    }

    if show {
        println!("📋 Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    if validate {
        match config.validate() {
            Ok(()) => println!("✅ Configuration is valid"),
            Err(e) => {
                println!("❌ Configuration validation failed: {}", e);
                return Err(e.into());
            }
        }
    }

    Ok(())
}

fn parse_project_status(raw: &str) -> anyhow::Result<ProjectStatus> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .with_context(|| format!("Unknown project status '{}'", raw))
}

fn read_password() -> anyhow::Result<String> {
    eprint!("Password (input is shown): ");
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Reading password from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["portal", "--json", "payments", "--outstanding"]).unwrap();
        assert!(cli.json);
        assert!(matches!(
            cli.command,
            Commands::Payments {
                outstanding: true,
                project: None
            }
        ));

        let cli = Cli::try_parse_from(["portal", "pv", "--sign", "pv-1", "--signer", "Jane"]).unwrap();
        assert!(matches!(cli.command, Commands::Pv { sign: Some(_), signer: Some(_) }));
    }

    #[test]
    fn test_sign_requires_signer() {
        assert!(Cli::try_parse_from(["portal", "pv", "--sign", "pv-1"]).is_err());
        assert!(Cli::try_parse_from(["portal", "quotes", "--accept", "q", "--reject", "q"]).is_err());
    }

    #[test]
    fn test_password_help_mentions_echo() {
        let mut command = Cli::command();
        let login = command.find_subcommand_mut("login").unwrap();
        let help = login.render_long_help().to_string();
        assert!(help.contains("echoes"), "{help}");
    }

    #[test]
    fn test_project_status_parsing() {
        assert_eq!(parse_project_status("in_progress").unwrap(), ProjectStatus::InProgress);
        assert!(parse_project_status("bogus").is_err());
    }
}
