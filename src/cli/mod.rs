//! Command-line interface.
//!
//! - `serve` (default) - Run the HTTP server
//! - `config check` - Validate the configuration file
//! - `create-admin` - Create or promote an admin account without starting the server

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::api::setup::{ensure_admin_user, AdminProvision};
use crate::api::validation::{validate_email, validate_name, validate_password};
use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "galleria")]
#[command(author, version, about = "A self-hosted media gallery server", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "GALLERIA_CONFIG", default_value = "galleria.toml")]
    pub config: PathBuf,

    /// Override log level
    #[arg(short, long, env = "GALLERIA_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Subcommand to run (if none, starts the server)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP server
    Serve,

    /// Configuration management commands
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Create an admin account, or promote an existing one
    CreateAdmin {
        /// Account email
        #[arg(long)]
        email: String,
        /// Password for a new account (ignored when promoting)
        #[arg(long, env = "GALLERIA_ADMIN_PASSWORD")]
        password: String,
        /// Display name
        #[arg(long, default_value = "Admin User")]
        name: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Validate configuration file
    Check,
}

impl Cli {
    /// Whether this invocation should start the server
    pub fn is_serve(&self) -> bool {
        matches!(self.command, None | Some(Commands::Serve))
    }
}

/// Run a non-server subcommand
pub async fn run_command(cli: &Cli) -> Result<()> {
    match &cli.command {
        Some(Commands::Config(ConfigCommands::Check)) => cmd_config_check(cli).await,
        Some(Commands::CreateAdmin {
            email,
            password,
            name,
        }) => cmd_create_admin(cli, name, email, password).await,
        // Handled in main.rs
        None | Some(Commands::Serve) => Ok(()),
    }
}

async fn cmd_config_check(cli: &Cli) -> Result<()> {
    let config_path = &cli.config;

    println!("Checking configuration file: {}", config_path.display());
    println!();

    if !config_path.exists() {
        println!(
            "[!!] Configuration file not found: {}",
            config_path.display()
        );
        println!();
        println!("A default configuration will be used when starting the server.");
        return Ok(());
    }

    let config = match Config::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            println!("[!!] Configuration file is invalid!");
            println!();
            println!("Error: {:#}", e);
            anyhow::bail!("Invalid configuration file");
        }
    };

    crate::db::init_in_memory()
        .await
        .context("Database schema failed to apply")?;

    println!("[OK] Configuration file is valid!");
    println!();
    println!("Server:");
    println!("  Address:      {}", config.bind_addr());
    println!("  Data Dir:     {}", config.server.data_dir.display());
    println!("  Frontend:     {}", config.server.frontend_url);
    println!(
        "  Static Dir:   {}",
        config
            .server
            .static_dir
            .as_ref()
            .map(|d| d.display().to_string())
            .unwrap_or_else(|| "(not served)".to_string())
    );
    println!();
    println!("Uploads:");
    println!("  Dir:          {}", config.uploads.dir.display());
    println!(
        "  Max Size:     {}",
        crate::utils::format_size(config.uploads.max_file_size as i64)
    );
    println!("  Types:        {}", config.uploads.allowed_types.join(", "));
    println!();
    println!("Security:");
    println!("  Token TTL:    {} days", config.auth.token_ttl_days);
    println!(
        "  Rate Limit:   {}",
        if config.rate_limit.enabled {
            format!(
                "{} req / {}s (auth: {})",
                config.rate_limit.api_requests_per_window,
                config.rate_limit.window_seconds,
                config.rate_limit.auth_requests_per_window
            )
        } else {
            "Disabled".to_string()
        }
    );
    println!();

    let mut warnings = Vec::new();
    if config.auth.jwt_secret_generated {
        warnings.push("No jwt_secret - a random one is generated on every start");
    }
    if config.rate_limit.trust_proxy_headers {
        warnings.push("Rate limiting trusts X-Forwarded-For; run only behind a proxy that sets it");
    }
    if !config.email.is_configured() {
        warnings.push("SMTP is not configured - OTPs and reset links will only be logged");
    }
    if config.auth.google_client_id.is_none() {
        warnings.push("No google_client_id - Google sign-in is disabled");
    }
    if config.auth.admin_email.is_some() != config.auth.admin_password.is_some() {
        warnings.push("admin_email and admin_password must both be set to seed an admin");
    }
    if !config.rate_limit.enabled {
        warnings.push("Rate limiting is disabled");
    }

    if !warnings.is_empty() {
        println!("Warnings:");
        for warning in warnings {
            println!("  [!] {}", warning);
        }
        println!();
    }

    Ok(())
}

async fn cmd_create_admin(cli: &Cli, name: &str, email: &str, password: &str) -> Result<()> {
    for result in [
        validate_name(name),
        validate_email(email),
        validate_password(password),
    ] {
        result.map_err(|e| anyhow::anyhow!(e))?;
    }

    let config = Config::load(&cli.config)?;
    crate::utils::ensure_dir(&config.server.data_dir)?;
    let db = crate::db::init(&config.server.data_dir).await?;

    match ensure_admin_user(&db, name, email, password).await? {
        AdminProvision::Created => println!("[OK] Created admin account {}", email),
        AdminProvision::Promoted => println!("[OK] Promoted {} to admin", email),
        AdminProvision::AlreadyAdmin => println!("[OK] {} is already an admin", email),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults_to_serve() {
        let cli = Cli::try_parse_from(["galleria"]).unwrap();
        assert!(cli.is_serve());
        assert_eq!(cli.config, PathBuf::from("galleria.toml"));
    }

    #[test]
    fn test_parse_create_admin() {
        let cli = Cli::try_parse_from([
            "galleria",
            "--config",
            "custom.toml",
            "create-admin",
            "--email",
            "root@example.com",
            "--password",
            "secret123",
        ])
        .unwrap();

        assert!(!cli.is_serve());
        match cli.command {
            Some(Commands::CreateAdmin { email, name, .. }) => {
                assert_eq!(email, "root@example.com");
                assert_eq!(name, "Admin User");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_config_check() {
        let cli = Cli::try_parse_from(["galleria", "config", "check"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Config(ConfigCommands::Check))
        ));
    }
}
