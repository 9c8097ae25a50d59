//! Guard - LDAP identity resolution
//!
//! Authenticates a user against an LDAP directory and prints the resolved
//! identity and groups.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use guard_auth::{DirectoryConfig, LdapAuthenticator};
use guard_core::{GuardConfig, LdapOptions, LoggingConfig};
use std::io::BufRead;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "guard")]
#[command(version = guard_core::VERSION)]
#[command(about = "LDAP identity resolution", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "GUARD_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(flatten)]
    ldap: LdapFlags,
}

#[derive(Args)]
struct LdapFlags {
    /// Host or IP of the LDAP server
    #[arg(long = "ldap.server-address", global = true, env = "GUARD_LDAP_SERVER_ADDRESS")]
    server_address: Option<String>,

    /// LDAP server port
    #[arg(long = "ldap.server-port", global = true, env = "GUARD_LDAP_SERVER_PORT")]
    server_port: Option<String>,

    /// Service account DN used to search the directory
    #[arg(long = "ldap.bind-dn", global = true, env = "GUARD_LDAP_BIND_DN")]
    bind_dn: Option<String>,

    /// Service account password
    #[arg(
        long = "ldap.bind-password",
        global = true,
        env = "GUARD_LDAP_BIND_PASSWORD",
        hide_env_values = true
    )]
    bind_password: Option<String>,

    /// Base DN of the user search
    #[arg(long = "ldap.user-search-dn", global = true, env = "GUARD_LDAP_USER_SEARCH_DN")]
    user_search_dn: Option<String>,

    /// Filter for the user search
    #[arg(long = "ldap.user-search-filter", global = true, env = "GUARD_LDAP_USER_SEARCH_FILTER")]
    user_search_filter: Option<String>,

    /// Username attribute
    #[arg(long = "ldap.user-attribute", global = true, env = "GUARD_LDAP_USER_ATTRIBUTE")]
    user_attribute: Option<String>,

    /// Base DN of the group search
    #[arg(long = "ldap.group-search-dn", global = true, env = "GUARD_LDAP_GROUP_SEARCH_DN")]
    group_search_dn: Option<String>,

    /// Filter for the group search
    #[arg(long = "ldap.group-search-filter", global = true, env = "GUARD_LDAP_GROUP_SEARCH_FILTER")]
    group_search_filter: Option<String>,

    /// Group attribute that references members
    #[arg(
        long = "ldap.group-member-attribute",
        global = true,
        env = "GUARD_LDAP_GROUP_MEMBER_ATTRIBUTE"
    )]
    group_member_attribute: Option<String>,

    /// Group attribute holding the group name
    #[arg(
        long = "ldap.group-name-attribute",
        global = true,
        env = "GUARD_LDAP_GROUP_NAME_ATTRIBUTE"
    )]
    group_name_attribute: Option<String>,

    /// Do not verify the server certificate
    #[arg(long = "ldap.skip-tls-verification", global = true)]
    skip_tls_verification: bool,

    /// Connect with LDAPS
    #[arg(long = "ldap.is-secure-ldap", global = true)]
    is_secure_ldap: bool,

    /// Upgrade the connection with StartTLS
    #[arg(long = "ldap.start-tls", global = true)]
    start_tls: bool,

    /// PEM file with the CA certificates to trust
    #[arg(long = "ldap.ca-cert-file", global = true, env = "GUARD_LDAP_CA_CERT_FILE")]
    ca_cert_file: Option<PathBuf>,
}

impl LdapFlags {
    fn apply(self, ldap: &mut LdapOptions) {
        let strings = [
            (self.server_address, &mut ldap.server_address),
            (self.server_port, &mut ldap.server_port),
            (self.bind_dn, &mut ldap.bind_dn),
            (self.bind_password, &mut ldap.bind_password),
            (self.user_search_dn, &mut ldap.user_search_dn),
            (self.user_search_filter, &mut ldap.user_search_filter),
            (self.user_attribute, &mut ldap.user_attribute),
            (self.group_search_dn, &mut ldap.group_search_dn),
            (self.group_search_filter, &mut ldap.group_search_filter),
            (self.group_member_attribute, &mut ldap.group_member_attribute),
            (self.group_name_attribute, &mut ldap.group_name_attribute),
        ];
        for (flag, field) in strings {
            if let Some(value) = flag {
                *field = value;
            }
        }

        // Switches only turn settings on
        ldap.skip_tls_verification |= self.skip_tls_verification;
        ldap.is_secure_ldap |= self.is_secure_ldap;
        ldap.start_tls |= self.start_tls;

        if let Some(path) = self.ca_cert_file {
            ldap.ca_cert_file = Some(path);
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Authenticate a user and print the resolved identity as JSON
    Login {
        /// Username to authenticate
        #[arg(short, long)]
        username: String,

        /// Password; read from stdin when omitted
        #[arg(long, env = "GUARD_LOGIN_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Validate the LDAP configuration
    Validate {
        /// Also connect and bind as the service account
        #[arg(long)]
        probe: bool,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let mut config = if let Some(config_path) = &cli.config {
        GuardConfig::from_file(config_path)?
    } else {
        GuardConfig::from_env()
    };

    // Override with CLI args
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    cli.ldap.apply(&mut config.ldap);

    init_logging(&config.logging);

    match cli.command {
        Commands::Login { username, password } => {
            let password = match password {
                Some(password) => password,
                None => read_password()?,
            };
            login(&config, &username, &password).await?;
        }
        Commands::Validate { probe } => validate(&config, probe).await?,
        Commands::Version => println!("guard {}", guard_core::VERSION),
    }

    Ok(())
}

fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    // stdout carries command output
    let registry = tracing_subscriber::registry().with(filter);
    if logging.format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

fn read_password() -> anyhow::Result<String> {
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

async fn login(config: &GuardConfig, username: &str, password: &str) -> anyhow::Result<()> {
    let directory = DirectoryConfig::from_options(&config.ldap)?;
    let authenticator = LdapAuthenticator::new(directory);

    let identity = authenticator
        .authenticate(username, password)
        .await
        .context("Login failed")?;

    println!("{}", serde_json::to_string_pretty(&identity)?);
    Ok(())
}

async fn validate(config: &GuardConfig, probe: bool) -> anyhow::Result<()> {
    let directory = DirectoryConfig::from_options(&config.ldap)?;
    println!("{:#?}", directory);

    if probe {
        let url = directory.url();
        LdapAuthenticator::new(directory)
            .probe()
            .await
            .with_context(|| format!("Service account bind against {} failed", url))?;
        info!(url = %url, "LDAP service account bind succeeded");
        println!("Service account bind succeeded");
    }

    Ok(())
}
