//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{Config, Settings};

mod check;
mod config_cmd;
mod helpers;
mod init;
mod panic_cmd;
mod persona;
mod run;
mod session;
mod tor;

#[derive(Parser)]
#[command(name = "veil")]
#[command(about = "Privacy-hardening core for an anonymous browsing shell")]
#[command(version)]
pub struct Cli {
    /// Config root directory (default: ~/.veilshell)
    #[arg(long, global = true, value_name = "DIR", env = "VEILSHELL_CONFIG_ROOT")]
    config_root: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Force Tor proxying on, starting the daemon during startup
    #[arg(long, global = true)]
    tor: bool,

    /// External SOCKS endpoint (host:port or socks5:// URL) to adopt
    /// instead of spawning a local daemon
    #[arg(long, global = true, value_name = "HOST:PORT")]
    tor_proxy: Option<String>,

    /// Open this URL in the startup session
    #[arg(long, global = true, value_name = "URL")]
    start: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Start the shell core (default when no subcommand is given)
    Run,

    /// Initialize the config root: directories, config file, default
    /// personas, session database
    Init,

    /// Probe the environment: tor binary, ports, config, catalogs
    Check,

    /// Manage identity personas
    Persona {
        #[command(subcommand)]
        command: PersonaCommands,
    },

    /// Manage saved browsing sessions
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },

    /// Inspect and control the Tor circuit
    Tor {
        #[command(subcommand)]
        command: TorCommands,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Trigger emergency teardown: unbind the proxy, purge sessions,
    /// wipe caches, stop Tor
    Panic {
        /// Skip confirmation prompt
        #[arg(long)]
        confirm: bool,
    },
}

#[derive(Subcommand)]
enum PersonaCommands {
    /// List personas in the catalog
    List,
    /// Show one persona in full
    Show {
        /// Persona id
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create a persona from a JSON profile file
    Create {
        /// Path to a JSON profile, or '-' for stdin
        file: PathBuf,
    },
    /// Delete a persona
    Delete {
        /// Persona id
        id: String,
        /// Reassign live dependents to the default persona instead of refusing
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum SessionCommands {
    /// List saved sessions
    List,
    /// Show one session with its tabs
    Show {
        /// Session id
        id: String,
    },
    /// Delete a session and its tabs
    Delete {
        /// Session id
        id: String,
        /// Skip confirmation prompt
        #[arg(long)]
        confirm: bool,
    },
    /// Delete sessions not accessed within the given number of days
    Cleanup {
        /// Age threshold in days
        #[arg(long, default_value = "30")]
        days: u32,
    },
}

#[derive(Subcommand)]
enum TorCommands {
    /// Show circuit status for the configured endpoint
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Request a fresh circuit over the control port
    Renew,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Read one option by dotted key (e.g. tor.socks_port)
    Get {
        /// Option key
        key: String,
    },
    /// Set one option by dotted key and persist the file
    Set {
        /// Option key
        key: String,
        /// New value (JSON literal or bare string)
        value: String,
    },
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = match cli.config_root.as_deref() {
        Some(root) => Settings::from_root_arg(root),
        None => Settings::default(),
    };

    // `check` reports config problems itself rather than dying on them;
    // every other command needs a loadable config.
    let config = Config::load(&settings).map(|c| c.with_cli_overrides(cli.tor, cli.tor_proxy));

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run::cmd_run(&settings, &config?, cli.start.as_deref()).await,
        Commands::Init => init::cmd_init(&settings, &config?).await,
        Commands::Check => check::cmd_check(&settings, config).await,
        Commands::Persona { command } => match command {
            PersonaCommands::List => persona::cmd_persona_list(&settings, &config?).await,
            PersonaCommands::Show { id, json } => {
                persona::cmd_persona_show(&settings, &config?, &id, json).await
            }
            PersonaCommands::Create { file } => {
                persona::cmd_persona_create(&settings, &config?, &file).await
            }
            PersonaCommands::Delete { id, force } => {
                persona::cmd_persona_delete(&settings, &config?, &id, force).await
            }
        },
        Commands::Session { command } => match command {
            SessionCommands::List => session::cmd_session_list(&settings).await,
            SessionCommands::Show { id } => session::cmd_session_show(&settings, &id).await,
            SessionCommands::Delete { id, confirm } => {
                session::cmd_session_delete(&settings, &id, confirm).await
            }
            SessionCommands::Cleanup { days } => {
                session::cmd_session_cleanup(&settings, days).await
            }
        },
        Commands::Tor { command } => match command {
            TorCommands::Status { json } => tor::cmd_tor_status(&config?, json).await,
            TorCommands::Renew => tor::cmd_tor_renew(&config?).await,
        },
        Commands::Config { command } => match command {
            ConfigCommands::Show => config_cmd::cmd_config_show(&config?).await,
            ConfigCommands::Get { key } => config_cmd::cmd_config_get(&config?, &key).await,
            ConfigCommands::Set { key, value } => {
                config_cmd::cmd_config_set(&settings, &key, &value).await
            }
        },
        Commands::Panic { confirm } => panic_cmd::cmd_panic(&settings, &config?, confirm).await,
    }
}
