// SPDX-License-Identifier: AGPL-3.0-only
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use usg_tacacs_client::{
    ACCT_FLAG_START, ACCT_FLAG_STOP, ACCT_FLAG_WATCHDOG, ClientConfig, LoginType, ServerConfig,
};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// JSON structured logging.
    Json,
}

/// Kind of accounting record.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum RecordKind {
    Start,
    Stop,
    Update,
}

impl RecordKind {
    pub fn flags(self) -> u8 {
        match self {
            RecordKind::Start => ACCT_FLAG_START,
            RecordKind::Stop => ACCT_FLAG_STOP,
            RecordKind::Update => ACCT_FLAG_WATCHDOG,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "tacc", version, about = "TACACS+ client")]
pub struct Args {
    /// JSON client configuration file.
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// TACACS+ server (`host[:port]`), repeatable; replaces configured servers.
    #[arg(long = "server", short = 's')]
    pub servers: Vec<String>,

    /// Shared secret.
    #[arg(long, short = 'k')]
    pub secret: Option<String>,

    /// Connect, write and read timeout in seconds.
    #[arg(long, short = 'w')]
    pub timeout: Option<u64>,

    /// Wait for replies without a deadline.
    #[arg(long)]
    pub no_read_timeout: bool,

    /// DSCP marking for the connection (0-63).
    #[arg(long)]
    pub dscp: Option<u8>,

    /// Authentication login type: pap, chap or login.
    #[arg(long, short = 'L')]
    pub login: Option<LoginType>,

    /// Privilege level sent with every request.
    #[arg(long)]
    pub priv_lvl: Option<u8>,

    /// Send packet bodies in clear text.
    #[arg(long)]
    pub unencrypted: bool,

    /// Enable protocol debug logging.
    #[arg(long, short = 'd')]
    pub debug: bool,

    /// Log output format: text or json.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Args, Debug)]
pub struct Target {
    /// User name.
    #[arg(long, short = 'u')]
    pub user: String,

    /// Terminal or port name.
    #[arg(long, short = 't', default_value = "")]
    pub tty: String,

    /// Remote address of the user.
    #[arg(long, short = 'r', default_value = "")]
    pub remote: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Authenticate a user; prompts when the server asks for more input.
    Authenticate {
        #[command(flatten)]
        target: Target,

        /// Password; prompted for when omitted.
        #[arg(long, short = 'p')]
        password: Option<String>,

        /// PPP identifier used for CHAP.
        #[arg(long, default_value_t = 0)]
        chap_id: u8,
    },
    /// Request authorization for a service or command.
    Authorize {
        #[command(flatten)]
        target: Target,

        #[arg(long, default_value = "shell")]
        service: String,

        #[arg(long)]
        protocol: Option<String>,

        #[arg(long)]
        cmd: Option<String>,

        #[arg(long = "cmd-arg")]
        cmd_args: Vec<String>,

        /// Extra `name=value` or `name*value` pair, repeatable.
        #[arg(long = "av")]
        attrs: Vec<String>,
    },
    /// Send an accounting record.
    Account {
        #[command(flatten)]
        target: Target,

        #[arg(long, value_enum)]
        kind: RecordKind,

        #[arg(long)]
        service: Option<String>,

        /// Task identifier shared by related records; defaults to this process id.
        #[arg(long)]
        task_id: Option<String>,

        /// Extra `name=value` or `name*value` pair, repeatable.
        #[arg(long = "av")]
        attrs: Vec<String>,
    },
}

impl Args {
    /// Configuration file values with command-line overrides applied.
    pub fn client_config(&self) -> Result<ClientConfig> {
        let mut config = match self.config.as_ref() {
            Some(path) => ClientConfig::from_path(path)?,
            None => ClientConfig::default(),
        };
        if !self.servers.is_empty() {
            config.servers = self
                .servers
                .iter()
                .map(|address| ServerConfig {
                    address: address.clone(),
                    secret: None,
                })
                .collect();
        }
        if let Some(secret) = self.secret.as_ref() {
            config.secret = Some(secret.clone());
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = timeout;
        }
        if self.no_read_timeout {
            config.read_timeout = false;
        }
        if self.dscp.is_some() {
            config.dscp = self.dscp;
        }
        if let Some(login) = self.login {
            config.login = login;
        }
        if let Some(priv_lvl) = self.priv_lvl {
            config.priv_lvl = priv_lvl;
        }
        if self.unencrypted {
            config.unencrypted = true;
        }
        config.validate().context("invalid client configuration")?;
        Ok(config)
    }
}
