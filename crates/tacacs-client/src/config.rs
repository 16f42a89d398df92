// SPDX-License-Identifier: AGPL-3.0-only
//! Client configuration file (JSON) and its translation into servers and sessions.

use crate::connect::Server;
use crate::session::{LoginType, Session};
use crate::{AUTHEN_METH_TACACSPLUS, AUTHEN_SVC_PPP, DEFAULT_PORT, MAX_SERVERS, PRIV_LVL_MAX};
use anyhow::{Context, Result, anyhow, bail, ensure};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

const DSCP_MAX: u8 = 63;

fn default_timeout_secs() -> u64 {
    crate::READ_TIMEOUT.as_secs()
}

fn default_true() -> bool {
    true
}

fn default_authen_method() -> u8 {
    AUTHEN_METH_TACACSPLUS
}

fn default_authen_service() -> u8 {
    AUTHEN_SVC_PPP
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// `host`, `host:port`, `ip`, `ip:port` or `[v6]:port`.
    pub address: String,
    #[serde(default)]
    pub secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
    /// Shared secret for servers without their own.
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Bound reads by `timeout_secs`; when false replies are awaited indefinitely.
    #[serde(default = "default_true")]
    pub read_timeout: bool,
    #[serde(default)]
    pub dscp: Option<u8>,
    #[serde(default)]
    pub login: LoginType,
    #[serde(default)]
    pub priv_lvl: u8,
    #[serde(default = "default_authen_method")]
    pub authen_method: u8,
    #[serde(default = "default_authen_service")]
    pub authen_service: u8,
    /// Send bodies in clear text. Only for daemons configured without a key.
    #[serde(default)]
    pub unencrypted: bool,
    #[serde(default)]
    pub single_connect: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            servers: Vec::new(),
            secret: None,
            timeout_secs: default_timeout_secs(),
            read_timeout: true,
            dscp: None,
            login: LoginType::default(),
            priv_lvl: 0,
            authen_method: default_authen_method(),
            authen_service: default_authen_service(),
            unencrypted: false,
            single_connect: false,
        }
    }
}

impl ClientConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading client config {}", path.display()))?;
        let config: ClientConfig = serde_json::from_str(&contents)
            .with_context(|| format!("parsing JSON client config {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.servers.is_empty(), "no TACACS+ servers configured");
        ensure!(
            self.servers.len() <= MAX_SERVERS,
            "{} servers configured, at most {MAX_SERVERS} allowed",
            self.servers.len()
        );
        for server in &self.servers {
            parse_address(&server.address)
                .with_context(|| format!("server address '{}'", server.address))?;
        }
        ensure!(self.timeout_secs > 0, "timeout_secs must be positive");
        if let Some(dscp) = self.dscp {
            ensure!(dscp <= DSCP_MAX, "dscp {dscp} out of range 0..={DSCP_MAX}");
        }
        ensure!(
            self.priv_lvl <= PRIV_LVL_MAX,
            "priv_lvl {} out of range 0..={PRIV_LVL_MAX}",
            self.priv_lvl
        );
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Resolve every configured address, in order, to its first socket address.
    pub async fn resolve_servers(&self) -> Result<Vec<Server>> {
        let mut servers = Vec::with_capacity(self.servers.len());
        for server in &self.servers {
            let (host, port) = parse_address(&server.address)
                .with_context(|| format!("server address '{}'", server.address))?;
            let addr = tokio::net::lookup_host((host.as_str(), port))
                .await
                .with_context(|| format!("resolving {}", server.address))?
                .next()
                .ok_or_else(|| anyhow!("{} resolved to no addresses", server.address))?;
            servers.push(Server {
                addr,
                secret: server.secret.as_ref().map(|s| s.as_bytes().to_vec()),
            });
        }
        Ok(servers)
    }

    /// Session settings for one conversation. `secret_override` is the per-server
    /// secret of the daemon actually connected to.
    pub fn session(&self, secret_override: Option<&[u8]>) -> Session {
        let secret = secret_override
            .map(<[u8]>::to_vec)
            .or_else(|| self.secret.as_ref().map(|s| s.as_bytes().to_vec()))
            .unwrap_or_default();
        let timeout = self.timeout();
        Session::new(secret)
            .with_unencrypted(self.unencrypted)
            .with_single_connect(self.single_connect)
            .with_read_timeout(self.read_timeout.then_some(timeout))
            .with_write_timeout(timeout)
            .with_login(self.login)
            .with_authen(self.authen_method, self.authen_service, self.priv_lvl)
    }
}

/// Split a server address into host and port, defaulting the port to 49.
pub fn parse_address(address: &str) -> Result<(String, u16)> {
    let address = address.trim();
    if let Ok(addr) = address.parse::<SocketAddr>() {
        return Ok((addr.ip().to_string(), addr.port()));
    }
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok((ip.to_string(), DEFAULT_PORT));
    }

    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("unterminated '[' in address"))?;
        match tail {
            "" => (host, None),
            _ => {
                let port = tail
                    .strip_prefix(':')
                    .ok_or_else(|| anyhow!("unexpected '{tail}' after ']'"))?;
                (host, Some(port))
            }
        }
    } else {
        match address.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (address, None),
        }
    };

    if host.is_empty() {
        bail!("missing host");
    }
    let port = match port {
        Some(port) => port
            .parse::<u16>()
            .with_context(|| format!("invalid port '{port}'"))?,
        None => DEFAULT_PORT,
    };
    Ok((host.to_string(), port))
}
