// SPDX-License-Identifier: AGPL-3.0-only
//! Per-conversation session values: the random session id plus the immutable
//! settings every engine call reads (secret, timeouts, authentication identifiers).

use crate::{
    AUTHEN_METH_TACACSPLUS, AUTHEN_SVC_PPP, AUTHEN_TYPE_ASCII, AUTHEN_TYPE_CHAP, AUTHEN_TYPE_PAP,
    PRIV_LVL_MIN, READ_TIMEOUT, VERSION_DEFAULT, VERSION_ONE, WRITE_TIMEOUT,
};
use log::debug;
use openssl::rand::rand_bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Random non-zero session id.
///
/// Draws from the OpenSSL CSPRNG; if that fails, falls back to a PRNG seeded from
/// the process id and the clock.
pub fn generate_session_id() -> u32 {
    loop {
        let id = secure_session_id().unwrap_or_else(fallback_session_id);
        if id != 0 {
            return id;
        }
    }
}

fn secure_session_id() -> Option<u32> {
    let mut buf = [0u8; 4];
    match rand_bytes(&mut buf) {
        Ok(()) => Some(u32::from_be_bytes(buf)),
        Err(err) => {
            debug!("secure random source unavailable, using fallback: {err}");
            None
        }
    }
}

fn fallback_session_id() -> u32 {
    static CALLS: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let seed = nanos
        ^ (u64::from(std::process::id()) << 32)
        ^ CALLS.fetch_add(1, Ordering::Relaxed).rotate_left(17);
    StdRng::seed_from_u64(seed).r#gen()
}

/// How the authentication START carries the user's credentials.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginType {
    /// Password in the START data field.
    #[default]
    Pap,
    /// `ppp_id || challenge || MD5 response` in the START data field.
    Chap,
    /// Interactive ASCII login: the password follows in a CONTINUE.
    Login,
}

impl LoginType {
    pub fn authen_type(self) -> u8 {
        match self {
            LoginType::Pap => AUTHEN_TYPE_PAP,
            LoginType::Chap => AUTHEN_TYPE_CHAP,
            LoginType::Login => AUTHEN_TYPE_ASCII,
        }
    }

    /// Header version for authentication packets; PAP and CHAP need minor version 1.
    pub fn version(self) -> u8 {
        match self {
            LoginType::Pap | LoginType::Chap => VERSION_ONE,
            LoginType::Login => VERSION_DEFAULT,
        }
    }
}

impl FromStr for LoginType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pap" => Ok(LoginType::Pap),
            "chap" => Ok(LoginType::Chap),
            "login" | "ascii" => Ok(LoginType::Login),
            other => Err(format!("unknown login type '{other}'")),
        }
    }
}

impl fmt::Display for LoginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LoginType::Pap => "pap",
            LoginType::Chap => "chap",
            LoginType::Login => "login",
        })
    }
}

/// Settings shared by every packet of one conversation. Built once, never mutated
/// by the engine, safe to share across threads.
#[derive(Clone)]
pub struct Session {
    session_id: u32,
    secret: Vec<u8>,
    unencrypted: bool,
    single_connect: bool,
    read_timeout: Option<Duration>,
    write_timeout: Duration,
    login: LoginType,
    priv_lvl: u8,
    authen_method: u8,
    authen_service: u8,
}

impl Session {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Session {
            session_id: generate_session_id(),
            secret: secret.into(),
            unencrypted: false,
            single_connect: false,
            read_timeout: Some(READ_TIMEOUT),
            write_timeout: WRITE_TIMEOUT,
            login: LoginType::default(),
            priv_lvl: PRIV_LVL_MIN,
            authen_method: AUTHEN_METH_TACACSPLUS,
            authen_service: AUTHEN_SVC_PPP,
        }
    }

    /// Reuse a known session id, e.g. to continue a conversation on a new value.
    /// A zero id is replaced with a fresh random one.
    pub fn with_session_id(mut self, session_id: u32) -> Self {
        self.session_id = if session_id == 0 {
            generate_session_id()
        } else {
            session_id
        };
        self
    }

    /// Send bodies in clear. Only this explicit opt-out disables obfuscation; an
    /// empty secret alone does not.
    pub fn with_unencrypted(mut self, unencrypted: bool) -> Self {
        self.unencrypted = unencrypted;
        self
    }

    pub fn with_single_connect(mut self, single_connect: bool) -> Self {
        self.single_connect = single_connect;
        self
    }

    /// Deadline for reads without an explicit timeout; `None` blocks until data arrives.
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_login(mut self, login: LoginType) -> Self {
        self.login = login;
        self
    }

    pub fn with_authen(mut self, method: u8, service: u8, priv_lvl: u8) -> Self {
        self.authen_method = method;
        self.authen_service = service;
        self.priv_lvl = priv_lvl;
        self
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    pub fn secret(&self) -> &[u8] {
        &self.secret
    }

    pub fn unencrypted(&self) -> bool {
        self.unencrypted
    }

    pub fn single_connect(&self) -> bool {
        self.single_connect
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    pub fn login(&self) -> LoginType {
        self.login
    }

    pub fn priv_lvl(&self) -> u8 {
        self.priv_lvl
    }

    pub fn authen_method(&self) -> u8 {
        self.authen_method
    }

    pub fn authen_service(&self) -> u8 {
        self.authen_service
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &format_args!("{:#010x}", self.session_id))
            .field("secret", &format_args!("<{} bytes>", self.secret.len()))
            .field("unencrypted", &self.unencrypted)
            .field("single_connect", &self.single_connect)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("login", &self.login)
            .field("priv_lvl", &self.priv_lvl)
            .field("authen_method", &self.authen_method)
            .field("authen_service", &self.authen_service)
            .finish()
    }
}
