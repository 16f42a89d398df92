// SPDX-License-Identifier: AGPL-3.0-only
//! Engine failure kinds and their fixed negative status codes.
//!
//! Protocol outcomes (PASS, FAIL, GETPASS, ...) are never errors; they travel in
//! [`crate::Reply::status`]. Everything here is a local transport/framing failure
//! that aborts the current exchange.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

pub const STATUS_ASSEMBLY_ERR: i32 = -1;
pub const STATUS_PROTOCOL_ERR: i32 = -2;
pub const STATUS_READ_TIMEOUT: i32 = -3;
pub const STATUS_WRITE_TIMEOUT: i32 = -4;
pub const STATUS_WRITE_ERR: i32 = -5;
pub const STATUS_SHORT_HDR: i32 = -6;
pub const STATUS_SHORT_BODY: i32 = -7;
pub const STATUS_CONN_TIMEOUT: i32 = -8;
pub const STATUS_CONN_ERR: i32 = -9;
pub const STATUS_ATTRIB_TOO_LONG: i32 = -10;
pub const STATUS_ATTRIB_TOO_MANY: i32 = -11;

#[derive(Debug, thiserror::Error)]
pub enum TacError {
    #[error("cannot assemble TACACS+ packet: {0}")]
    Assembly(String),
    #[error("TACACS+ protocol error: {0}")]
    Protocol(String),
    #[error("no TACACS+ reply within {0:?}")]
    ReadTimeout(Duration),
    #[error("TACACS+ request not written within {0:?}")]
    WriteTimeout(Duration),
    #[error("writing TACACS+ request")]
    Write(#[source] io::Error),
    #[error("short TACACS+ header: got {got} of 12 bytes")]
    ShortHeader { got: usize },
    #[error("short TACACS+ body: got {got} of {expected} bytes")]
    ShortBody { got: usize, expected: usize },
    #[error("connecting to {0} timed out")]
    ConnTimeout(SocketAddr),
    #[error("connecting to {addr} failed")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("attribute is {len} bytes encoded, limit is 255")]
    AttribTooLong { len: usize },
    #[error("attribute list already holds 255 entries")]
    AttribTooMany,
}

impl TacError {
    /// Fixed negative status code for this failure kind.
    pub fn code(&self) -> i32 {
        match self {
            TacError::Assembly(_) => STATUS_ASSEMBLY_ERR,
            TacError::Protocol(_) => STATUS_PROTOCOL_ERR,
            TacError::ReadTimeout(_) => STATUS_READ_TIMEOUT,
            TacError::WriteTimeout(_) => STATUS_WRITE_TIMEOUT,
            TacError::Write(_) => STATUS_WRITE_ERR,
            TacError::ShortHeader { .. } => STATUS_SHORT_HDR,
            TacError::ShortBody { .. } => STATUS_SHORT_BODY,
            TacError::ConnTimeout(_) => STATUS_CONN_TIMEOUT,
            TacError::Connect { .. } => STATUS_CONN_ERR,
            TacError::AttribTooLong { .. } => STATUS_ATTRIB_TOO_LONG,
            TacError::AttribTooMany => STATUS_ATTRIB_TOO_MANY,
        }
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        TacError::Protocol(msg.into())
    }

    pub(crate) fn assembly(msg: impl Into<String>) -> Self {
        TacError::Assembly(msg.into())
    }
}

/// Shorthand mirroring `anyhow::ensure!` for protocol-level checks on daemon input.
macro_rules! ensure_protocol {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::error::TacError::protocol(format!($($arg)+)));
        }
    };
}

pub(crate) use ensure_protocol;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_fixed_and_negative() {
        let addr: SocketAddr = "127.0.0.1:49".parse().unwrap();
        let all = [
            (TacError::assembly("x"), -1),
            (TacError::protocol("x"), -2),
            (TacError::ReadTimeout(Duration::from_secs(1)), -3),
            (TacError::WriteTimeout(Duration::from_secs(1)), -4),
            (TacError::Write(io::Error::other("x")), -5),
            (TacError::ShortHeader { got: 3 }, -6),
            (TacError::ShortBody { got: 1, expected: 2 }, -7),
            (TacError::ConnTimeout(addr), -8),
            (
                TacError::Connect {
                    addr: addr.to_string(),
                    source: io::Error::from(io::ErrorKind::ConnectionRefused),
                },
                -9,
            ),
            (TacError::AttribTooLong { len: 300 }, -10),
            (TacError::AttribTooMany, -11),
        ];
        for (err, code) in all {
            assert_eq!(err.code(), code, "{err}");
        }
    }

    #[test]
    fn short_header_message_reports_count() {
        let err = TacError::ShortHeader { got: 7 };
        assert!(err.to_string().contains("7 of 12"));
    }
}
