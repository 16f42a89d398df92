// SPDX-License-Identifier: AGPL-3.0-only
//! TACACS+ accounting: REQUEST encoding and REPLY parsing.

use crate::error::{TacError, ensure_protocol};
use crate::header::Header;
use crate::session::Session;
use crate::util::{field_len, read_text};
use crate::{
    ACCT_ERR_MSG, ACCT_FAIL_MSG, ACCT_FLAG_MORE, ACCT_FLAG_START, ACCT_FLAG_STOP,
    ACCT_FLAG_WATCHDOG, ACCT_OK_MSG, ACCT_STATUS_ERROR, ACCT_STATUS_FOLLOW, ACCT_STATUS_SUCCESS,
    AttributeList, Reply, TYPE_ACCT, read_packet, request_header, write_packet,
};
use bytes::{BufMut, BytesMut};
use log::{debug, warn};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

/// Name of a single accounting flag as used in logs and records.
pub fn acct_flag_to_str(flag: u8) -> &'static str {
    match flag {
        ACCT_FLAG_MORE => "more",
        ACCT_FLAG_START => "start",
        ACCT_FLAG_STOP => "stop",
        ACCT_FLAG_WATCHDOG => "update",
        _ => "unknown",
    }
}

fn check_flags(flags: u8) -> Result<(), TacError> {
    let known = ACCT_FLAG_MORE | ACCT_FLAG_START | ACCT_FLAG_STOP | ACCT_FLAG_WATCHDOG;
    let record = ACCT_FLAG_START | ACCT_FLAG_STOP | ACCT_FLAG_WATCHDOG;
    if flags & !known != 0 || flags & record == 0 {
        return Err(TacError::assembly(format!(
            "accounting flags {flags:#04x} invalid"
        )));
    }
    Ok(())
}

fn encode_acct_request(
    session: &Session,
    flags: u8,
    user: &str,
    port: &str,
    rem_addr: &str,
    attrs: &AttributeList,
) -> Result<Vec<u8>, TacError> {
    check_flags(flags)?;
    let mut buf = BytesMut::new();
    buf.put_u8(flags);
    buf.put_u8(session.authen_method());
    buf.put_u8(session.priv_lvl());
    buf.put_u8(session.login().authen_type());
    buf.put_u8(session.authen_service());
    buf.put_u8(field_len(user, "user")?);
    buf.put_u8(field_len(port, "port")?);
    buf.put_u8(field_len(rem_addr, "rem_addr")?);
    buf.put_u8(attrs.len() as u8);
    attrs.put_lengths(&mut buf);
    buf.extend_from_slice(user.as_bytes());
    buf.extend_from_slice(port.as_bytes());
    buf.extend_from_slice(rem_addr.as_bytes());
    attrs.put_values(&mut buf);
    Ok(buf.to_vec())
}

fn parse_acct_reply(header: &Header, body: &[u8]) -> Result<Reply, TacError> {
    ensure_protocol!(body.len() >= 5, "accounting reply body too short");
    let msg_len = u16::from_be_bytes([body[0], body[1]]) as usize;
    let data_len = u16::from_be_bytes([body[2], body[3]]) as usize;
    let status = body[4];
    let expected = 5 + msg_len + data_len;
    ensure_protocol!(
        expected == body.len(),
        "accounting reply fields cover {expected} bytes, body has {}",
        body.len()
    );
    let canned = match status {
        ACCT_STATUS_SUCCESS => ACCT_OK_MSG,
        ACCT_STATUS_ERROR => ACCT_ERR_MSG,
        ACCT_STATUS_FOLLOW => {
            warn!("TACACS+ daemon answered accounting with deprecated FOLLOW");
            ACCT_FAIL_MSG
        }
        _ => return Err(TacError::protocol(format!(
            "accounting reply status {status:#04x} invalid"
        ))),
    };

    let (mut msg, _) = read_text(body, 5, msg_len, "server_msg")?;
    if msg.is_empty() {
        msg = canned.to_string();
    }
    Ok(Reply {
        status,
        flags: 0,
        seq_no: header.seq_no,
        msg,
        attributes: AttributeList::new(),
    })
}

/// Send an accounting REQUEST (seq 1). `flags` combines START, STOP or WATCHDOG
/// with an optional MORE.
pub async fn acct_send<W>(
    writer: &mut W,
    session: &Session,
    flags: u8,
    user: &str,
    port: &str,
    rem_addr: &str,
    attrs: &AttributeList,
) -> Result<(), TacError>
where
    W: AsyncWrite + Unpin,
{
    let body = encode_acct_request(session, flags, user, port, rem_addr, attrs)?;
    let header = request_header(session, TYPE_ACCT, 1);
    debug!(
        "accounting request: {} for user '{user}' with {} attributes",
        acct_flag_to_str(flags & !ACCT_FLAG_MORE),
        attrs.len()
    );
    write_packet(writer, session, header, body).await
}

async fn read_acct_reply<R>(
    reader: &mut R,
    session: &Session,
    deadline: Option<Duration>,
) -> Result<Reply, TacError>
where
    R: AsyncRead + Unpin,
{
    let (header, body) = read_packet(reader, session, TYPE_ACCT, 2, deadline).await?;
    let reply = parse_acct_reply(&header, &body)?;
    debug!("accounting reply: status {:#04x}", reply.status);
    Ok(reply)
}

pub async fn acct_read<R>(reader: &mut R, session: &Session) -> Result<Reply, TacError>
where
    R: AsyncRead + Unpin,
{
    read_acct_reply(reader, session, session.read_timeout()).await
}

pub async fn acct_read_timeout<R>(
    reader: &mut R,
    session: &Session,
    timeout: Duration,
) -> Result<Reply, TacError>
where
    R: AsyncRead + Unpin,
{
    read_acct_reply(reader, session, Some(timeout)).await
}
