// SPDX-License-Identifier: AGPL-3.0-only
//! TACACS+ client protocol engine: headers, body obfuscation, AV-pair lists and the
//! authentication, authorization and accounting exchanges.
//! Focused on async IO for client-side use; every call awaits exactly one request
//! or reply and nothing runs in the background.

use bytes::BytesMut;
use log::{debug, warn};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

mod accounting;
pub mod attrib;
mod authen;
mod author;
pub mod config;
pub mod connect;
pub mod crypto;
pub mod error;
pub mod header;
mod reply;
pub mod session;
mod util;

pub use accounting::{acct_flag_to_str, acct_read, acct_read_timeout, acct_send};
pub use attrib::{Attribute, AttributeList, Separator};
pub use authen::{
    AuthenState, Authentication, authen_read, authen_read_timeout, authen_send, cont_send,
    cont_send_seq, needs_input,
};
pub use author::{author_read, author_read_timeout, author_send};
pub use config::{ClientConfig, ServerConfig};
pub use connect::{Connection, Server, connect, connect_single};
pub use crypto::{chap_digest, obfuscate};
pub use error::TacError;
pub use header::{Header, build_header, check_header};
pub use reply::Reply;
pub use session::{LoginType, Session, generate_session_id};

use crate::header::HEADER_LEN;

pub const VERSION_MAJOR: u8 = 0xc;
pub const VERSION_DEFAULT: u8 = VERSION_MAJOR << 4; // Major version 0xC, minor 0
pub const VERSION_ONE: u8 = VERSION_DEFAULT | 0x01;

pub const TYPE_AUTHEN: u8 = 0x01;
pub const TYPE_AUTHOR: u8 = 0x02;
pub const TYPE_ACCT: u8 = 0x03;

pub const FLAG_UNENCRYPTED: u8 = 0x01;
pub const FLAG_SINGLE_CONNECT: u8 = 0x04;

pub const DEFAULT_PORT: u16 = 49;
pub const MAX_SERVERS: usize = 8;
pub const MAX_PACKET_SIZE: usize = 128_000;
pub const ATTRIB_MAX_LEN: usize = 255;
pub const ATTRIB_MAX_CNT: usize = 255;
pub const READ_TIMEOUT: Duration = Duration::from_secs(180);
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(180);

pub const AUTHEN_ACTION_LOGIN: u8 = 0x01;

pub const AUTHEN_STATUS_PASS: u8 = 0x01;
pub const AUTHEN_STATUS_FAIL: u8 = 0x02;
pub const AUTHEN_STATUS_GETDATA: u8 = 0x03;
pub const AUTHEN_STATUS_GETUSER: u8 = 0x04;
pub const AUTHEN_STATUS_GETPASS: u8 = 0x05;
pub const AUTHEN_STATUS_RESTART: u8 = 0x06;
pub const AUTHEN_STATUS_ERROR: u8 = 0x07;
pub const AUTHEN_STATUS_FOLLOW: u8 = 0x21;

pub const AUTHEN_FLAG_NOECHO: u8 = 0x01;
pub const CONTINUE_FLAG_ABORT: u8 = 0x01;

pub const AUTHEN_TYPE_ASCII: u8 = 0x01;
pub const AUTHEN_TYPE_PAP: u8 = 0x02;
pub const AUTHEN_TYPE_CHAP: u8 = 0x03;
pub const AUTHEN_TYPE_ARAP: u8 = 0x04;

pub const AUTHEN_METH_NOT_SET: u8 = 0x00;
pub const AUTHEN_METH_NONE: u8 = 0x01;
pub const AUTHEN_METH_KRB5: u8 = 0x02;
pub const AUTHEN_METH_LINE: u8 = 0x03;
pub const AUTHEN_METH_ENABLE: u8 = 0x04;
pub const AUTHEN_METH_LOCAL: u8 = 0x05;
pub const AUTHEN_METH_TACACSPLUS: u8 = 0x06;
pub const AUTHEN_METH_GUEST: u8 = 0x08;
pub const AUTHEN_METH_RADIUS: u8 = 0x10;
pub const AUTHEN_METH_KRB4: u8 = 0x11;
pub const AUTHEN_METH_RCMD: u8 = 0x20;

pub const AUTHEN_SVC_NONE: u8 = 0x00;
pub const AUTHEN_SVC_LOGIN: u8 = 0x01;
pub const AUTHEN_SVC_ENABLE: u8 = 0x02;
pub const AUTHEN_SVC_PPP: u8 = 0x03;
pub const AUTHEN_SVC_ARAP: u8 = 0x04;
pub const AUTHEN_SVC_PT: u8 = 0x05;
pub const AUTHEN_SVC_RCMD: u8 = 0x06;
pub const AUTHEN_SVC_X25: u8 = 0x07;
pub const AUTHEN_SVC_NASI: u8 = 0x08;
pub const AUTHEN_SVC_FWPROXY: u8 = 0x09;

pub const PRIV_LVL_MIN: u8 = 0x00;
pub const PRIV_LVL_USER: u8 = 0x01;
pub const PRIV_LVL_ROOT: u8 = 0x0f;
pub const PRIV_LVL_MAX: u8 = 0x0f;

pub const AUTHOR_STATUS_PASS_ADD: u8 = 0x01;
pub const AUTHOR_STATUS_PASS_REPL: u8 = 0x02;
pub const AUTHOR_STATUS_FAIL: u8 = 0x10;
pub const AUTHOR_STATUS_ERROR: u8 = 0x11;
pub const AUTHOR_STATUS_FOLLOW: u8 = 0x21;

pub const ACCT_FLAG_MORE: u8 = 0x01;
pub const ACCT_FLAG_START: u8 = 0x02;
pub const ACCT_FLAG_STOP: u8 = 0x04;
pub const ACCT_FLAG_WATCHDOG: u8 = 0x08;

pub const ACCT_STATUS_SUCCESS: u8 = 0x01;
pub const ACCT_STATUS_ERROR: u8 = 0x02;
pub const ACCT_STATUS_FOLLOW: u8 = 0x21;

pub const PROTOCOL_ERR_MSG: &str = "(Protocol error)";
pub const AUTHEN_SYSERR_MSG: &str = "(Authentication system error)";
pub const AUTHOR_OK_MSG: &str = "(Authorization OK)";
pub const AUTHOR_FAIL_MSG: &str = "(Authorization FAILED)";
pub const AUTHOR_ERR_MSG: &str = "(Authorization ERROR)";
pub const AUTHOR_SYSERR_MSG: &str = "(Authorization system error)";
pub const ACCT_OK_MSG: &str = "(Accounting OK)";
pub const ACCT_FAIL_MSG: &str = "(Accounting FAILED)";
pub const ACCT_ERR_MSG: &str = "(Accounting ERROR)";
pub const ACCT_SYSERR_MSG: &str = "(Accounting system error)";

/// Request header for this session: its id, its encryption choice and single-connect flag.
pub(crate) fn request_header(session: &Session, packet_type: u8, seq_no: u8) -> Header {
    build_header(
        packet_type,
        seq_no,
        session.unencrypted(),
        session.session_id(),
    )
    .with_single_connect(session.single_connect())
}

/// Obfuscate `body`, prefix the header and write the packet within the session's
/// write timeout.
pub(crate) async fn write_packet<W>(
    writer: &mut W,
    session: &Session,
    mut header: Header,
    mut body: Vec<u8>,
) -> Result<(), TacError>
where
    W: AsyncWrite + Unpin,
{
    if body.len() > MAX_PACKET_SIZE {
        return Err(TacError::assembly(format!(
            "body of {} bytes exceeds {MAX_PACKET_SIZE}",
            body.len()
        )));
    }
    header.length = body.len() as u32;
    crypto::obfuscate(&header, session.secret(), &mut body)?;

    let mut packet = BytesMut::with_capacity(HEADER_LEN + body.len());
    packet.extend_from_slice(&header.to_bytes());
    packet.extend_from_slice(&body);
    debug!(
        "sending TACACS+ type {} seq {} session {:#010x} ({} body bytes)",
        header.packet_type, header.seq_no, header.session_id, header.length
    );

    let limit = session.write_timeout();
    let write = async {
        writer.write_all(&packet).await?;
        writer.flush().await
    };
    match tokio::time::timeout(limit, write).await {
        Err(_) => Err(TacError::WriteTimeout(limit)),
        Ok(Err(err)) => Err(TacError::Write(err)),
        Ok(Ok(())) => Ok(()),
    }
}

/// Read one reply, validate its header against the request and return the
/// de-obfuscated body. With a deadline, exceeding it discards whatever was read.
/// A transport error mid-read is reported as `ShortHeader` or `ShortBody` with the
/// count received so far; the underlying error is only logged at debug level.
pub(crate) async fn read_packet<R>(
    reader: &mut R,
    session: &Session,
    expected_type: u8,
    expected_seq: u8,
    deadline: Option<Duration>,
) -> Result<(Header, Vec<u8>), TacError>
where
    R: AsyncRead + Unpin,
{
    let read = async {
        let mut buf = [0u8; HEADER_LEN];
        let got = util::read_full(reader, &mut buf).await;
        let header = Header::from_bytes(&buf[..got])?;
        check_header(&header, expected_type, expected_seq)?;
        if header.session_id != session.session_id() {
            return Err(TacError::protocol(format!(
                "reply session {:#010x} does not match {:#010x}",
                header.session_id,
                session.session_id()
            )));
        }
        if !header.is_encrypted() && !session.unencrypted() {
            warn!("unencrypted TACACS+ reply on an obfuscated session refused");
            return Err(TacError::protocol("unencrypted reply on obfuscated session"));
        }

        let expected = header.length as usize;
        let mut body = vec![0u8; expected];
        let got = util::read_full(reader, &mut body).await;
        if got < expected {
            return Err(TacError::ShortBody { got, expected });
        }
        crypto::obfuscate(&header, session.secret(), &mut body)?;
        debug!(
            "received TACACS+ type {} seq {} ({} body bytes)",
            header.packet_type, header.seq_no, header.length
        );
        Ok::<_, TacError>((header, body))
    };

    match deadline {
        Some(limit) => tokio::time::timeout(limit, read)
            .await
            .map_err(|_| TacError::ReadTimeout(limit))?,
        None => read.await,
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    //! In-process daemon side for exchange tests.

    use super::*;
    use tokio::io::{AsyncReadExt, DuplexStream};

    pub const SECRET: &[u8] = b"tacacs123";

    pub fn session() -> Session {
        Session::new(SECRET)
            .with_session_id(0x0badcafe)
            .with_read_timeout(Some(Duration::from_secs(5)))
    }

    /// Read one client packet and return its header and decrypted body.
    pub async fn recv(stream: &mut DuplexStream, secret: &[u8]) -> (Header, Vec<u8>) {
        let mut buf = [0u8; HEADER_LEN];
        stream.read_exact(&mut buf).await.unwrap();
        let header = Header::from_bytes(&buf).unwrap();
        let mut body = vec![0u8; header.length as usize];
        stream.read_exact(&mut body).await.unwrap();
        crypto::obfuscate(&header, secret, &mut body).unwrap();
        (header, body)
    }

    /// Answer `request` with an obfuscated body.
    pub async fn reply(stream: &mut DuplexStream, request: &Header, secret: &[u8], body: &[u8]) {
        let header = request.response(body.len() as u32);
        send_raw(stream, &header, secret, body).await;
    }

    pub async fn send_raw(stream: &mut DuplexStream, header: &Header, secret: &[u8], body: &[u8]) {
        let mut body = body.to_vec();
        crypto::obfuscate(header, secret, &mut body).unwrap();
        stream.write_all(&header.to_bytes()).await.unwrap();
        stream.write_all(&body).await.unwrap();
        stream.flush().await.unwrap();
    }
}
