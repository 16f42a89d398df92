// SPDX-License-Identifier: AGPL-3.0-only
//! TACACS+ authorization: REQUEST encoding, RESPONSE parsing and the usual
//! attribute builders.

use crate::attrib::{Attribute, Separator};
use crate::error::{TacError, ensure_protocol};
use crate::header::Header;
use crate::session::Session;
use crate::util::{field_len, read_text};
use crate::{
    AUTHOR_ERR_MSG, AUTHOR_FAIL_MSG, AUTHOR_OK_MSG, AUTHOR_STATUS_ERROR, AUTHOR_STATUS_FAIL,
    AUTHOR_STATUS_FOLLOW, AUTHOR_STATUS_PASS_ADD, AUTHOR_STATUS_PASS_REPL, AttributeList, Reply,
    TYPE_AUTHOR, read_packet, request_header, write_packet,
};
use bytes::{BufMut, BytesMut};
use log::{debug, warn};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

impl AttributeList {
    /// Set or replace the service attribute (enforced to appear first).
    pub fn set_service(&mut self, service: &str) -> Result<(), TacError> {
        let attr = Attribute::new("service", Separator::Mandatory, service)?;
        self.retain(|a| !a.name().eq_ignore_ascii_case("service"));
        self.insert(0, attr)
    }

    /// Set or replace the protocol attribute (kept after service when present).
    pub fn set_protocol(&mut self, protocol: &str) -> Result<(), TacError> {
        let attr = Attribute::new("protocol", Separator::Mandatory, protocol)?;
        self.retain(|a| !a.name().eq_ignore_ascii_case("protocol"));
        let at = self.position("service").map(|p| p + 1).unwrap_or(self.len());
        self.insert(at, attr)
    }

    /// Set or replace the cmd attribute.
    pub fn set_cmd(&mut self, cmd: &str) -> Result<(), TacError> {
        let attr = Attribute::new("cmd", Separator::Mandatory, cmd)?;
        self.retain(|a| !a.name().eq_ignore_ascii_case("cmd"));
        self.insert(self.len(), attr)
    }

    /// Add a cmd-arg attribute (multiple allowed).
    pub fn add_cmd_arg(&mut self, arg: &str) -> Result<(), TacError> {
        self.append("cmd-arg", Separator::Mandatory, arg)
    }
}

fn encode_author_request(
    session: &Session,
    user: &str,
    port: &str,
    rem_addr: &str,
    attrs: &AttributeList,
) -> Result<Vec<u8>, TacError> {
    let mut buf = BytesMut::new();
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

fn canned_message(status: u8) -> &'static str {
    match status {
        AUTHOR_STATUS_PASS_ADD | AUTHOR_STATUS_PASS_REPL => AUTHOR_OK_MSG,
        AUTHOR_STATUS_FAIL => AUTHOR_FAIL_MSG,
        _ => AUTHOR_ERR_MSG,
    }
}

fn parse_author_reply(header: &Header, body: &[u8]) -> Result<Reply, TacError> {
    ensure_protocol!(body.len() >= 6, "authorization response body too short");
    let status = body[0];
    let arg_cnt = body[1] as usize;
    let msg_len = u16::from_be_bytes([body[2], body[3]]) as usize;
    let data_len = u16::from_be_bytes([body[4], body[5]]) as usize;

    let arg_lens = body
        .get(6..6 + arg_cnt)
        .ok_or_else(|| TacError::protocol("authorization args length truncated"))?;
    let args_len: usize = arg_lens.iter().map(|l| *l as usize).sum();
    let expected = 6 + arg_cnt + msg_len + data_len + args_len;
    ensure_protocol!(
        expected == body.len(),
        "authorization response fields cover {expected} bytes, body has {}",
        body.len()
    );
    ensure_protocol!(
        matches!(
            status,
            AUTHOR_STATUS_PASS_ADD
                | AUTHOR_STATUS_PASS_REPL
                | AUTHOR_STATUS_FAIL
                | AUTHOR_STATUS_ERROR
                | AUTHOR_STATUS_FOLLOW
        ),
        "authorization response status {status:#04x} invalid"
    );
    if status == AUTHOR_STATUS_FOLLOW {
        warn!("TACACS+ daemon answered authorization with deprecated FOLLOW");
    }

    let cursor = 6 + arg_cnt;
    let (mut msg, cursor) = read_text(body, cursor, msg_len, "server_msg")?;
    let attributes = AttributeList::from_table(arg_lens, body, cursor + data_len)?;
    if msg.is_empty() {
        msg = canned_message(status).to_string();
    }

    Ok(Reply {
        status,
        flags: 0,
        seq_no: header.seq_no,
        msg,
        attributes,
    })
}

/// Send an authorization REQUEST (seq 1) carrying `attrs` in order.
pub async fn author_send<W>(
    writer: &mut W,
    session: &Session,
    user: &str,
    port: &str,
    rem_addr: &str,
    attrs: &AttributeList,
) -> Result<(), TacError>
where
    W: AsyncWrite + Unpin,
{
    let body = encode_author_request(session, user, port, rem_addr, attrs)?;
    let header = request_header(session, TYPE_AUTHOR, 1);
    debug!(
        "authorization request: user '{user}' port '{port}' with {} attributes",
        attrs.len()
    );
    write_packet(writer, session, header, body).await
}

async fn read_author_reply<R>(
    reader: &mut R,
    session: &Session,
    deadline: Option<Duration>,
) -> Result<Reply, TacError>
where
    R: AsyncRead + Unpin,
{
    let (header, body) = read_packet(reader, session, TYPE_AUTHOR, 2, deadline).await?;
    let reply = parse_author_reply(&header, &body)?;
    debug!(
        "authorization response: status {:#04x} with {} attributes",
        reply.status,
        reply.attributes.len()
    );
    Ok(reply)
}

/// Read the authorization RESPONSE. The returned attributes are the daemon's;
/// merging them with the request is up to the caller.
pub async fn author_read<R>(reader: &mut R, session: &Session) -> Result<Reply, TacError>
where
    R: AsyncRead + Unpin,
{
    read_author_reply(reader, session, session.read_timeout()).await
}

pub async fn author_read_timeout<R>(
    reader: &mut R,
    session: &Session,
    timeout: Duration,
) -> Result<Reply, TacError>
where
    R: AsyncRead + Unpin,
{
    read_author_reply(reader, session, Some(timeout)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{SECRET, recv, reply, session};
    use crate::{AUTHEN_TYPE_PAP, VERSION_DEFAULT};
    use tokio::io::duplex;

    fn encode_author_response(status: u8, msg: &str, args: &[&str]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(status);
        buf.put_u8(args.len() as u8);
        buf.put_u16(msg.len() as u16);
        buf.put_u16(0);
        for arg in args {
            buf.put_u8(arg.len() as u8);
        }
        buf.extend_from_slice(msg.as_bytes());
        for arg in args {
            buf.extend_from_slice(arg.as_bytes());
        }
        buf.to_vec()
    }

    fn names(list: &AttributeList) -> Vec<String> {
        list.iter().map(|a| a.to_string()).collect()
    }

    // ==================== Attribute Builder Tests ====================

    #[test]
    fn service_goes_first_and_protocol_follows() {
        let mut attrs = AttributeList::new();
        attrs.add("acl", "7").unwrap();
        attrs.set_protocol("ip").unwrap();
        attrs.set_service("ppp").unwrap();
        assert_eq!(names(&attrs), ["service=ppp", "acl=7", "protocol=ip"]);

        attrs.set_protocol("lcp").unwrap();
        assert_eq!(names(&attrs), ["service=ppp", "protocol=lcp", "acl=7"]);

        attrs.set_service("shell").unwrap();
        assert_eq!(names(&attrs), ["service=shell", "protocol=lcp", "acl=7"]);
    }

    #[test]
    fn cmd_is_replaced_and_cmd_args_accumulate() {
        let mut attrs = AttributeList::new();
        attrs.set_service("shell").unwrap();
        attrs.set_cmd("show").unwrap();
        attrs.add_cmd_arg("running-config").unwrap();
        attrs.set_cmd("write").unwrap();
        attrs.add_cmd_arg("memory").unwrap();
        assert_eq!(
            names(&attrs),
            ["service=shell", "cmd-arg=running-config", "cmd=write", "cmd-arg=memory"]
        );
    }

    #[test]
    fn protocol_follows_service_of_any_case() {
        let mut attrs = AttributeList::new();
        attrs.add("acl", "7").unwrap();
        attrs.add("Service", "ppp").unwrap();
        attrs.set_protocol("ip").unwrap();
        assert_eq!(names(&attrs), ["acl=7", "Service=ppp", "protocol=ip"]);

        attrs.add("PROTOCOL", "lcp").unwrap();
        attrs.set_protocol("ipv6").unwrap();
        assert_eq!(names(&attrs), ["acl=7", "Service=ppp", "protocol=ipv6"]);
    }

    #[test]
    fn builders_use_strict_limits() {
        let mut attrs = AttributeList::new();
        let err = attrs.set_cmd(&"x".repeat(300)).unwrap_err();
        assert!(matches!(err, TacError::AttribTooLong { .. }));
        assert!(attrs.is_empty());
    }

    // ==================== Request Tests ====================

    #[tokio::test]
    async fn request_carries_identity_and_attributes_in_order() {
        let session = session().with_authen(6, 1, 1);
        let mut attrs = AttributeList::new();
        attrs.set_service("shell").unwrap();
        attrs.set_cmd("show").unwrap();
        attrs.append("timeout", Separator::Optional, "30").unwrap();

        let (mut client, mut server) = duplex(4096);
        author_send(&mut client, &session, "alice", "tty0", "192.0.2.1", &attrs)
            .await
            .unwrap();

        let (header, body) = recv(&mut server, SECRET).await;
        assert_eq!(header.packet_type, TYPE_AUTHOR);
        assert_eq!(header.seq_no, 1);
        assert_eq!(header.version, VERSION_DEFAULT);
        assert_eq!(&body[..4], &[6, 1, AUTHEN_TYPE_PAP, 1]);
        assert_eq!(&body[4..8], &[5, 4, 9, 3]);
        assert_eq!(&body[8..11], &[13, 8, 10]);
        assert_eq!(&body[11..16], b"alice");
        assert_eq!(&body[16..20], b"tty0");
        assert_eq!(&body[20..29], b"192.0.2.1");
        assert_eq!(&body[29..], b"service=shellcmd=showtimeout*30");
    }

    // ==================== Response Tests ====================

    #[tokio::test]
    async fn pass_add_returns_daemon_attributes() {
        let session = session();
        let (mut client, mut server) = duplex(4096);
        author_send(&mut client, &session, "alice", "", "", &AttributeList::new())
            .await
            .unwrap();
        let (request, _) = recv(&mut server, SECRET).await;
        let body = encode_author_response(AUTHOR_STATUS_PASS_ADD, "", &["priv-lvl=15", "idle*5"]);
        reply(&mut server, &request, SECRET, &body).await;

        let answer = author_read(&mut client, &session).await.unwrap();
        assert_eq!(answer.status, AUTHOR_STATUS_PASS_ADD);
        assert_eq!(answer.seq_no, 2);
        assert_eq!(answer.msg, AUTHOR_OK_MSG);
        assert_eq!(answer.attributes.get("priv-lvl").unwrap().value(), "15");
        assert!(answer.attributes.get("idle").unwrap().is_optional());
    }

    #[test]
    fn server_message_wins_over_canned_text() {
        let header = crate::header::build_header(TYPE_AUTHOR, 2, false, 1);
        let body = encode_author_response(AUTHOR_STATUS_FAIL, "denied", &[]);
        assert_eq!(parse_author_reply(&header, &body).unwrap().msg, "denied");

        let body = encode_author_response(AUTHOR_STATUS_FAIL, "", &[]);
        assert_eq!(parse_author_reply(&header, &body).unwrap().msg, AUTHOR_FAIL_MSG);
        let body = encode_author_response(AUTHOR_STATUS_ERROR, "", &[]);
        assert_eq!(parse_author_reply(&header, &body).unwrap().msg, AUTHOR_ERR_MSG);
        let body = encode_author_response(AUTHOR_STATUS_FOLLOW, "", &[]);
        assert_eq!(parse_author_reply(&header, &body).unwrap().status, AUTHOR_STATUS_FOLLOW);
    }

    #[test]
    fn data_field_is_skipped() {
        let header = crate::header::build_header(TYPE_AUTHOR, 2, false, 1);
        let mut buf = BytesMut::new();
        buf.put_u8(AUTHOR_STATUS_PASS_REPL);
        buf.put_u8(1);
        buf.put_u16(2);
        buf.put_u16(3);
        buf.put_u8(5);
        buf.extend_from_slice(b"okxyzacl=1");
        let answer = parse_author_reply(&header, &buf).unwrap();
        assert_eq!(answer.msg, "ok");
        assert_eq!(names(&answer.attributes), ["acl=1"]);
    }

    #[test]
    fn malformed_responses_are_protocol_errors() {
        let header = crate::header::build_header(TYPE_AUTHOR, 2, false, 1);

        let mut long = encode_author_response(AUTHOR_STATUS_PASS_ADD, "", &["a=b"]);
        long.push(0);
        assert!(matches!(parse_author_reply(&header, &long), Err(TacError::Protocol(_))));

        let short = encode_author_response(AUTHOR_STATUS_PASS_ADD, "", &["a=b"]);
        assert!(parse_author_reply(&header, &short[..short.len() - 1]).is_err());

        let unknown = encode_author_response(0x03, "", &[]);
        assert!(parse_author_reply(&header, &unknown).is_err());

        let no_separator = encode_author_response(AUTHOR_STATUS_PASS_ADD, "", &["acl"]);
        assert!(parse_author_reply(&header, &no_separator).is_err());

        assert!(parse_author_reply(&header, &[1, 4, 0, 0, 0, 0]).is_err());
    }

    #[tokio::test]
    async fn read_timeout_expires_without_response() {
        let session = session();
        let (mut client, _server) = duplex(4096);
        let err = author_read_timeout(&mut client, &session, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::error::STATUS_READ_TIMEOUT);
    }
}
