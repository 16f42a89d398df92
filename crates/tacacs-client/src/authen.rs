// SPDX-License-Identifier: AGPL-3.0-only
//! TACACS+ authentication: START/CONTINUE encoding, REPLY parsing and the
//! multi-round conversation driver.

use crate::crypto::{MD5_LEN, chap_digest};
use crate::error::{TacError, ensure_protocol};
use crate::header::Header;
use crate::session::{LoginType, Session};
use crate::util::{field_len, put_u16_len, read_text};
use crate::{
    AUTHEN_ACTION_LOGIN, AUTHEN_STATUS_ERROR, AUTHEN_STATUS_FOLLOW, AUTHEN_STATUS_GETDATA,
    AUTHEN_STATUS_GETPASS, AUTHEN_STATUS_GETUSER, AUTHEN_STATUS_PASS, AttributeList, Reply,
    TYPE_AUTHEN, read_packet, request_header, write_packet,
};
use bytes::{BufMut, BytesMut};
use log::debug;
use openssl::rand::rand_bytes;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

const CHAP_CHALLENGE_LEN: usize = 16;

/// Whether an authentication status asks the client for more input.
pub fn needs_input(status: u8) -> bool {
    matches!(
        status,
        AUTHEN_STATUS_GETDATA | AUTHEN_STATUS_GETUSER | AUTHEN_STATUS_GETPASS
    )
}

fn chap_data(chap_ppp_id: u8, password: &str) -> Result<Vec<u8>, TacError> {
    let mut challenge = [0u8; CHAP_CHALLENGE_LEN];
    rand_bytes(&mut challenge)
        .map_err(|err| TacError::assembly(format!("generating CHAP challenge: {err}")))?;
    let digest = chap_digest(chap_ppp_id, password.as_bytes(), &challenge)?;

    let mut data = Vec::with_capacity(1 + CHAP_CHALLENGE_LEN + MD5_LEN);
    data.push(chap_ppp_id);
    data.extend_from_slice(&challenge);
    data.extend_from_slice(&digest);
    Ok(data)
}

fn encode_authen_start(
    session: &Session,
    user: &str,
    password: &str,
    port: &str,
    rem_addr: &str,
    chap_ppp_id: u8,
) -> Result<Vec<u8>, TacError> {
    let data = match session.login() {
        LoginType::Pap => password.as_bytes().to_vec(),
        LoginType::Chap => chap_data(chap_ppp_id, password)?,
        LoginType::Login => Vec::new(),
    };
    let data_len = u8::try_from(data.len())
        .map_err(|_| TacError::assembly(format!("password is {} bytes, limit is 255", data.len())))?;

    let mut buf = BytesMut::new();
    buf.put_u8(AUTHEN_ACTION_LOGIN);
    buf.put_u8(session.priv_lvl());
    buf.put_u8(session.login().authen_type());
    buf.put_u8(session.authen_service());
    buf.put_u8(field_len(user, "user")?);
    buf.put_u8(field_len(port, "port")?);
    buf.put_u8(field_len(rem_addr, "rem_addr")?);
    buf.put_u8(data_len);
    buf.extend_from_slice(user.as_bytes());
    buf.extend_from_slice(port.as_bytes());
    buf.extend_from_slice(rem_addr.as_bytes());
    buf.extend_from_slice(&data);
    Ok(buf.to_vec())
}

fn encode_authen_continue(user_msg: &str, data: &[u8], flags: u8) -> Result<Vec<u8>, TacError> {
    let mut buf = BytesMut::new();
    put_u16_len(&mut buf, user_msg.len(), "user_msg")?;
    put_u16_len(&mut buf, data.len(), "data")?;
    buf.put_u8(flags);
    buf.extend_from_slice(user_msg.as_bytes());
    buf.extend_from_slice(data);
    Ok(buf.to_vec())
}

pub(crate) fn parse_authen_reply(header: &Header, body: &[u8]) -> Result<Reply, TacError> {
    ensure_protocol!(body.len() >= 6, "authentication reply body too short");
    let status = body[0];
    let flags = body[1];
    let msg_len = u16::from_be_bytes([body[2], body[3]]) as usize;
    let data_len = u16::from_be_bytes([body[4], body[5]]) as usize;
    let expected = 6 + msg_len + data_len;
    ensure_protocol!(
        expected == body.len(),
        "authentication reply fields cover {expected} bytes, body has {}",
        body.len()
    );
    ensure_protocol!(
        (AUTHEN_STATUS_PASS..=AUTHEN_STATUS_ERROR).contains(&status)
            || status == AUTHEN_STATUS_FOLLOW,
        "authentication reply status {status:#04x} invalid"
    );
    let (msg, _) = read_text(body, 6, msg_len, "server_msg")?;

    Ok(Reply {
        status,
        flags,
        seq_no: header.seq_no,
        msg,
        attributes: AttributeList::new(),
    })
}

/// Send the authentication START (seq 1). The session's login type decides whether
/// `password` travels as PAP data, as a CHAP response keyed by `chap_ppp_id`, or
/// not at all (ASCII login, sent later with [`cont_send_seq`]).
pub async fn authen_send<W>(
    writer: &mut W,
    session: &Session,
    user: &str,
    password: &str,
    port: &str,
    rem_addr: &str,
    chap_ppp_id: u8,
) -> Result<(), TacError>
where
    W: AsyncWrite + Unpin,
{
    let body = encode_authen_start(session, user, password, port, rem_addr, chap_ppp_id)?;
    let header = request_header(session, TYPE_AUTHEN, 1).with_version(session.login().version());
    debug!(
        "authentication start: user '{user}' port '{port}' login {}",
        session.login()
    );
    write_packet(writer, session, header, body).await
}

async fn read_authen_reply<R>(
    reader: &mut R,
    session: &Session,
    expected_seq: u8,
    deadline: Option<Duration>,
) -> Result<Reply, TacError>
where
    R: AsyncRead + Unpin,
{
    let (header, body) = read_packet(reader, session, TYPE_AUTHEN, expected_seq, deadline).await?;
    let reply = parse_authen_reply(&header, &body)?;
    debug!(
        "authentication reply: status {:#04x} seq {}",
        reply.status, reply.seq_no
    );
    Ok(reply)
}

/// Read the REPLY numbered `expected_seq`, bounded by the session's read timeout.
pub async fn authen_read<R>(
    reader: &mut R,
    session: &Session,
    expected_seq: u8,
) -> Result<Reply, TacError>
where
    R: AsyncRead + Unpin,
{
    read_authen_reply(reader, session, expected_seq, session.read_timeout()).await
}

pub async fn authen_read_timeout<R>(
    reader: &mut R,
    session: &Session,
    expected_seq: u8,
    timeout: Duration,
) -> Result<Reply, TacError>
where
    R: AsyncRead + Unpin,
{
    read_authen_reply(reader, session, expected_seq, Some(timeout)).await
}

/// Send a CONTINUE carrying the user's answer with sequence number `seq_no`
/// (the previous reply's seq_no + 1).
pub async fn cont_send_seq<W>(
    writer: &mut W,
    session: &Session,
    user_msg: &str,
    seq_no: u8,
) -> Result<(), TacError>
where
    W: AsyncWrite + Unpin,
{
    if seq_no % 2 == 0 {
        return Err(TacError::assembly(format!(
            "client packets use odd seq numbers, got {seq_no}"
        )));
    }
    let body = encode_authen_continue(user_msg, &[], 0)?;
    let header =
        request_header(session, TYPE_AUTHEN, seq_no).with_version(session.login().version());
    write_packet(writer, session, header, body).await
}

/// CONTINUE answering the first REPLY.
pub async fn cont_send<W>(writer: &mut W, session: &Session, user_msg: &str) -> Result<(), TacError>
where
    W: AsyncWrite + Unpin,
{
    cont_send_seq(writer, session, user_msg, 3).await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenState {
    Start,
    AwaitReply,
    Continue,
    Done,
}

/// Authentication conversation: `Start -> AwaitReply -> {Continue -> AwaitReply}* -> Done`.
///
/// Tracks the sequence counter so every CONTINUE and REPLY is numbered correctly.
/// Any transport or protocol failure ends the conversation.
#[derive(Debug, Clone)]
pub struct Authentication {
    state: AuthenState,
    last_seq: u8,
}

impl Default for Authentication {
    fn default() -> Self {
        Self::new()
    }
}

impl Authentication {
    pub fn new() -> Self {
        Authentication {
            state: AuthenState::Start,
            last_seq: 0,
        }
    }

    pub fn state(&self) -> AuthenState {
        self.state
    }

    /// Sequence number of the last packet sent or received.
    pub fn last_seq(&self) -> u8 {
        self.last_seq
    }

    fn expect(&self, state: AuthenState, op: &str) -> Result<(), TacError> {
        if self.state != state {
            return Err(TacError::assembly(format!(
                "authentication {op} not allowed in state {:?}",
                self.state
            )));
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn start<W>(
        &mut self,
        writer: &mut W,
        session: &Session,
        user: &str,
        password: &str,
        port: &str,
        rem_addr: &str,
        chap_ppp_id: u8,
    ) -> Result<(), TacError>
    where
        W: AsyncWrite + Unpin,
    {
        self.expect(AuthenState::Start, "start")?;
        if let Err(err) =
            authen_send(writer, session, user, password, port, rem_addr, chap_ppp_id).await
        {
            self.state = AuthenState::Done;
            return Err(err);
        }
        self.last_seq = 1;
        self.state = AuthenState::AwaitReply;
        Ok(())
    }

    pub async fn read<R>(&mut self, reader: &mut R, session: &Session) -> Result<Reply, TacError>
    where
        R: AsyncRead + Unpin,
    {
        self.read_within(reader, session, session.read_timeout())
            .await
    }

    pub async fn read_timeout<R>(
        &mut self,
        reader: &mut R,
        session: &Session,
        timeout: Duration,
    ) -> Result<Reply, TacError>
    where
        R: AsyncRead + Unpin,
    {
        self.read_within(reader, session, Some(timeout)).await
    }

    async fn read_within<R>(
        &mut self,
        reader: &mut R,
        session: &Session,
        deadline: Option<Duration>,
    ) -> Result<Reply, TacError>
    where
        R: AsyncRead + Unpin,
    {
        self.expect(AuthenState::AwaitReply, "read")?;
        let expected = self.last_seq.wrapping_add(1);
        match read_authen_reply(reader, session, expected, deadline).await {
            Ok(reply) => {
                self.last_seq = reply.seq_no;
                self.state = if needs_input(reply.status) {
                    AuthenState::Continue
                } else {
                    AuthenState::Done
                };
                Ok(reply)
            }
            Err(err) => {
                self.state = AuthenState::Done;
                Err(err)
            }
        }
    }

    /// Answer the daemon's GETDATA/GETUSER/GETPASS prompt.
    pub async fn cont<W>(
        &mut self,
        writer: &mut W,
        session: &Session,
        input: &str,
    ) -> Result<(), TacError>
    where
        W: AsyncWrite + Unpin,
    {
        self.expect(AuthenState::Continue, "continue")?;
        // the reply to this CONTINUE must not wrap past 255
        if self.last_seq >= u8::MAX - 1 {
            self.state = AuthenState::Done;
            return Err(TacError::assembly("authentication sequence space exhausted"));
        }
        let seq_no = self.last_seq + 1;
        if let Err(err) = cont_send_seq(writer, session, input, seq_no).await {
            self.state = AuthenState::Done;
            return Err(err);
        }
        self.last_seq = seq_no;
        self.state = AuthenState::AwaitReply;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{SECRET, recv, reply, session};
    use crate::{
        AUTHEN_FLAG_NOECHO, AUTHEN_STATUS_FAIL, AUTHEN_TYPE_ASCII, AUTHEN_TYPE_CHAP,
        AUTHEN_TYPE_PAP, VERSION_DEFAULT, VERSION_ONE,
    };
    use tokio::io::duplex;

    fn encode_authen_reply(status: u8, flags: u8, msg: &str, data: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(status);
        buf.put_u8(flags);
        buf.put_u16(msg.len() as u16);
        buf.put_u16(data.len() as u16);
        buf.extend_from_slice(msg.as_bytes());
        buf.extend_from_slice(data);
        buf.to_vec()
    }

    struct Start {
        priv_lvl: u8,
        authen_type: u8,
        service: u8,
        user: String,
        port: String,
        rem_addr: String,
        data: Vec<u8>,
    }

    fn parse_start(body: &[u8]) -> Start {
        assert_eq!(body[0], AUTHEN_ACTION_LOGIN);
        let lens = [body[4], body[5], body[6], body[7]].map(usize::from);
        assert_eq!(body.len(), 8 + lens.iter().sum::<usize>());
        let mut cursor = 8;
        let mut take = |len: usize| {
            let field = body[cursor..cursor + len].to_vec();
            cursor += len;
            field
        };
        let user = String::from_utf8(take(lens[0])).unwrap();
        let port = String::from_utf8(take(lens[1])).unwrap();
        let rem_addr = String::from_utf8(take(lens[2])).unwrap();
        let data = take(lens[3]);
        Start {
            priv_lvl: body[1],
            authen_type: body[2],
            service: body[3],
            user,
            port,
            rem_addr,
            data,
        }
    }

    fn parse_continue(body: &[u8]) -> (String, u8) {
        let msg_len = u16::from_be_bytes([body[0], body[1]]) as usize;
        let data_len = u16::from_be_bytes([body[2], body[3]]) as usize;
        assert_eq!(body.len(), 5 + msg_len + data_len);
        (
            String::from_utf8(body[5..5 + msg_len].to_vec()).unwrap(),
            body[4],
        )
    }

    #[tokio::test]
    async fn pap_start_carries_password() {
        let session = session().with_authen(6, 1, 15);
        let (mut client, mut server) = duplex(4096);
        authen_send(&mut client, &session, "alice", "pw", "tty1", "10.0.0.9", 0)
            .await
            .unwrap();

        let (header, body) = recv(&mut server, SECRET).await;
        assert_eq!(header.seq_no, 1);
        assert_eq!(header.version, VERSION_ONE);
        assert_eq!(header.packet_type, TYPE_AUTHEN);
        let start = parse_start(&body);
        assert_eq!(start.authen_type, AUTHEN_TYPE_PAP);
        assert_eq!(start.priv_lvl, 15);
        assert_eq!(start.service, 1);
        assert_eq!(start.user, "alice");
        assert_eq!(start.port, "tty1");
        assert_eq!(start.rem_addr, "10.0.0.9");
        assert_eq!(start.data, b"pw");
    }

    #[tokio::test]
    async fn chap_start_carries_id_challenge_and_digest() {
        let session = session().with_login(LoginType::Chap);
        let (mut client, mut server) = duplex(4096);
        authen_send(&mut client, &session, "alice", "pw", "", "", 0x2a)
            .await
            .unwrap();

        let (header, body) = recv(&mut server, SECRET).await;
        assert_eq!(header.version, VERSION_ONE);
        let start = parse_start(&body);
        assert_eq!(start.authen_type, AUTHEN_TYPE_CHAP);
        assert_eq!(start.data.len(), 1 + 16 + 16);
        assert_eq!(start.data[0], 0x2a);
        let challenge = &start.data[1..17];
        let digest = chap_digest(0x2a, b"pw", challenge).unwrap();
        assert_eq!(&start.data[17..], &digest);
    }

    #[tokio::test]
    async fn ascii_start_has_no_data() {
        let session = session().with_login(LoginType::Login);
        let (mut client, mut server) = duplex(4096);
        authen_send(&mut client, &session, "alice", "ignored", "", "", 0)
            .await
            .unwrap();

        let (header, body) = recv(&mut server, SECRET).await;
        assert_eq!(header.version, VERSION_DEFAULT);
        let start = parse_start(&body);
        assert_eq!(start.authen_type, AUTHEN_TYPE_ASCII);
        assert!(start.data.is_empty());
    }

    #[tokio::test]
    async fn oversized_user_is_assembly_error() {
        let session = session();
        let (mut client, _server) = duplex(4096);
        let user = "u".repeat(256);
        let err = authen_send(&mut client, &session, &user, "pw", "", "", 0)
            .await
            .unwrap_err();
        assert!(matches!(err, TacError::Assembly(_)));
    }

    #[tokio::test]
    async fn getpass_conversation_walks_sequence_one_to_four() {
        let session = session().with_login(LoginType::Login);
        let (mut client, mut server) = duplex(4096);

        let daemon = tokio::spawn(async move {
            let (start, body) = recv(&mut server, SECRET).await;
            assert_eq!(parse_start(&body).user, "alice");
            let getpass = encode_authen_reply(AUTHEN_STATUS_GETPASS, AUTHEN_FLAG_NOECHO, "Password: ", &[]);
            reply(&mut server, &start, SECRET, &getpass).await;

            let (cont, body) = recv(&mut server, SECRET).await;
            assert_eq!(cont.version, start.version);
            assert_eq!(parse_continue(&body), ("s3cret".to_string(), 0));
            let pass = encode_authen_reply(AUTHEN_STATUS_PASS, 0, "", &[]);
            reply(&mut server, &cont, SECRET, &pass).await;
            (start.seq_no, cont.seq_no)
        });

        let mut seen = Vec::new();
        let mut auth = Authentication::new();
        auth.start(&mut client, &session, "alice", "", "tty0", "", 0)
            .await
            .unwrap();
        seen.push(auth.last_seq());

        let prompt = auth.read(&mut client, &session).await.unwrap();
        seen.push(prompt.seq_no);
        assert_eq!(prompt.status, AUTHEN_STATUS_GETPASS);
        assert!(prompt.no_echo());
        assert_eq!(prompt.msg, "Password: ");
        assert_eq!(auth.state(), AuthenState::Continue);

        auth.cont(&mut client, &session, "s3cret").await.unwrap();
        seen.push(auth.last_seq());

        let done = auth.read(&mut client, &session).await.unwrap();
        seen.push(done.seq_no);
        assert_eq!(done.status, AUTHEN_STATUS_PASS);
        assert!(done.msg.is_empty());
        assert_eq!(auth.state(), AuthenState::Done);

        assert_eq!(seen, [1, 2, 3, 4]);
        assert_eq!(daemon.await.unwrap(), (1, 3));
    }

    #[tokio::test]
    async fn free_functions_drive_the_same_exchange() {
        let session = session().with_login(LoginType::Login);
        let (mut client, mut server) = duplex(4096);

        let daemon = tokio::spawn(async move {
            let (start, _) = recv(&mut server, SECRET).await;
            let body = encode_authen_reply(AUTHEN_STATUS_GETPASS, 0, "", &[]);
            reply(&mut server, &start, SECRET, &body).await;
            let (cont, _) = recv(&mut server, SECRET).await;
            let body = encode_authen_reply(AUTHEN_STATUS_FAIL, 0, "bad password", &[]);
            reply(&mut server, &cont, SECRET, &body).await;
        });

        authen_send(&mut client, &session, "alice", "", "", "", 0)
            .await
            .unwrap();
        let first = authen_read(&mut client, &session, 2).await.unwrap();
        assert_eq!(first.status, AUTHEN_STATUS_GETPASS);
        cont_send(&mut client, &session, "wrong").await.unwrap();
        let last = authen_read(&mut client, &session, first.seq_no + 2)
            .await
            .unwrap();
        assert_eq!(last.status, AUTHEN_STATUS_FAIL);
        assert_eq!(last.msg, "bad password");
        daemon.await.unwrap();
    }

    #[tokio::test]
    async fn out_of_order_reply_is_protocol_error() {
        let session = session();
        let (mut client, mut server) = duplex(4096);
        authen_send(&mut client, &session, "alice", "pw", "", "", 0)
            .await
            .unwrap();
        let (start, _) = recv(&mut server, SECRET).await;
        // answer as if a CONTINUE (seq 3) had been sent
        let body = encode_authen_reply(AUTHEN_STATUS_PASS, 0, "", &[]);
        reply(&mut server, &Header { seq_no: 3, ..start }, SECRET, &body).await;

        let err = authen_read(&mut client, &session, 2).await.unwrap_err();
        assert_eq!(err.code(), crate::error::STATUS_PROTOCOL_ERR);
    }

    #[test]
    fn reply_length_mismatch_is_protocol_error() {
        let header = crate::header::build_header(TYPE_AUTHEN, 2, false, 1);
        let mut body = encode_authen_reply(AUTHEN_STATUS_PASS, 0, "hello", &[]);
        body.push(0);
        assert!(matches!(
            parse_authen_reply(&header, &body),
            Err(TacError::Protocol(_))
        ));
        body.truncate(8);
        assert!(parse_authen_reply(&header, &body).is_err());
        assert!(parse_authen_reply(&header, &[1, 0, 0]).is_err());
    }

    #[test]
    fn unknown_reply_status_is_protocol_error() {
        let header = crate::header::build_header(TYPE_AUTHEN, 2, false, 1);
        let body = encode_authen_reply(0x09, 0, "", &[]);
        assert!(parse_authen_reply(&header, &body).is_err());
        let follow = encode_authen_reply(AUTHEN_STATUS_FOLLOW, 0, "", &[]);
        assert_eq!(
            parse_authen_reply(&header, &follow).unwrap().status,
            AUTHEN_STATUS_FOLLOW
        );
    }

    #[tokio::test]
    async fn conversation_rejects_out_of_state_calls() {
        let session = session();
        let (mut client, _server) = duplex(4096);
        let mut auth = Authentication::new();
        let err = auth.cont(&mut client, &session, "pw").await.unwrap_err();
        assert_eq!(err.code(), crate::error::STATUS_ASSEMBLY_ERR);
        let err = auth.read(&mut client, &session).await.unwrap_err();
        assert!(matches!(err, TacError::Assembly(_)));
        assert_eq!(auth.state(), AuthenState::Start);
    }

    #[tokio::test]
    async fn read_timeout_ends_conversation() {
        let session = session();
        let (mut client, _server) = duplex(4096);
        let mut auth = Authentication::new();
        auth.start(&mut client, &session, "alice", "pw", "", "", 0)
            .await
            .unwrap();
        let err = auth
            .read_timeout(&mut client, &session, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, TacError::ReadTimeout(_)));
        assert_eq!(auth.state(), AuthenState::Done);
    }

    #[tokio::test]
    async fn continue_requires_odd_sequence() {
        let session = session();
        let (mut client, _server) = duplex(4096);
        let err = cont_send_seq(&mut client, &session, "pw", 2)
            .await
            .unwrap_err();
        assert!(matches!(err, TacError::Assembly(_)));
    }
}
