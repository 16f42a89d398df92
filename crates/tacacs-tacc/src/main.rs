// SPDX-License-Identifier: AGPL-3.0-only
mod args;

use crate::args::{Args, Command, LogFormat, Target};
use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use std::process::ExitCode;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::UtcTime;
use usg_tacacs_client::{
    ACCT_FLAG_START, ACCT_FLAG_STOP, ACCT_STATUS_SUCCESS, AUTHEN_STATUS_GETPASS,
    AUTHEN_STATUS_GETUSER, AUTHEN_STATUS_PASS, AUTHOR_STATUS_PASS_ADD, AUTHOR_STATUS_PASS_REPL,
    Attribute, AttributeList, AuthenState, Authentication, Connection, LoginType, Session,
    acct_flag_to_str, acct_read, acct_send, author_read, author_send, connect,
};

fn init_tracing(args: &Args) -> Result<()> {
    let filter = if args.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_writer(std::io::stderr);
    match args.log_format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|err| anyhow!(err))
}

/// Show `text` and read one line. `input` must live for the whole conversation so
/// buffered lines are not lost between prompts.
async fn prompt<R>(input: &mut R, text: &str) -> Result<String>
where
    R: AsyncBufRead + Unpin,
{
    eprint!("{text}");
    let mut line = String::new();
    let read = input
        .read_line(&mut line)
        .await
        .context("reading input from stdin")?;
    if read == 0 {
        bail!("stdin closed while the server was waiting for input");
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn extra_attributes(list: &mut AttributeList, raw: &[String]) -> Result<()> {
    for pair in raw {
        let attr = Attribute::parse(pair).with_context(|| format!("attribute '{pair}'"))?;
        list.append(attr.name(), attr.separator(), attr.value())?;
    }
    Ok(())
}

async fn authenticate(
    conn: &mut Connection,
    session: &Session,
    target: &Target,
    password: Option<String>,
    chap_id: u8,
) -> Result<bool> {
    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut password = match (session.login(), password) {
        (LoginType::Login, given) => given,
        (_, Some(given)) => Some(given),
        (_, None) => Some(prompt(&mut stdin, "Password: ").await?),
    };
    let start_password = match session.login() {
        LoginType::Login => String::new(),
        _ => password.take().unwrap_or_default(),
    };

    let mut auth = Authentication::new();
    auth.start(
        conn,
        session,
        &target.user,
        &start_password,
        &target.tty,
        &target.remote,
        chap_id,
    )
    .await?;

    loop {
        let reply = auth.read(conn, session).await?;
        debug!(status = reply.status, seq = reply.seq_no, "authentication reply");
        if auth.state() == AuthenState::Done {
            if !reply.msg.is_empty() {
                println!("{}", reply.msg);
            }
            info!(user = %target.user, status = reply.status, "authentication finished");
            return Ok(reply.status == AUTHEN_STATUS_PASS);
        }
        let input = match reply.status {
            AUTHEN_STATUS_GETUSER => target.user.clone(),
            AUTHEN_STATUS_GETPASS if password.is_some() => password.take().unwrap_or_default(),
            _ => {
                let text = if reply.msg.is_empty() { "> " } else { reply.msg.as_str() };
                prompt(&mut stdin, text).await?
            }
        };
        auth.cont(conn, session, &input).await?;
    }
}

#[allow(clippy::too_many_arguments)]
async fn authorize(
    conn: &mut Connection,
    session: &Session,
    target: &Target,
    service: &str,
    protocol: Option<&str>,
    cmd: Option<&str>,
    cmd_args: &[String],
    extra: &[String],
) -> Result<bool> {
    let mut attrs = AttributeList::new();
    attrs.set_service(service)?;
    if let Some(protocol) = protocol {
        attrs.set_protocol(protocol)?;
    }
    if let Some(cmd) = cmd {
        attrs.set_cmd(cmd)?;
    }
    for arg in cmd_args {
        attrs.add_cmd_arg(arg)?;
    }
    extra_attributes(&mut attrs, extra)?;

    author_send(conn, session, &target.user, &target.tty, &target.remote, &attrs).await?;
    let reply = author_read(conn, session).await?;
    println!("{}", reply.msg);
    for attr in &reply.attributes {
        println!("{attr}");
    }
    info!(user = %target.user, status = reply.status, "authorization finished");
    Ok(matches!(
        reply.status,
        AUTHOR_STATUS_PASS_ADD | AUTHOR_STATUS_PASS_REPL
    ))
}

async fn account(
    conn: &mut Connection,
    session: &Session,
    target: &Target,
    flags: u8,
    service: Option<&str>,
    task_id: Option<&str>,
    extra: &[String],
) -> Result<bool> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let mut attrs = AttributeList::new();
    let task_id = task_id
        .map(str::to_string)
        .unwrap_or_else(|| std::process::id().to_string());
    attrs.add("task_id", task_id)?;
    match flags {
        ACCT_FLAG_START => attrs.add("start_time", now.to_string())?,
        ACCT_FLAG_STOP => attrs.add("stop_time", now.to_string())?,
        _ => {}
    }
    if let Some(service) = service {
        attrs.add("service", service)?;
    }
    extra_attributes(&mut attrs, extra)?;

    acct_send(conn, session, flags, &target.user, &target.tty, &target.remote, &attrs).await?;
    let reply = acct_read(conn, session).await?;
    println!("{}", reply.msg);
    info!(
        user = %target.user,
        record = acct_flag_to_str(flags),
        status = reply.status,
        "accounting finished"
    );
    Ok(reply.status == ACCT_STATUS_SUCCESS)
}

async fn run(args: &Args) -> Result<bool> {
    let config = args.client_config()?;
    let servers = config.resolve_servers().await?;
    let mut conn = connect(&servers, config.timeout(), config.dscp)
        .await
        .context("connecting to TACACS+ servers")?;
    let session = config.session(conn.secret());
    info!(
        server = %conn.peer_addr(),
        index = conn.server_index(),
        session_id = session.session_id(),
        "connected"
    );

    match &args.command {
        Command::Authenticate {
            target,
            password,
            chap_id,
        } => authenticate(&mut conn, &session, target, password.clone(), *chap_id).await,
        Command::Authorize {
            target,
            service,
            protocol,
            cmd,
            cmd_args,
            attrs,
        } => {
            authorize(
                &mut conn,
                &session,
                target,
                service,
                protocol.as_deref(),
                cmd.as_deref(),
                cmd_args,
                attrs,
            )
            .await
        }
        Command::Account {
            target,
            kind,
            service,
            task_id,
            attrs,
        } => {
            account(
                &mut conn,
                &session,
                target,
                kind.flags(),
                service.as_deref(),
                task_id.as_deref(),
                attrs,
            )
            .await
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(err) = init_tracing(&args) {
        eprintln!("tacc: {err:#}");
        return ExitCode::FAILURE;
    }
    match run(&args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!("{err:#}");
            eprintln!("tacc: {err:#}");
            ExitCode::FAILURE
        }
    }
}
