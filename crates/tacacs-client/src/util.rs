// SPDX-License-Identifier: AGPL-3.0-only
//! Shared parsing and I/O utilities for TACACS+ packet bodies.

use crate::error::TacError;
use bytes::{BufMut, BytesMut};
use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt};

pub fn read_bytes(
    body: &[u8],
    offset: usize,
    len: usize,
    label: &str,
) -> Result<(Vec<u8>, usize), TacError> {
    let next = offset
        .checked_add(len)
        .ok_or_else(|| TacError::protocol(format!("overflow parsing {label}")))?;
    let slice = body
        .get(offset..next)
        .ok_or_else(|| TacError::protocol(format!("{label} truncated")))?;
    Ok((slice.to_vec(), next))
}

pub fn read_string(
    body: &[u8],
    offset: usize,
    len: usize,
    label: &str,
) -> Result<(String, usize), TacError> {
    let (raw, next) = read_bytes(body, offset, len, label)?;
    let value = String::from_utf8(raw)
        .map_err(|_| TacError::protocol(format!("decoding {label} as UTF-8")))?;
    Ok((value, next))
}

/// Server text is shown to users as-is; invalid UTF-8 is replaced rather than refused.
pub fn read_text(
    body: &[u8],
    offset: usize,
    len: usize,
    label: &str,
) -> Result<(String, usize), TacError> {
    let (raw, next) = read_bytes(body, offset, len, label)?;
    Ok((String::from_utf8_lossy(&raw).into_owned(), next))
}

/// Single-byte length prefix of a request string field.
pub fn field_len(value: &str, label: &str) -> Result<u8, TacError> {
    u8::try_from(value.len())
        .map_err(|_| TacError::assembly(format!("{label} is {} bytes, limit is 255", value.len())))
}

/// Two-byte length prefix of a request data field.
pub fn put_u16_len(buf: &mut BytesMut, len: usize, label: &str) -> Result<(), TacError> {
    let len = u16::try_from(len)
        .map_err(|_| TacError::assembly(format!("{label} is {len} bytes, limit is 65535")))?;
    buf.put_u16(len);
    Ok(())
}

/// Read until `buf` is full or the stream ends; returns how many bytes arrived.
pub async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => {
                debug!("TACACS+ read failed after {filled} bytes: {err}");
                break;
            }
        }
    }
    filled
}
