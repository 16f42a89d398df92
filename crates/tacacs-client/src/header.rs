// SPDX-License-Identifier: AGPL-3.0-only
//! TACACS+ packet header construction, serialization and reply validation.

use crate::error::{TacError, ensure_protocol};
use crate::{FLAG_SINGLE_CONNECT, FLAG_UNENCRYPTED, MAX_PACKET_SIZE, VERSION_MAJOR};

pub const HEADER_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub packet_type: u8,
    pub seq_no: u8,
    pub flags: u8,
    pub session_id: u32,
    pub length: u32,
}

impl Header {
    pub fn response(&self, length: u32) -> Header {
        Header {
            version: self.version,
            packet_type: self.packet_type,
            seq_no: self.seq_no.wrapping_add(1),
            flags: self.flags,
            session_id: self.session_id,
            length,
        }
    }

    pub fn with_version(mut self, version: u8) -> Header {
        self.version = version;
        self
    }

    pub fn with_single_connect(mut self, enabled: bool) -> Header {
        if enabled {
            self.flags |= FLAG_SINGLE_CONNECT;
        } else {
            self.flags &= !FLAG_SINGLE_CONNECT;
        }
        self
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_UNENCRYPTED == 0
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = self.version;
        buf[1] = self.packet_type;
        buf[2] = self.seq_no;
        buf[3] = self.flags;
        buf[4..8].copy_from_slice(&self.session_id.to_be_bytes());
        buf[8..12].copy_from_slice(&self.length.to_be_bytes());
        buf
    }

    /// Decode a header from the bytes actually read off the wire.
    pub fn from_bytes(buf: &[u8]) -> Result<Header, TacError> {
        let buf: &[u8; HEADER_LEN] = buf
            .get(..HEADER_LEN)
            .and_then(|b| b.try_into().ok())
            .ok_or(TacError::ShortHeader { got: buf.len() })?;
        Ok(Header {
            version: buf[0],
            packet_type: buf[1],
            seq_no: buf[2],
            flags: buf[3],
            session_id: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            length: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }
}

/// Request header with the default version; the body length is patched in when the
/// body is final.
pub fn build_header(packet_type: u8, seq_no: u8, unencrypted: bool, session_id: u32) -> Header {
    Header {
        version: crate::VERSION_DEFAULT,
        packet_type,
        seq_no,
        flags: if unencrypted { FLAG_UNENCRYPTED } else { 0 },
        session_id,
        length: 0,
    }
}

/// Validate a reply header against the request it answers.
pub fn check_header(
    header: &Header,
    expected_packet_type: u8,
    expected_seq_no: u8,
) -> Result<(), TacError> {
    ensure_protocol!(
        header.version >> 4 == VERSION_MAJOR,
        "unsupported TACACS+ major version {:x}",
        header.version >> 4
    );
    ensure_protocol!(
        header.version & 0x0f <= 1,
        "unsupported TACACS+ minor version {:x}",
        header.version & 0x0f
    );
    ensure_protocol!(
        header.packet_type == expected_packet_type,
        "unexpected TACACS+ type {}, expected {}",
        header.packet_type,
        expected_packet_type
    );
    ensure_protocol!(
        header.seq_no == expected_seq_no,
        "TACACS+ reply seq {} out of order, expected {}",
        header.seq_no,
        expected_seq_no
    );
    if header.length == 0 || header.length as usize > MAX_PACKET_SIZE {
        return Err(TacError::assembly(format!(
            "TACACS+ reply body length {} outside 1..={MAX_PACKET_SIZE}",
            header.length
        )));
    }
    Ok(())
}
