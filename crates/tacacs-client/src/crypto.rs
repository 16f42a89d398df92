// SPDX-License-Identifier: AGPL-3.0-only
//! TACACS+ shared-secret body obfuscation (MD5 pad) and the CHAP MD5 digest.

use crate::error::TacError;
use crate::header::Header;
use openssl::error::ErrorStack;
use openssl::hash::{Hasher, MessageDigest};

pub const MD5_LEN: usize = 16;

fn md5(parts: &[&[u8]]) -> Result<[u8; MD5_LEN], TacError> {
    let mut hasher = Hasher::new(MessageDigest::md5()).map_err(digest_unavailable)?;
    for part in parts {
        hasher.update(part).map_err(digest_unavailable)?;
    }
    let digest = hasher.finish().map_err(digest_unavailable)?;
    digest
        .as_ref()
        .try_into()
        .map_err(|_| TacError::assembly("unexpected MD5 length"))
}

fn digest_unavailable(err: ErrorStack) -> TacError {
    TacError::assembly(format!("MD5 unavailable: {err}"))
}

/// XOR `body` with the MD5 pad keyed by the header's session id, version and seq_no.
///
/// Encryption and decryption are the same operation. The pad is applied whenever the
/// header does not carry the unencrypted flag, including with an empty secret.
pub fn obfuscate(header: &Header, secret: &[u8], body: &mut [u8]) -> Result<(), TacError> {
    if !header.is_encrypted() {
        return Ok(());
    }

    let session_id = header.session_id.to_be_bytes();
    let tail = [header.version, header.seq_no];
    let mut prev: Option<[u8; MD5_LEN]> = None;

    for chunk in body.chunks_mut(MD5_LEN) {
        let pad = match prev {
            None => md5(&[&session_id[..], secret, &tail[..]])?,
            Some(prev_pad) => md5(&[&session_id[..], secret, &tail[..], &prev_pad[..]])?,
        };
        for (b, p) in chunk.iter_mut().zip(pad.iter()) {
            *b ^= *p;
        }
        prev = Some(pad);
    }
    Ok(())
}

/// CHAP response value, `MD5(id || password || challenge)` (RFC 1994 section 3).
pub fn chap_digest(id: u8, password: &[u8], challenge: &[u8]) -> Result<[u8; MD5_LEN], TacError> {
    md5(&[&[id][..], password, challenge])
}
