// SPDX-License-Identifier: AGPL-3.0-only
//! Decoded daemon reply shared by the three AAA exchanges.

use crate::attrib::AttributeList;
use crate::AUTHEN_FLAG_NOECHO;

/// One decoded reply. The caller owns it, attribute list included; dropping the
/// reply releases everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    /// Sub-protocol status as sent by the daemon.
    pub status: u8,
    pub flags: u8,
    /// Sequence number of the reply packet; the next request uses `seq_no + 1`.
    pub seq_no: u8,
    pub msg: String,
    pub attributes: AttributeList,
}

impl Reply {
    /// The daemon asked for the next input not to be echoed.
    pub fn no_echo(&self) -> bool {
        self.flags & AUTHEN_FLAG_NOECHO != 0
    }
}
