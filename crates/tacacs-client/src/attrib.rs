// SPDX-License-Identifier: AGPL-3.0-only
//! Ordered attribute-value pair lists and their wire encoding.
//!
//! A pair is encoded as `name<sep>value` where `sep` is `=` (mandatory) or `*`
//! (optional). Each encoded pair is at most [`ATTRIB_MAX_LEN`] bytes and a list holds
//! at most [`ATTRIB_MAX_CNT`] pairs, because TACACS+ carries both as single bytes.

use crate::error::{TacError, ensure_protocol};
use crate::util::read_string;
use crate::{ATTRIB_MAX_CNT, ATTRIB_MAX_LEN};
use bytes::{BufMut, BytesMut};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separator {
    Mandatory,
    Optional,
}

impl Separator {
    pub fn as_char(self) -> char {
        match self {
            Separator::Mandatory => '=',
            Separator::Optional => '*',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '=' => Some(Separator::Mandatory),
            '*' => Some(Separator::Optional),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    name: String,
    separator: Separator,
    value: String,
}

/// A name must be non-empty and free of separators, or the pair would not split
/// back into the same name and value.
fn check_name(name: &str) -> Result<(), TacError> {
    if name.is_empty() {
        return Err(TacError::assembly("attribute name is empty"));
    }
    if name.contains(['=', '*']) {
        return Err(TacError::assembly(format!(
            "attribute name '{name}' contains a separator"
        )));
    }
    Ok(())
}

impl Attribute {
    /// Build a pair, refusing a malformed name or an encoding over 255 bytes.
    pub fn new(
        name: impl Into<String>,
        separator: Separator,
        value: impl Into<String>,
    ) -> Result<Attribute, TacError> {
        let name = name.into();
        check_name(&name)?;
        let attr = Attribute {
            name,
            separator,
            value: value.into(),
        };
        let len = attr.encoded_len();
        if len > ATTRIB_MAX_LEN {
            return Err(TacError::AttribTooLong { len });
        }
        Ok(attr)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn separator(&self) -> Separator {
        self.separator
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is_optional(&self) -> bool {
        self.separator == Separator::Optional
    }

    /// Length of `name<sep>value` on the wire.
    pub fn encoded_len(&self) -> usize {
        self.name.len() + 1 + self.value.len()
    }

    /// Split a wire pair at its first separator.
    pub fn parse(raw: &str) -> Result<Attribute, TacError> {
        let (idx, sep) = raw
            .char_indices()
            .find_map(|(i, c)| Separator::from_char(c).map(|sep| (i, sep)))
            .ok_or_else(|| TacError::protocol(format!("attribute '{raw}' has no separator")))?;
        Ok(Attribute {
            name: raw[..idx].to_string(),
            separator: sep,
            value: raw[idx + 1..].to_string(),
        })
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.name, self.separator.as_char(), self.value)
    }
}

/// Insertion-ordered attribute list; the order is the wire order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeList {
    attrs: Vec<Attribute>,
}

impl AttributeList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Attribute> {
        self.attrs.iter()
    }

    /// First pair with the given name.
    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.attrs.iter().find(|a| a.name == name)
    }

    /// Strict append: rejects a pair longer than 255 bytes or a 256th pair and leaves
    /// the list unchanged.
    pub fn append(
        &mut self,
        name: impl Into<String>,
        separator: Separator,
        value: impl Into<String>,
    ) -> Result<(), TacError> {
        self.push(Attribute::new(name, separator, value)?)
    }

    /// `name=value` through the strict path.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) -> Result<(), TacError> {
        self.append(name, Separator::Mandatory, value)
    }

    /// Lenient append: cuts the value so the encoded pair fits in 255 bytes.
    ///
    /// Returns whether the value was truncated. The pair count limit still applies, as
    /// does the length limit when the name alone does not fit.
    pub fn append_truncate(
        &mut self,
        name: impl Into<String>,
        separator: Separator,
        value: impl Into<String>,
    ) -> Result<bool, TacError> {
        let name = name.into();
        check_name(&name)?;
        let mut value = value.into();
        let room = ATTRIB_MAX_LEN
            .checked_sub(name.len() + 1)
            .ok_or(TacError::AttribTooLong {
                len: name.len() + 1 + value.len(),
            })?;
        let truncated = value.len() > room;
        if truncated {
            let mut cut = room;
            while !value.is_char_boundary(cut) {
                cut -= 1;
            }
            value.truncate(cut);
        }
        self.push(Attribute {
            name,
            separator,
            value,
        })?;
        Ok(truncated)
    }

    pub fn add_truncate(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<bool, TacError> {
        self.append_truncate(name, Separator::Mandatory, value)
    }

    fn push(&mut self, attr: Attribute) -> Result<(), TacError> {
        if self.attrs.len() >= ATTRIB_MAX_CNT {
            return Err(TacError::AttribTooMany);
        }
        self.attrs.push(attr);
        Ok(())
    }

    pub(crate) fn insert(&mut self, index: usize, attr: Attribute) -> Result<(), TacError> {
        if self.attrs.len() >= ATTRIB_MAX_CNT {
            return Err(TacError::AttribTooMany);
        }
        self.attrs.insert(index, attr);
        Ok(())
    }

    pub(crate) fn retain(&mut self, keep: impl FnMut(&Attribute) -> bool) {
        self.attrs.retain(keep);
    }

    /// Index of the first attribute named `name`, ignoring ASCII case.
    pub(crate) fn position(&self, name: &str) -> Option<usize> {
        self.attrs.iter().position(|a| a.name.eq_ignore_ascii_case(name))
    }

    /// Standalone wire form: each pair as a length byte followed by its bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.attrs.iter().map(|a| 1 + a.encoded_len()).sum());
        for attr in &self.attrs {
            buf.put_u8(attr.encoded_len() as u8);
            buf.extend_from_slice(attr.to_string().as_bytes());
        }
        buf.to_vec()
    }

    /// Inverse of [`AttributeList::encode`] for `count` pairs.
    pub fn decode(bytes: &[u8], count: usize) -> Result<AttributeList, TacError> {
        ensure_protocol!(count <= ATTRIB_MAX_CNT, "{count} attributes exceeds limit");
        let mut list = AttributeList::new();
        let mut cursor = 0;
        for idx in 0..count {
            let len = *bytes
                .get(cursor)
                .ok_or_else(|| TacError::protocol(format!("arg[{idx}] length truncated")))?
                as usize;
            let (raw, next) = read_string(bytes, cursor + 1, len, &format!("arg[{idx}]"))?;
            cursor = next;
            list.push(Attribute::parse(&raw)?)?;
        }
        Ok(list)
    }

    /// Body layout used inside requests: the table of pair lengths.
    pub(crate) fn put_lengths(&self, buf: &mut BytesMut) {
        for attr in &self.attrs {
            buf.put_u8(attr.encoded_len() as u8);
        }
    }

    /// Body layout used inside requests: the concatenated pairs.
    pub(crate) fn put_values(&self, buf: &mut BytesMut) {
        for attr in &self.attrs {
            buf.extend_from_slice(attr.to_string().as_bytes());
        }
    }

    /// Rebuild a list from a reply's length table and the data that follows it.
    pub(crate) fn from_table(lens: &[u8], body: &[u8], mut cursor: usize) -> Result<AttributeList, TacError> {
        let mut list = AttributeList::new();
        for (idx, len) in lens.iter().enumerate() {
            let (raw, next) = read_string(body, cursor, *len as usize, &format!("arg[{idx}]"))?;
            cursor = next;
            list.push(Attribute::parse(&raw)?)?;
        }
        Ok(list)
    }

    /// Hand the list back for disposal. Dropping it has the same effect.
    pub fn release(self) {}
}

impl<'a> IntoIterator for &'a AttributeList {
    type Item = &'a Attribute;
    type IntoIter = std::slice::Iter<'a, Attribute>;

    fn into_iter(self) -> Self::IntoIter {
        self.attrs.iter()
    }
}
