//! Keep locators
//!
//! A locator addresses a block by content: `<md5>+<size>`, optionally
//! followed by a permission signature (`+A<sig>@<expiry>`) and any number
//! of hints (`+K@zzzzz`, ...).
//!
//! `stripped()` is the canonical content key; signatures and hints never
//! change which bytes a locator names.

use crate::error::{KeepError, Result};
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Length of an md5 digest in hex
pub const MD5_HEX_LEN: usize = 32;

/// Locator of the zero-length block
pub const EMPTY_BLOCK_LOCATOR: &str = "d41d8cd98f00b204e9800998ecf8427e+0";

/// Hex md5 of `data`
pub fn md5_hex(data: impl AsRef<[u8]>) -> String {
    hex::encode(Md5::digest(data.as_ref()))
}

/// Time-limited read permission embedded in a signed locator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionSignature {
    /// Hex HMAC
    pub signature: String,
    /// Unix timestamp after which the signature is no longer honoured
    pub expiry: i64,
}

impl PermissionSignature {
    fn parse(hint: &str) -> Result<Self> {
        let body = &hint[1..];
        let (signature, expiry) = body
            .split_once('@')
            .ok_or_else(|| KeepError::MalformedLocator(format!("bad permission hint {}", hint)))?;

        if signature.is_empty() || !is_hex(signature) {
            return Err(KeepError::MalformedLocator(format!(
                "permission signature is not hex: {}",
                hint
            )));
        }
        if expiry.is_empty() || expiry.len() > 8 || !is_hex(expiry) {
            return Err(KeepError::MalformedLocator(format!(
                "permission timestamp must be a hex Unix timestamp: {}",
                expiry
            )));
        }
        let expiry = i64::from_str_radix(expiry, 16)
            .map_err(|e| KeepError::MalformedLocator(format!("{}: {}", hint, e)))?;

        Ok(Self {
            signature: signature.to_string(),
            expiry,
        })
    }

    /// Expiry as a UTC timestamp
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.expiry, 0)
    }
}

impl fmt::Display for PermissionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "A{}@{:08x}", self.signature, self.expiry)
    }
}

/// A `K@...` hint naming a gateway that should be tried first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayHint<'a> {
    /// `K@<5-char cluster id>`, expands to `https://keep.<id>.<domain>/`
    Region(&'a str),
    /// `K@<service uuid>`, resolved against the accessible-services listing
    Uuid(&'a str),
}

/// Parsed Keep locator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    md5sum: String,
    size: u64,
    permission: Option<PermissionSignature>,
    hints: Vec<String>,
}

impl Locator {
    /// Parse a locator string
    pub fn parse(s: &str) -> Result<Self> {
        let mut pieces = s.split('+');

        let md5sum = pieces.next().unwrap_or_default();
        if md5sum.len() != MD5_HEX_LEN || !is_lower_hex(md5sum) {
            return Err(KeepError::MalformedLocator(format!(
                "md5sum is not a {}-digit lowercase hex string: {:?}",
                MD5_HEX_LEN, s
            )));
        }

        let size = pieces
            .next()
            .ok_or_else(|| KeepError::MalformedLocator(format!("missing size: {:?}", s)))?;
        let size: u64 = size
            .parse()
            .map_err(|_| KeepError::MalformedLocator(format!("size is not numeric: {:?}", s)))?;

        let mut permission = None;
        let mut hints = Vec::new();
        for hint in pieces {
            if !is_valid_hint(hint) {
                return Err(KeepError::MalformedLocator(format!(
                    "invalid hint format: {}",
                    hint
                )));
            }
            if hint.starts_with('A') {
                permission = Some(PermissionSignature::parse(hint)?);
            } else {
                hints.push(hint.to_string());
            }
        }

        Ok(Self {
            md5sum: md5sum.to_string(),
            size,
            permission,
            hints,
        })
    }

    /// Unsigned locator for a block's bytes
    pub fn for_data(data: &[u8]) -> Self {
        Self {
            md5sum: md5_hex(data),
            size: data.len() as u64,
            permission: None,
            hints: Vec::new(),
        }
    }

    pub fn md5sum(&self) -> &str {
        &self.md5sum
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn permission(&self) -> Option<&PermissionSignature> {
        self.permission.as_ref()
    }

    /// Non-permission hints, in their original order
    pub fn hints(&self) -> &[String] {
        &self.hints
    }

    /// `<md5>+<size>`
    pub fn stripped(&self) -> String {
        format!("{}+{}", self.md5sum, self.size)
    }

    /// True once the permission signature's expiry is at or before `now`.
    /// Unsigned locators never expire.
    pub fn permission_expired(&self, now: DateTime<Utc>) -> bool {
        match &self.permission {
            Some(perm) => perm.expiry <= now.timestamp(),
            None => false,
        }
    }

    /// Gateway hints in hint order
    pub fn gateway_hints(&self) -> impl Iterator<Item = GatewayHint<'_>> {
        self.hints.iter().filter_map(|hint| {
            let target = hint.strip_prefix("K@")?;
            match target.len() {
                5 => Some(GatewayHint::Region(target)),
                27 => Some(GatewayHint::Uuid(target)),
                _ => None,
            }
        })
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.md5sum, self.size)?;
        if let Some(perm) = &self.permission {
            write!(f, "+{}", perm)?;
        }
        for hint in &self.hints {
            write!(f, "+{}", hint)?;
        }
        Ok(())
    }
}

impl FromStr for Locator {
    type Err = KeepError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Locator {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Locator {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Locator::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// `^[A-Z][A-Za-z0-9@_-]+$`
pub(crate) fn is_valid_hint(hint: &str) -> bool {
    let mut chars = hint.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() => {}
        _ => return false,
    }
    let rest = chars.as_str();
    !rest.is_empty()
        && rest
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '@' | '_' | '-'))
}

fn is_hex(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Block hashes are compared and weighted as text, so only the canonical
/// lowercase form is accepted
fn is_lower_hex(s: &str) -> bool {
    s.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
}
