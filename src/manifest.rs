//! Manifest text codec
//!
//! A manifest describes a collection as one line per stream:
//!
//! ```text
//! <path> <locator>+ <position>:<size>:<name>+\n
//! ```
//!
//! The locators of a stream, concatenated in order, form one virtual byte
//! sequence; each file token names a contiguous range of it. Spaces in
//! names are written as `\040`.

use crate::error::{KeepError, Result};
use crate::locator::Locator;
use std::path::Path;

const ROOT_STREAM: &str = ".";
const ESCAPED_SPACE: &str = "\\040";

/// One file's byte range within a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileToken {
    /// Offset into the stream's concatenated block bytes
    pub position: u64,
    /// Length in bytes
    pub size: u64,
    /// Unescaped file name
    pub name: String,
    /// Directory prefix inherited from the stream ("" for the root stream, else slash-terminated)
    pub path: String,
}

impl FileToken {
    /// Parse `<position>:<size>:<name>` within a stream whose prefix is `path`
    pub fn parse(token: &str, path: &str) -> Option<Self> {
        let mut parts = token.splitn(3, ':');
        let position = parts.next()?;
        let size = parts.next()?;
        let name = parts.next()?;

        if !is_decimal(position) || !is_decimal(size) || name.is_empty() {
            return None;
        }

        Some(Self {
            position: position.parse().ok()?,
            size: size.parse().ok()?,
            name: unescape_name(name),
            path: path.to_string(),
        })
    }

    /// Path of the file relative to the collection root
    pub fn full_path(&self) -> String {
        format!("{}{}", self.path, self.name)
    }

    /// Manifest form of this token (name escaped, path not included)
    pub fn to_token_string(&self) -> String {
        format!("{}:{}:{}", self.position, self.size, escape_name(&self.name))
    }
}

/// One manifest line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestStream {
    /// "." for the root stream, else "./<dir>"
    pub name: String,
    pub locators: Vec<Locator>,
    pub file_tokens: Vec<FileToken>,
}

impl ManifestStream {
    /// Serialize back to a newline-terminated manifest line
    pub fn to_line(&self) -> String {
        let mut tokens = vec![escape_name(&self.name)];
        tokens.extend(self.locators.iter().map(|l| l.to_string()));
        tokens.extend(self.file_tokens.iter().map(|t| t.to_token_string()));
        let mut line = tokens.join(" ");
        line.push('\n');
        line
    }

    /// Total bytes addressed by the stream's locators
    pub fn total_size(&self) -> u64 {
        self.locators.iter().map(|l| l.size()).sum()
    }
}

/// A local file as it will appear in an encoded manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
}

impl FileEntry {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }

    /// Entry named after the final component of `path`
    pub fn from_path(path: &Path, size: u64) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                KeepError::InvalidArgument(format!("{} has no usable file name", path.display()))
            })?;
        Ok(Self::new(name, size))
    }
}

/// Decode manifest text into its streams
pub fn decode(manifest_text: &str) -> Result<Vec<ManifestStream>> {
    if manifest_text.is_empty() {
        return Err(KeepError::InvalidManifest(
            "Manifest text cannot be empty.".to_string(),
        ));
    }

    let mut streams = Vec::new();
    for line in manifest_text.split('\n').filter(|l| !l.trim().is_empty()) {
        let mut tokens = line.split_whitespace().peekable();
        let Some(stream_name) = tokens.next() else {
            continue;
        };

        if streams.is_empty() && !stream_name.starts_with('.') {
            return Err(KeepError::InvalidManifest(
                "Invalid first path component (expecting \".\")".to_string(),
            ));
        }

        let stream_name = unescape_name(stream_name);
        let path = stream_path(&stream_name);

        let mut locators = Vec::new();
        while let Some(token) = tokens.peek() {
            match Locator::parse(token) {
                Ok(locator) => {
                    locators.push(locator);
                    tokens.next();
                }
                Err(_) => break,
            }
        }

        let file_tokens = tokens
            .filter_map(|token| FileToken::parse(token, &path))
            .collect();

        streams.push(ManifestStream {
            name: stream_name,
            locators,
            file_tokens,
        });
    }

    if streams.is_empty() {
        return Err(KeepError::InvalidManifest(
            "Manifest text cannot be empty.".to_string(),
        ));
    }

    Ok(streams)
}

/// Encode `files`, logically concatenated in order over `locators`, as a
/// single root stream
pub fn encode<L: AsRef<str>>(files: &[FileEntry], locators: &[L]) -> String {
    let mut tokens = vec![ROOT_STREAM.to_string()];
    tokens.extend(locators.iter().map(|l| l.as_ref().to_string()));

    let mut position = 0u64;
    for file in files {
        tokens.push(format!("{}:{}:{}", position, file.size, escape_name(&file.name)));
        position += file.size;
    }

    let mut text = tokens.join(" ");
    text.push('\n');
    text
}

/// Encode already-decoded streams
pub fn encode_streams(streams: &[ManifestStream]) -> String {
    streams.iter().map(ManifestStream::to_line).collect()
}

/// "." → "", "./a/b" → "a/b/"
fn stream_path(stream_name: &str) -> String {
    match stream_name.strip_prefix("./") {
        Some(rest) if !rest.is_empty() => format!("{}/", rest.trim_end_matches('/')),
        _ => String::new(),
    }
}

pub fn escape_name(name: &str) -> String {
    name.replace(' ', ESCAPED_SPACE)
}

pub fn unescape_name(name: &str) -> String {
    name.replace(ESCAPED_SPACE, " ")
}

fn is_decimal(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}
