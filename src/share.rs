//! Clipboard share strings: a small framed header plus the page JSON,
//! deflate-compressed and base64-armored. The header is gated so newer
//! exporters stay importable until they break the format on purpose.

use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use log::warn;
use thiserror::Error;

use crate::project::ProjectPage;

const MAGIC: &str = "YAFC";
const PAGE_KIND: &str = "ProjectPage";

/// Version stamped into exported share strings.
pub const SHARE_VERSION: Version = Version {
    major: 0,
    minor: 6,
    patch: 0,
};

/// Dotted three-part version carried in the share-string header.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = ShareStringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split('.');
        let mut next = || {
            parts
                .next()
                .and_then(|part| part.parse::<u32>().ok())
                .ok_or(ShareStringError::MalformedVersion)
        };
        let version = Version {
            major: next()?,
            minor: next()?,
            patch: next()?,
        };
        if parts.next().is_some() {
            return Err(ShareStringError::MalformedVersion);
        }
        Ok(version)
    }
}

#[derive(Error, Debug)]
pub enum ShareStringError {
    #[error("the clipboard text is not valid base64 data")]
    Base64(#[from] base64::DecodeError),
    #[error("the data is not a valid deflate stream")]
    Compression(#[from] std::io::Error),
    #[error("the data does not contain a shared project page")]
    NotAProjectPage,
    #[error("the version line of the shared page is malformed")]
    MalformedVersion,
    #[error("the page was exported by an incompatible future version ({0})")]
    FutureVersion(Version),
    #[error("the page uses a reserved header field and cannot be imported")]
    ReservedField,
    #[error("the page document is malformed: {0}")]
    Document(#[from] serde_json::Error),
}

/// Encode a page for the clipboard.
pub fn encode_page(page: &ProjectPage) -> Result<String, ShareStringError> {
    let mut raw = Vec::new();
    raw.extend_from_slice(MAGIC.as_bytes());
    raw.push(b'\n');
    raw.extend_from_slice(PAGE_KIND.as_bytes());
    raw.push(b'\n');
    raw.extend_from_slice(SHARE_VERSION.to_string().as_bytes());
    raw.push(b'\n');
    // Two reserved lines, written empty.
    raw.push(b'\n');
    raw.push(b'\n');
    serde_json::to_writer(&mut raw, page)?;

    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw)?;
    Ok(STANDARD.encode(encoder.finish()?))
}

fn take_line<'a>(rest: &mut &'a [u8]) -> Result<&'a [u8], ShareStringError> {
    let position = rest
        .iter()
        .position(|&byte| byte == b'\n')
        .ok_or(ShareStringError::NotAProjectPage)?;
    let line = &rest[..position];
    *rest = &rest[position + 1..];
    Ok(line)
}

/// Decode a clipboard string into a page. Returns a non-fatal warning when
/// the page was exported by a newer-but-compatible version. Never mutates
/// any project state; a failed import leaves nothing behind.
pub fn decode_page(text: &str) -> Result<(ProjectPage, Option<String>), ShareStringError> {
    let compressed = STANDARD.decode(text.trim())?;
    let mut raw = Vec::new();
    DeflateDecoder::new(compressed.as_slice()).read_to_end(&mut raw)?;

    let mut rest = raw.as_slice();
    let magic = take_line(&mut rest)?;
    let kind = take_line(&mut rest)?;
    let version_line = take_line(&mut rest)?;
    // The first reserved line is ignored; the second is required empty.
    let _reserved = take_line(&mut rest)?;
    let reserved2 = take_line(&mut rest)?;

    if magic != MAGIC.as_bytes() || kind != PAGE_KIND.as_bytes() {
        return Err(ShareStringError::NotAProjectPage);
    }
    let version: Version =
        std::str::from_utf8(version_line)
            .map_err(|_| ShareStringError::MalformedVersion)?
            .parse()?;
    if version.major > SHARE_VERSION.major {
        return Err(ShareStringError::FutureVersion(version));
    }
    if !reserved2.is_empty() {
        return Err(ShareStringError::ReservedField);
    }

    let warning = (version > SHARE_VERSION).then(|| {
        warn!("importing a page exported by a newer version {version}");
        format!("the page was exported by a newer version ({version}); some information may be lost")
    });

    let page = serde_json::from_slice(rest)?;
    Ok((page, warning))
}
