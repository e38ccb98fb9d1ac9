//! Shape detection by first-byte sniffing.

use cf_common::{Error, Result};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// On-disk shape of a clawbox file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// The entire file is a JSON spec document.
    HeaderJson,
    /// Gzip-compressed tape archive with an embedded `clawspec.json`.
    Archive,
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Shape::HeaderJson => write!(f, "header-json"),
            Shape::Archive => write!(f, "archive"),
        }
    }
}

/// Sniff the shape of a clawbox file.
///
/// The first non-whitespace byte decides: `{` means header-JSON, anything
/// else is treated as an archive. An empty (or all-whitespace) file is a
/// spec violation rather than a shape.
pub fn detect_shape(path: &Path) -> Result<Shape> {
    let mut file = File::open(path)?;
    let mut head = [0u8; 512];
    let n = file.read(&mut head)?;
    detect_shape_bytes(&head[..n]).ok_or_else(|| {
        Error::InvalidSpec(format!("{} is empty, not a clawbox", path.display()))
    })
}

/// Shape from a leading byte sample; `None` when all bytes are whitespace.
pub fn detect_shape_bytes(head: &[u8]) -> Option<Shape> {
    let first = head
        .iter()
        .copied()
        .find(|b| !matches!(b, b' ' | b'\t' | b'\r' | b'\n'))?;
    Some(if first == b'{' {
        Shape::HeaderJson
    } else {
        Shape::Archive
    })
}
