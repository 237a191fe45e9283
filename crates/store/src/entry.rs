//! Cache entry model and wire codec
//!
//! A [`CacheEntry`] is the stored unit for one tool invocation: which output
//! slots it produced, whether the payloads are compressed, and the captured
//! stdout/stderr/exit code. Entries are immutable values; the codec is
//! deterministic so equivalent entries serialize to identical bytes.
//!
//! Wire form (all integers little-endian):
//! `"BCE"` magic + version byte, `u8` compression mode, `i32` exit code,
//! `u32` file-ID count, then each file ID as a `u32`-length-prefixed UTF-8
//! string, then length-prefixed stdout and stderr byte strings.

use buildcache_core::{Error, Result};
use std::collections::BTreeSet;

/// Name of the serialized-entry file inside an entry directory, and the
/// pseudo file ID used for it in remote key names.
pub const ENTRY_FILE_NAME: &str = ".entry";

/// Magic plus format version. Bumping the version invalidates every
/// existing entry: old readers reject new data and vice versa, and a reject
/// reads as a miss that gets overwritten.
const MAGIC: &[u8; 4] = b"BCE\x01";

/// Whether artifact payloads of an entry are compressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMode {
    /// Payloads are stored verbatim.
    None,
    /// Every payload is zstd-compressed.
    All,
}

impl CompressionMode {
    fn to_wire(self) -> u8 {
        match self {
            Self::None => 0,
            Self::All => 1,
        }
    }

    fn from_wire(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::All),
            other => Err(Error::corrupt(format!("unknown compression mode {other}"))),
        }
    }
}

/// One cached invocation result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    file_ids: Vec<String>,
    compression: CompressionMode,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_code: i32,
}

impl CacheEntry {
    /// Assemble an entry.
    #[must_use]
    pub fn new(
        file_ids: Vec<String>,
        compression: CompressionMode,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        exit_code: i32,
    ) -> Self {
        Self {
            file_ids,
            compression,
            stdout,
            stderr,
            exit_code,
        }
    }

    /// The output slots this entry carries, in insertion order.
    #[must_use]
    pub fn file_ids(&self) -> &[String] {
        &self.file_ids
    }

    /// Compression mode of the artifact payloads.
    #[must_use]
    pub fn compression(&self) -> CompressionMode {
        self.compression
    }

    /// Captured standard output.
    #[must_use]
    pub fn stdout(&self) -> &[u8] {
        &self.stdout
    }

    /// Captured standard error.
    #[must_use]
    pub fn stderr(&self) -> &[u8] {
        &self.stderr
    }

    /// The tool's exit code.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }
}

/// Serialize an entry to its wire form.
#[must_use]
pub fn serialize(entry: &CacheEntry) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        MAGIC.len() + 1 + 4 + 4 + entry.stdout.len() + entry.stderr.len() + 64,
    );
    out.extend_from_slice(MAGIC);
    out.push(entry.compression.to_wire());
    out.extend_from_slice(&entry.exit_code.to_le_bytes());
    out.extend_from_slice(&(entry.file_ids.len() as u32).to_le_bytes());
    for id in &entry.file_ids {
        out.extend_from_slice(&(id.len() as u32).to_le_bytes());
        out.extend_from_slice(id.as_bytes());
    }
    out.extend_from_slice(&(entry.stdout.len() as u32).to_le_bytes());
    out.extend_from_slice(&entry.stdout);
    out.extend_from_slice(&(entry.stderr.len() as u32).to_le_bytes());
    out.extend_from_slice(&entry.stderr);
    out
}

/// Deserialize an entry from its wire form.
///
/// # Errors
///
/// Returns [`Error::Corrupt`] for truncated input, an unknown magic or
/// version, an out-of-range compression mode, duplicate or non-UTF-8 file
/// IDs, or trailing bytes after the last field.
pub fn deserialize(data: &[u8]) -> Result<CacheEntry> {
    let mut cursor = Cursor { data, pos: 0 };

    let magic = cursor.take(MAGIC.len())?;
    if magic != MAGIC {
        return Err(Error::corrupt(format!(
            "bad entry magic/version {magic:02x?}"
        )));
    }

    let compression = CompressionMode::from_wire(cursor.take(1)?[0])?;
    let exit_code = i32::from_le_bytes(cursor.take_array()?);

    let n_ids = u32::from_le_bytes(cursor.take_array()?) as usize;
    let mut file_ids = Vec::with_capacity(n_ids.min(64));
    let mut seen = BTreeSet::new();
    for _ in 0..n_ids {
        let len = u32::from_le_bytes(cursor.take_array()?) as usize;
        let raw = cursor.take(len)?;
        let id = std::str::from_utf8(raw)
            .map_err(|_| Error::corrupt("file ID is not UTF-8"))?
            .to_string();
        if !seen.insert(id.clone()) {
            return Err(Error::corrupt(format!("duplicate file ID {id:?}")));
        }
        file_ids.push(id);
    }

    let stdout = cursor.take_prefixed()?.to_vec();
    let stderr = cursor.take_prefixed()?.to_vec();

    if cursor.pos != data.len() {
        return Err(Error::corrupt(format!(
            "{} trailing bytes after entry",
            data.len() - cursor.pos
        )));
    }

    Ok(CacheEntry {
        file_ids,
        compression,
        stdout,
        stderr,
        exit_code,
    })
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| Error::corrupt("truncated entry"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let slice = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn take_prefixed(&mut self) -> Result<&'a [u8]> {
        let len = u32::from_le_bytes(self.take_array()?) as usize;
        self.take(len)
    }
}
