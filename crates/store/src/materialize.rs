//! Artifact materialisation
//!
//! Makes a cached artifact appear at its expected destination. Three routes,
//! in order of preference: decompress-copy (when the stored payload is
//! compressed), hardlink (when the wrapper and config allow it), plain copy.
//! A link failure of any kind, including a cross-filesystem EXDEV, silently
//! degrades to a copy. A failed materialisation never leaves a partial
//! target behind.

use buildcache_core::{Error, Result};
use std::fs;
use std::path::Path;

/// Materialise `source` (a file inside the cache) at `target`.
///
/// `create_dirs` permits creating missing intermediate directories for the
/// target; `compressed` says the stored payload is zstd-compressed and must
/// be inflated on the way out.
///
/// # Errors
///
/// Returns an I/O error when the target cannot be produced; the target path
/// is removed before the error is returned.
pub fn materialize(
    source: &Path,
    target: &Path,
    allow_hard_links: bool,
    create_dirs: bool,
    compressed: bool,
) -> Result<()> {
    if create_dirs {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create_dir_all"))?;
        }
    }

    // A stale target blocks hardlinking and must not survive a failure.
    match fs::remove_file(target) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(Error::io(e, target, "remove_file")),
    }

    let result = if compressed {
        decompress_into(source, target)
    } else if allow_hard_links {
        match fs::hard_link(source, target) {
            Ok(()) => Ok(()),
            Err(_) => copy_into(source, target),
        }
    } else {
        copy_into(source, target)
    };

    if result.is_err() {
        let _ = fs::remove_file(target);
    }
    result
}

fn copy_into(source: &Path, target: &Path) -> Result<()> {
    fs::copy(source, target)
        .map(|_| ())
        .map_err(|e| Error::io(e, target, "copy"))
}

fn decompress_into(source: &Path, target: &Path) -> Result<()> {
    let reader = fs::File::open(source).map_err(|e| Error::io(e, source, "open"))?;
    let mut writer = fs::File::create(target).map_err(|e| Error::io(e, target, "create"))?;
    zstd::stream::copy_decode(reader, &mut writer).map_err(|e| Error::io(e, target, "decompress"))
}
