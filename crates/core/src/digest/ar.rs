//! Timestamp-insensitive hashing of UNIX `ar` archives
//!
//! Archive members carry an mtime, uid, gid, and mode in their headers, and
//! linkers stamp the current time into them on every run. Hashing those
//! fields would make every rebuilt `.a` file look new, so only the member
//! names, sizes, and contents are fed to the digest.

use super::Digest;

/// Global archive magic.
const MAGIC: &[u8; 8] = b"!<arch>\n";

/// Per-member header length.
const HEADER_LEN: usize = 60;

/// Terminator at the end of every member header.
const HEADER_END: &[u8; 2] = b"`\n";

/// Whether the byte stream looks like an `ar` archive.
pub(super) fn is_archive(data: &[u8]) -> bool {
    data.len() >= MAGIC.len() && &data[..MAGIC.len()] == MAGIC
}

/// Hash an archive, skipping the volatile header fields.
///
/// A header that does not parse stops member-wise traversal; the remaining
/// bytes are hashed raw so the digest still covers the whole file.
pub(super) fn update_from_archive(digest: &mut Digest, data: &[u8]) {
    digest.update(MAGIC);

    let mut pos = MAGIC.len();
    while pos + HEADER_LEN <= data.len() {
        let header = &data[pos..pos + HEADER_LEN];
        if &header[58..60] != HEADER_END {
            digest.update(&data[pos..]);
            return;
        }

        // Header layout: name[16] mtime[12] uid[6] gid[6] mode[8] size[10] end[2]
        let name = &header[0..16];
        let size_field = &header[48..58];
        let size = match parse_size(size_field) {
            Some(size) => size,
            None => {
                digest.update(&data[pos..]);
                return;
            }
        };

        digest.update(name);
        digest.update(size_field);

        let body_start = pos + HEADER_LEN;
        let body_end = body_start.saturating_add(size).min(data.len());
        digest.update(&data[body_start..body_end]);

        // Member data is padded to an even offset.
        pos = body_start + size + (size & 1);
    }

    if pos < data.len() {
        digest.update(&data[pos..]);
    }
}

fn parse_size(field: &[u8]) -> Option<usize> {
    std::str::from_utf8(field).ok()?.trim().parse().ok()
}
