//! The buildcache wrapper driver
//!
//! One invocation, one pass through the state machine: resolve arguments,
//! read wrapper capabilities, build the fingerprint, probe the cache tiers,
//! then either replay the stored result or run the tool and insert what it
//! produced.
//!
//! The whole pass runs under an outer handler: any error escaping the
//! sequence is logged and collapsed into "not handled", so an outer shim
//! can exec the tool directly. The cache must never turn a working build
//! into a broken one.

pub mod tiered;
pub mod wrapper;

use buildcache_core::{Config, Digest, Error, Fingerprint, Result};
use buildcache_store::CompressionMode;
use buildcache_store::entry::CacheEntry;
use std::io::Write;
use std::time::Instant;

pub use tiered::TieredCache;
pub use wrapper::{Capabilities, Wrapper};

/// Drive one tool invocation through the cache.
///
/// Returns `Some(exit_code)` when the invocation was completed here —
/// replayed from the cache, terminated on a miss, or actually run — and
/// `None` when the cache could not do the job and the caller must execute
/// the tool directly. The returned exit code is the tool's own, unchanged.
pub fn handle_invocation(
    wrapper: &mut dyn Wrapper,
    config: &Config,
    cache: &mut TieredCache,
) -> Option<i32> {
    match invoke(wrapper, config, cache) {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::debug!(error = %e, "Cache bailed out; falling back to direct execution");
            None
        }
    }
}

fn invoke(
    wrapper: &mut dyn Wrapper,
    config: &Config,
    cache: &mut TieredCache,
) -> Result<Option<i32>> {
    if !wrapper.can_handle() {
        return Ok(None);
    }

    wrapper.resolve_args()?;
    let capabilities = Capabilities::from_strings(&wrapper.capabilities());

    let fp = match fingerprint_invocation(wrapper) {
        Ok(fp) => fp,
        Err(Error::Unsupported { message }) => {
            tracing::debug!(reason = %message, "Command not cacheable; passing through");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    let allow_hard_links = config.hard_links && capabilities.hard_links;
    let expected = wrapper.expected_build_files()?;

    if let Some(entry) = cache.lookup(&fp, &expected, allow_hard_links, capabilities) {
        // Artifacts are in place; replay the streams in order, then the
        // exit code, and the tool never runs.
        replay_streams(entry.stdout(), entry.stderr())?;
        return Ok(Some(entry.exit_code()));
    }
    tracing::debug!(key = %fp, "Cache miss");

    if config.terminate_on_miss {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        for expected_file in expected.values() {
            writeln!(out, "{}", expected_file.path().display())
                .map_err(|e| Error::io_no_path(e, "write"))?;
        }
        return Ok(Some(0));
    }

    let started = Instant::now();
    let result = wrapper.run_for_miss()?;
    tracing::debug!(
        key = %fp,
        duration_ms = started.elapsed().as_millis() as u64,
        exit_code = result.exit_code,
        "Tool finished"
    );

    // Failed runs are never cached: failure diagnostics may be
    // environmental (out of memory, transient I/O) and replaying them
    // would be unsafe.
    if result.exit_code == 0 {
        let mut file_ids = Vec::new();
        for (id, expected_file) in &expected {
            if expected_file.required() || expected_file.path().exists() {
                file_ids.push(id.clone());
            }
        }
        let entry = CacheEntry::new(
            file_ids,
            if config.compress {
                CompressionMode::All
            } else {
                CompressionMode::None
            },
            result.stdout.clone(),
            result.stderr.clone(),
            result.exit_code,
        );
        cache.add(&fp, &entry, &expected, allow_hard_links)?;
    }

    replay_streams(&result.stdout, &result.stderr)?;
    Ok(Some(result.exit_code))
}

/// Build the invocation fingerprint. The feeding order is part of the
/// on-disk contract: preprocessed source, relevant arguments, relevant
/// environment variables, program identity. Changing it invalidates every
/// existing entry.
fn fingerprint_invocation(wrapper: &mut dyn Wrapper) -> Result<Fingerprint> {
    let mut digest = Digest::new();
    digest.update(&wrapper.preprocess_source()?);
    digest.update_list(&wrapper.relevant_arguments());
    digest.update_map(&wrapper.relevant_env_vars());
    digest.update(wrapper.program_id()?.as_bytes());
    Ok(digest.finalize())
}

fn replay_streams(stdout: &[u8], stderr: &[u8]) -> Result<()> {
    let out = std::io::stdout();
    let mut out = out.lock();
    out.write_all(stdout)
        .and_then(|()| out.flush())
        .map_err(|e| Error::io_no_path(e, "write"))?;

    let err = std::io::stderr();
    let mut err = err.lock();
    err.write_all(stderr)
        .and_then(|()| err.flush())
        .map_err(|e| Error::io_no_path(e, "write"))?;
    Ok(())
}
