//! Wrapper capability interface
//!
//! A wrapper encapsulates tool-specific policy: which arguments matter,
//! which environment variables matter, how to canonicalise the input, and
//! which files the tool will produce. The driver consumes wrappers through
//! the [`Wrapper`] trait and stays tool-agnostic.
//!
//! The default method bodies implement the pass-everything policy: all
//! arguments relevant, no environment variables, no preprocessing, program
//! identity is the digest of the tool binary. Real wrappers override the
//! parts they understand.

use buildcache_core::{Digest, Error, Result, RunResult, sys};
use buildcache_store::ExpectedFileMap;
use std::collections::BTreeMap;
use std::path::Path;

/// Parsed wrapper capabilities.
///
/// `hard_links` asserts the tool never rewrites an existing output file in
/// place, which makes hard-linked cache artifacts safe. `create_target_dirs`
/// asks the driver to create missing intermediate directories for targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Cached artifacts may be hard-linked to their targets.
    pub hard_links: bool,
    /// Target parent directories may need to be created.
    pub create_target_dirs: bool,
}

impl Capabilities {
    /// Parse the capability strings a wrapper declares. Unknown strings are
    /// logged and ignored.
    #[must_use]
    pub fn from_strings(strings: &[String]) -> Self {
        let mut capabilities = Self::default();
        for capability in strings {
            match capability.as_str() {
                "hard_links" => capabilities.hard_links = true,
                "create_target_dirs" => capabilities.create_target_dirs = true,
                other => tracing::error!(capability = %other, "Invalid capability string"),
            }
        }
        capabilities
    }
}

/// Tool-specific policy consumed by the driver.
///
/// Every operation except [`Wrapper::preprocess_source`] is expected to be
/// total; only preprocessing may signal an unsupported command (via
/// [`Error::Unsupported`]) to force pass-through.
pub trait Wrapper {
    /// The command line this wrapper was created for, tool binary first.
    fn args(&self) -> &[String];

    /// Whether this wrapper understands the command line. Used to dispatch
    /// between wrappers; the driver passes unhandled commands through.
    fn can_handle(&self) -> bool {
        true
    }

    /// Expand response files into a flat argument list.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when a response file cannot be read.
    fn resolve_args(&mut self) -> Result<()> {
        Ok(())
    }

    /// Capability strings from `{"hard_links", "create_target_dirs"}`.
    fn capabilities(&self) -> Vec<String> {
        Vec::new()
    }

    /// Canonical bytes of the semantically significant input.
    ///
    /// # Errors
    ///
    /// [`Error::Unsupported`] forces the driver to pass the command through
    /// uncached; any other error aborts the cache attempt.
    fn preprocess_source(&mut self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    /// The arguments that influence the output, in command-line order.
    fn relevant_arguments(&self) -> Vec<String> {
        self.args().to_vec()
    }

    /// The environment variables that influence the output.
    fn relevant_env_vars(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    /// A stable identifier for the tool: version string, architecture, or a
    /// digest of the binary itself.
    ///
    /// # Errors
    ///
    /// Returns an error when the identity cannot be established; the driver
    /// then passes the command through.
    fn program_id(&mut self) -> Result<String> {
        let program = self
            .args()
            .first()
            .ok_or_else(|| Error::config("empty command line"))?
            .clone();
        let mut digest = Digest::new();
        digest.update_from_file(Path::new(&program))?;
        Ok(digest.finalize().to_hex())
    }

    /// The files this invocation is expected to produce.
    ///
    /// # Errors
    ///
    /// Returns an error when the output set cannot be determined (e.g. no
    /// `-o` argument).
    fn expected_build_files(&self) -> Result<ExpectedFileMap> {
        Ok(ExpectedFileMap::new())
    }

    /// Run the tool for a cache miss, capturing its output.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the tool cannot be spawned. A tool that
    /// runs and exits non-zero is a result, not an error.
    fn run_for_miss(&mut self) -> Result<RunResult> {
        sys::run(self.args())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_capability_strings() {
        let capabilities =
            Capabilities::from_strings(&["hard_links".into(), "create_target_dirs".into()]);
        assert!(capabilities.hard_links);
        assert!(capabilities.create_target_dirs);
    }

    #[test]
    fn unknown_capability_strings_are_ignored() {
        let capabilities = Capabilities::from_strings(&["teleport".into(), "hard_links".into()]);
        assert!(capabilities.hard_links);
        assert!(!capabilities.create_target_dirs);
    }

    #[test]
    fn empty_capability_set_is_default() {
        assert_eq!(Capabilities::from_strings(&[]), Capabilities::default());
    }

    struct BareWrapper {
        args: Vec<String>,
    }

    impl Wrapper for BareWrapper {
        fn args(&self) -> &[String] {
            &self.args
        }
    }

    #[test]
    fn default_relevant_arguments_are_all_arguments() {
        let wrapper = BareWrapper {
            args: vec!["cc".into(), "-c".into(), "a.c".into()],
        };
        assert_eq!(wrapper.relevant_arguments(), wrapper.args);
        assert!(wrapper.relevant_env_vars().is_empty());
        assert!(wrapper.expected_build_files().unwrap().is_empty());
    }

    #[test]
    fn default_program_id_digests_the_binary() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("fake-cc");
        std::fs::write(&tool, b"#!/bin/sh\n").unwrap();

        let mut wrapper = BareWrapper {
            args: vec![tool.to_string_lossy().into_owned()],
        };
        let id = wrapper.program_id().unwrap();
        assert_eq!(id.len(), 32);

        // Same binary, same identity.
        assert_eq!(wrapper.program_id().unwrap(), id);
    }

    #[test]
    fn default_program_id_fails_for_a_missing_binary() {
        let mut wrapper = BareWrapper {
            args: vec!["/nonexistent/tool".into()],
        };
        assert!(wrapper.program_id().is_err());
    }
}
