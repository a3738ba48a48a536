//! Skill acquisition and multi-target installation.
//!
//! Skills are versioned directory trees fetched from git, npm, PyPI,
//! crates.io or a Go module proxy, digested, and copied into every configured
//! install target. The manifest records what is installed and at which
//! version.

pub mod agents;
pub mod archive;
pub mod error;
pub mod hash;
pub mod install;
pub mod manifest;
pub mod sources;
pub mod types;

pub use {
    error::{Error, ErrorKind, NetworkFailureKind, Result},
    hash::{ContentHasher, DirHasher},
    install::{InstallOutcome, SkillManager, UpdateOutcome, VerificationWarning},
    manifest::ManifestStore,
    sources::{ResolvedDownload, SourceAdapter, SourceRegistry},
    types::{IntegrityDigest, Manifest, Skill, Source, SourceKind},
};

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod testutil {
    use flate2::{Compression, write::GzEncoder};

    /// An in-memory tar.gz holding `entries` as regular files.
    pub fn tar_gz_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }
}
