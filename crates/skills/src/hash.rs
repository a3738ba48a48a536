//! Directory content digests.
//!
//! The `h1` scheme: sort every file's slash-separated relative path, build a
//! summary of `"<sha256-hex>  <path>\n"` lines, and hash the summary again.
//! The result is `h1:` followed by the standard base64 of that final hash.
//! Paths and bytes both participate; timestamps, permissions and directory
//! iteration order do not.

use std::{
    io::Write as _,
    path::{Path, PathBuf},
};

use {
    async_trait::async_trait,
    base64::{Engine as _, engine::general_purpose::STANDARD},
    sha2::{Digest, Sha256},
    walkdir::WalkDir,
};

use crate::{
    error::{Error, Result},
    types::IntegrityDigest,
};

/// Algorithm tag, also the value prefix.
pub const H1: &str = "h1";

/// Computes a digest for a directory tree.
#[async_trait]
pub trait ContentHasher: Send + Sync {
    async fn digest(&self, path: &Path) -> Result<IntegrityDigest>;
}

/// The default [`ContentHasher`], hashing on the blocking pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirHasher;

#[async_trait]
impl ContentHasher for DirHasher {
    async fn digest(&self, path: &Path) -> Result<IntegrityDigest> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || digest_dir(&path))
            .await
            .map_err(|e| Error::external("hash task failed", e))?
    }
}

/// Synchronous `h1` digest of `dir`.
pub fn digest_dir(dir: &Path) -> Result<IntegrityDigest> {
    let meta = match std::fs::metadata(dir) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(Error::not_found(dir)),
        Err(e) => return Err(e.into()),
    };
    if !meta.is_dir() {
        return Err(Error::NotADirectory {
            path: dir.to_path_buf(),
        });
    }

    let mut files = list_files(dir)?;
    files.sort_by(|a, b| a.0.cmp(&b.0));

    let mut summary = Sha256::new();
    for (name, path) in &files {
        let mut file_hash = Sha256::new();
        let mut file = std::fs::File::open(path)?;
        std::io::copy(&mut file, &mut file_hash)?;
        writeln!(summary, "{:x}  {name}", file_hash.finalize())?;
    }

    let value = format!("{H1}:{}", STANDARD.encode(summary.finalize()));
    Ok(IntegrityDigest {
        algorithm: H1.to_string(),
        value,
    })
}

/// Every regular file as (slash-separated relative name, full path).
/// Symlinks are neither followed nor hashed, matching what an install copies.
fn list_files(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| Error::external("failed to walk directory", e))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| Error::external("walked outside hashed directory", e))?;
        let name = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if name.contains('\n') {
            return Err(Error::message(format!(
                "cannot hash file name containing a newline: {name:?}"
            )));
        }
        files.push((name, entry.into_path()));
    }
    Ok(files)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::error::ErrorKind};

    fn write_tree(root: &Path, files: &[(&str, &[u8])]) {
        for (name, bytes) in files {
            let path = root.join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, bytes).unwrap();
        }
    }

    const TREE: &[(&str, &[u8])] = &[
        ("SKILL.md", b"---\nname: demo\n---\n"),
        ("scripts/run.sh", b"#!/bin/sh\necho hi\n"),
        ("scripts/lib/util.py", b"print(1)\n"),
    ];

    #[test]
    fn identical_trees_hash_equal() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        write_tree(a.path(), TREE);
        // Reverse creation order on the second tree.
        let reversed: Vec<_> = TREE.iter().rev().copied().collect();
        write_tree(b.path(), &reversed);

        let da = digest_dir(a.path()).unwrap();
        assert_eq!(da, digest_dir(b.path()).unwrap());
        assert_eq!(da.algorithm, H1);
        assert!(da.value.starts_with("h1:"));
    }

    #[test]
    fn single_byte_change_changes_digest() {
        let tmp = tempfile::tempdir().unwrap();
        write_tree(tmp.path(), TREE);
        let before = digest_dir(tmp.path()).unwrap();

        std::fs::write(tmp.path().join("scripts/lib/util.py"), b"print(2)\n").unwrap();
        assert_ne!(before, digest_dir(tmp.path()).unwrap());
    }

    #[test]
    fn rename_changes_digest() {
        let tmp = tempfile::tempdir().unwrap();
        write_tree(tmp.path(), TREE);
        let before = digest_dir(tmp.path()).unwrap();

        std::fs::rename(
            tmp.path().join("scripts/run.sh"),
            tmp.path().join("scripts/start.sh"),
        )
        .unwrap();
        assert_ne!(before, digest_dir(tmp.path()).unwrap());
    }

    #[test]
    fn empty_directories_do_not_participate() {
        let tmp = tempfile::tempdir().unwrap();
        write_tree(tmp.path(), TREE);
        let before = digest_dir(tmp.path()).unwrap();
        std::fs::create_dir_all(tmp.path().join("empty/nested")).unwrap();
        assert_eq!(before, digest_dir(tmp.path()).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_do_not_participate() {
        let tmp = tempfile::tempdir().unwrap();
        write_tree(tmp.path(), TREE);
        let before = digest_dir(tmp.path()).unwrap();

        std::os::unix::fs::symlink("SKILL.md", tmp.path().join("README.md")).unwrap();
        std::os::unix::fs::symlink("scripts", tmp.path().join("bin")).unwrap();
        std::os::unix::fs::symlink("/nonexistent", tmp.path().join("dangling")).unwrap();
        assert_eq!(before, digest_dir(tmp.path()).unwrap());
    }

    #[test]
    fn missing_path_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let err = digest_dir(&tmp.path().join("nope")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn plain_file_is_not_a_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("file.txt");
        std::fs::write(&file, b"x").unwrap();
        let err = digest_dir(&file).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotADirectory);
    }

    #[tokio::test]
    async fn async_hasher_matches_sync() {
        let tmp = tempfile::tempdir().unwrap();
        write_tree(tmp.path(), TREE);
        assert_eq!(
            DirHasher.digest(tmp.path()).await.unwrap(),
            digest_dir(tmp.path()).unwrap()
        );
    }
}
