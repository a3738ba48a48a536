//! Archive extraction with a containment check.
//!
//! Registry tarballs wrap their contents in one top-level directory. The first
//! path segment of the first entry is taken as that prefix and stripped from
//! every entry. Each resulting path is joined to the destination, lexically
//! cleaned, and must still start with the cleaned destination; otherwise the
//! whole extraction fails with [`Error::PathTraversal`]. Archives are walked
//! twice (validate, then unpack) so nothing is written from an archive that
//! contains an escaping entry.

use std::{
    fs::File,
    io::BufReader,
    path::{Component, Path, PathBuf},
};

use {
    flate2::read::GzDecoder,
    tar::EntryType,
    tracing::{debug, warn},
};

use crate::error::{Error, Result};

/// Lexically normalize `path`: drop `.`, fold `..` into its parent.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {},
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                },
                Some(Component::RootDir | Component::Prefix(_)) => {},
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Join `rel` under `dest`, rejecting anything that lands outside it.
/// `clean_dest` must be `clean_path(dest)`.
fn contained_target(clean_dest: &Path, rel: &Path, entry: &Path) -> Result<PathBuf> {
    let target = clean_path(&clean_dest.join(rel));
    if !target.starts_with(clean_dest) {
        return Err(Error::PathTraversal {
            entry: entry.to_path_buf(),
        });
    }
    Ok(target)
}

/// What to do with one tar entry, decided identically in both passes.
enum TarAction {
    Skip,
    Dir(PathBuf),
    File(PathBuf),
}

struct TarPlanner {
    clean_dest: PathBuf,
    prefix: Option<PathBuf>,
}

impl TarPlanner {
    fn new(dest: &Path) -> Self {
        Self {
            clean_dest: clean_path(dest),
            prefix: None,
        }
    }

    fn plan(&mut self, entry_type: EntryType, path: &Path) -> Result<TarAction> {
        if matches!(
            entry_type,
            EntryType::XGlobalHeader | EntryType::XHeader | EntryType::GNULongName
        ) {
            return Ok(TarAction::Skip);
        }

        let prefix = self.prefix.get_or_insert_with(|| {
            path.components()
                .next()
                .map(|c| PathBuf::from(c.as_os_str()))
                .unwrap_or_default()
        });
        let rel = path.strip_prefix(&*prefix).unwrap_or(path);
        if rel.as_os_str().is_empty() {
            return Ok(TarAction::Skip);
        }

        let target = contained_target(&self.clean_dest, rel, path)?;
        if target == self.clean_dest {
            return Ok(TarAction::Skip);
        }

        Ok(match entry_type {
            EntryType::Directory => TarAction::Dir(target),
            EntryType::Regular | EntryType::Continuous | EntryType::GNUSparse => {
                TarAction::File(target)
            },
            EntryType::Symlink | EntryType::Link => {
                warn!(entry = %path.display(), "skipping symlink/hardlink archive entry");
                TarAction::Skip
            },
            other => {
                debug!(entry = %path.display(), ?other, "skipping special archive entry");
                TarAction::Skip
            },
        })
    }
}

fn open_tar_gz(archive: &Path) -> Result<tar::Archive<GzDecoder<BufReader<File>>>> {
    let file = File::open(archive)?;
    Ok(tar::Archive::new(GzDecoder::new(BufReader::new(file))))
}

/// Extract a `.tar.gz` file into `dest`, stripping the top-level prefix.
pub fn extract_tar_gz(archive: &Path, dest: &Path) -> Result<()> {
    // Pass 1: validate every entry.
    let mut planner = TarPlanner::new(dest);
    let mut tar = open_tar_gz(archive)?;
    for entry in tar.entries()? {
        let entry = entry?;
        let path = entry.path()?.into_owned();
        planner.plan(entry.header().entry_type(), &path)?;
    }

    // Pass 2: unpack.
    std::fs::create_dir_all(dest)?;
    let mut planner = TarPlanner::new(dest);
    let mut tar = open_tar_gz(archive)?;
    let mut files = 0usize;
    for entry in tar.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        match planner.plan(entry.header().entry_type(), &path)? {
            TarAction::Skip => {},
            TarAction::Dir(target) => std::fs::create_dir_all(&target)?,
            TarAction::File(target) => {
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                entry.unpack(&target)?;
                files += 1;
            },
        }
    }

    debug!(archive = %archive.display(), files, "extracted tarball");
    Ok(())
}

/// Extract a Go module zip. Every entry must live under `prefix`
/// (`<module>@<version>/`), which is stripped.
pub fn extract_module_zip(archive: &Path, prefix: &str, dest: &Path) -> Result<()> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(BufReader::new(file))
        .map_err(|e| Error::external("failed to read module zip", e))?;
    let clean_dest = clean_path(dest);

    let mut plan = Vec::with_capacity(zip.len());
    for i in 0..zip.len() {
        let entry = zip
            .by_index(i)
            .map_err(|e| Error::external("failed to read module zip entry", e))?;
        let name = entry.name().to_string();
        let Some(rel) = name.strip_prefix(prefix) else {
            return Err(Error::message(format!(
                "module zip entry '{name}' is outside '{prefix}'"
            )));
        };
        if rel.is_empty() {
            plan.push(None);
            continue;
        }
        let target = contained_target(&clean_dest, Path::new(rel), Path::new(&name))?;
        plan.push(Some((target, entry.is_dir())));
    }

    std::fs::create_dir_all(dest)?;
    for (i, step) in plan.into_iter().enumerate() {
        let Some((target, is_dir)) = step else {
            continue;
        };
        if is_dir {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut entry = zip
            .by_index(i)
            .map_err(|e| Error::external("failed to read module zip entry", e))?;
        let mut out = File::create(&target)?;
        std::io::copy(&mut entry, &mut out)?;
    }

    debug!(archive = %archive.display(), %prefix, "extracted module zip");
    Ok(())
}
