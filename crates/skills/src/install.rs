//! Install, update and uninstall over the persisted manifest.
//!
//! Each selected skill gets its own worker: resolve through its source
//! adapter, download, digest, copy into every install target, re-digest each
//! copy. Workers run concurrently up to a bound and write results back by
//! manifest index, so no two touch the same entry. The manifest is saved once,
//! after every worker has finished, including when some of them failed.

use std::{
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use {
    futures::future::join_all,
    tokio::{sync::Semaphore, task::JoinSet},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
    walkdir::WalkDir,
};

use crate::{
    error::{Error, Result},
    hash::{ContentHasher, DirHasher},
    manifest::ManifestStore,
    sources::SourceRegistry,
    types::{IntegrityDigest, Manifest, Skill},
};

pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// A copy whose digest did not match the downloaded content. Reported, not
/// rolled back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationWarning {
    pub target: PathBuf,
    pub expected: IntegrityDigest,
    pub actual: IntegrityDigest,
}

impl VerificationWarning {
    pub fn to_error(&self) -> Error {
        Error::HashMismatch {
            path: self.target.clone(),
            expected: self.expected.to_string(),
            actual: self.actual.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub name: String,
    pub version: String,
    /// `None` when integrity is left to the ecosystem's own checksum ledger.
    pub digest: Option<IntegrityDigest>,
    pub warnings: Vec<VerificationWarning>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub previous_version: String,
    pub installed: InstallOutcome,
}

impl UpdateOutcome {
    pub fn changed(&self) -> bool {
        self.previous_version != self.installed.version
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolve {
    /// Use the version stored in the manifest (empty lets the adapter pick).
    Stored,
    /// Ask the adapter for its latest version first.
    Latest,
}

/// Orchestrates skill operations against one manifest.
#[derive(Clone)]
pub struct SkillManager {
    store: ManifestStore,
    sources: Arc<SourceRegistry>,
    hasher: Arc<dyn ContentHasher>,
    max_concurrency: usize,
}

impl SkillManager {
    pub fn new(store: ManifestStore, sources: Arc<SourceRegistry>) -> Self {
        Self {
            store,
            sources,
            hasher: Arc::new(DirHasher),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }

    #[must_use]
    pub fn with_hasher(mut self, hasher: Arc<dyn ContentHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    #[must_use]
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    pub fn store(&self) -> &ManifestStore {
        &self.store
    }

    pub fn manifest(&self) -> Result<Manifest> {
        self.store.load()
    }

    /// Record a skill without installing it. Replaces an entry of the same
    /// name.
    pub fn add_skill(&self, skill: Skill) -> Result<()> {
        skill.validate_name()?;
        skill.source.validate()?;
        self.sources.get(skill.source.kind)?;
        let mut manifest = self.store.load()?;
        info!(skill = %skill.name, source = %skill.source, "added skill");
        manifest.upsert_skill(skill);
        self.store.save(&manifest)
    }

    /// Returns `false` if the target was already configured.
    pub fn add_target(&self, path: PathBuf) -> Result<bool> {
        let mut manifest = self.store.load()?;
        let added = manifest.add_target(path);
        if added {
            self.store.save(&manifest)?;
        }
        Ok(added)
    }

    /// Stop installing into `path`. Already installed copies are left alone.
    pub fn remove_target(&self, path: &Path) -> Result<bool> {
        let mut manifest = self.store.load()?;
        let removed = manifest.remove_target(path);
        if removed {
            self.store.save(&manifest)?;
        }
        Ok(removed)
    }

    /// Install one skill, or every skill when `name` is `None`, at its stored
    /// version.
    pub async fn install(
        &self,
        name: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<InstallOutcome>> {
        let done = self.run(name, Resolve::Stored, cancel).await?;
        Ok(done.into_iter().map(|(_, outcome)| outcome).collect())
    }

    /// Re-resolve to the latest version and install, reporting the version
    /// change per skill.
    pub async fn update(
        &self,
        name: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<UpdateOutcome>> {
        let done = self.run(name, Resolve::Latest, cancel).await?;
        Ok(done
            .into_iter()
            .map(|(previous_version, installed)| UpdateOutcome {
                previous_version,
                installed,
            })
            .collect())
    }

    /// Remove a skill from every install target and from the manifest.
    pub async fn uninstall(&self, name: &str) -> Result<Skill> {
        let mut manifest = self.store.load()?;
        let skill = manifest
            .find(name)
            .ok_or_else(|| Error::SkillNotFound {
                name: name.to_string(),
            })?;
        skill.validate_name()?;

        for target in &manifest.install_targets {
            let dir = target.join(name);
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => debug!(skill = %name, dir = %dir.display(), "removed installed copy"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
                Err(e) => return Err(e.into()),
            }
        }

        let removed = manifest
            .remove_skill(name)
            .ok_or_else(|| Error::SkillNotFound {
                name: name.to_string(),
            })?;
        self.store.save(&manifest)?;
        info!(skill = %name, targets = manifest.install_targets.len(), "uninstalled skill");
        Ok(removed)
    }

    async fn run(
        &self,
        name: Option<&str>,
        resolve: Resolve,
        cancel: &CancellationToken,
    ) -> Result<Vec<(String, InstallOutcome)>> {
        let mut manifest = self.store.load()?;
        if manifest.install_targets.is_empty() {
            return Err(Error::NoInstallTargets);
        }

        let selected: Vec<usize> = match name {
            Some(name) => vec![manifest.position(name).ok_or_else(|| Error::SkillNotFound {
                name: name.to_string(),
            })?],
            None => (0..manifest.skills.len()).collect(),
        };

        let targets: Arc<[PathBuf]> = manifest.install_targets.iter().cloned().collect();
        let batch = cancel.child_token();
        let permits = Arc::new(Semaphore::new(self.max_concurrency));
        let mut workers = JoinSet::new();

        for idx in selected {
            let worker = Worker {
                skill: manifest.skills[idx].clone(),
                sources: Arc::clone(&self.sources),
                hasher: Arc::clone(&self.hasher),
                targets: Arc::clone(&targets),
                cancel: batch.clone(),
            };
            let permits = Arc::clone(&permits);
            workers.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => worker.run(resolve).await,
                    Err(_) => Err(Error::Cancelled),
                };
                if let Err(e) = &result {
                    if !matches!(e, Error::Cancelled) {
                        warn!(skill = %worker.skill.name, error = %e, "skill worker failed");
                    }
                    worker.cancel.cancel();
                }
                (idx, result)
            });
        }

        let mut done = Vec::new();
        let mut first_error: Option<Error> = None;
        let mut cancelled = false;
        while let Some(joined) = workers.join_next().await {
            let (idx, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    batch.cancel();
                    first_error.get_or_insert(Error::external("skill worker panicked", e));
                    continue;
                },
            };
            match result {
                Ok(finished) => {
                    let outcome = InstallOutcome {
                        name: finished.skill.name.clone(),
                        version: finished.skill.version.clone(),
                        digest: finished.skill.digest.clone(),
                        warnings: finished.warnings,
                    };
                    manifest.skills[idx] = finished.skill;
                    done.push((idx, finished.previous_version, outcome));
                },
                Err(Error::Cancelled) => cancelled = true,
                Err(e) => {
                    let name = &manifest.skills[idx].name;
                    first_error.get_or_insert(Error::for_skill(name.clone(), e));
                },
            }
        }

        // Partial progress is kept: successful siblings are recorded even
        // when the batch as a whole fails.
        if !done.is_empty() {
            self.store.save(&manifest)?;
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        if cancelled {
            return Err(Error::Cancelled);
        }

        done.sort_by_key(|(idx, ..)| *idx);
        Ok(done
            .into_iter()
            .map(|(_, previous, outcome)| (previous, outcome))
            .collect())
    }
}

struct Finished {
    skill: Skill,
    previous_version: String,
    warnings: Vec<VerificationWarning>,
}

/// Everything one skill's install needs, owned so it can move into a task.
struct Worker {
    skill: Skill,
    sources: Arc<SourceRegistry>,
    hasher: Arc<dyn ContentHasher>,
    targets: Arc<[PathBuf]>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(&self, resolve: Resolve) -> Result<Finished> {
        let skill = &self.skill;
        skill.validate_name()?;
        let adapter = self.sources.for_source(&skill.source)?;
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let requested = match resolve {
            Resolve::Stored => skill.version.clone(),
            Resolve::Latest => tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(Error::Cancelled),
                latest = adapter.latest_version(&skill.source) => latest?,
            },
        };

        let download = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(Error::Cancelled),
            download = adapter.download(&skill.source, &requested) => download?,
        };

        let content = match &skill.subdirectory {
            Some(sub) => {
                let not_found = || Error::SubdirectoryNotFound {
                    skill: skill.name.clone(),
                    subdirectory: sub.clone(),
                };
                real_subdirectory(download.path(), Path::new(sub)).ok_or_else(not_found)?
            },
            None => download.path().to_path_buf(),
        };

        let digest = if download.external_ledger {
            None
        } else {
            Some(self.hasher.digest(&content).await?)
        };

        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        // From here on the copy runs to completion.
        let copies = join_all(
            self.targets
                .iter()
                .map(|target| self.install_into(target, &content, digest.as_ref())),
        )
        .await;
        let mut warnings = Vec::new();
        for copy in copies {
            warnings.extend(copy?);
        }

        info!(
            skill = %skill.name,
            version = %download.version,
            targets = self.targets.len(),
            verified = digest.is_some(),
            warnings = warnings.len(),
            "installed skill"
        );

        let mut updated = skill.clone();
        updated.version = download.version.clone();
        updated.digest = digest;
        Ok(Finished {
            skill: updated,
            previous_version: skill.version.clone(),
            warnings,
        })
    }

    async fn install_into(
        &self,
        target: &Path,
        content: &Path,
        expected: Option<&IntegrityDigest>,
    ) -> Result<Option<VerificationWarning>> {
        let dest = target.join(&self.skill.name);
        let (src, dst) = (content.to_path_buf(), dest.clone());
        tokio::task::spawn_blocking(move || replace_dir(&src, &dst))
            .await
            .map_err(|e| Error::external("copy task failed", e))??;

        let Some(expected) = expected else {
            return Ok(None);
        };
        let actual = self.hasher.digest(&dest).await?;
        if &actual == expected {
            return Ok(None);
        }
        warn!(
            skill = %self.skill.name,
            target = %dest.display(),
            %expected,
            %actual,
            "installed copy does not match downloaded content"
        );
        Ok(Some(VerificationWarning {
            target: dest,
            expected: expected.clone(),
            actual,
        }))
    }
}

fn is_plain_relative(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// `root/sub` when every component of `sub` is a real directory. Symlinks
/// are refused so the content cannot come from outside `root`.
fn real_subdirectory(root: &Path, sub: &Path) -> Option<PathBuf> {
    if !is_plain_relative(sub) {
        return None;
    }
    let mut dir = root.to_path_buf();
    for component in sub.components() {
        let Component::Normal(name) = component else {
            continue;
        };
        dir.push(name);
        let meta = std::fs::symlink_metadata(&dir).ok()?;
        if !meta.is_dir() {
            return None;
        }
    }
    Some(dir)
}

/// Replace `dst` with a copy of the tree at `src`. Symlinks are not copied.
fn replace_dir(src: &Path, dst: &Path) -> Result<()> {
    match std::fs::symlink_metadata(dst) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(dst)?,
        Ok(_) => std::fs::remove_file(dst)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
        Err(e) => return Err(e.into()),
    }
    std::fs::create_dir_all(dst)?;

    for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| Error::external("failed to walk skill content", e))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| Error::external("walked outside skill content", e))?;
        let out = dst.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            std::fs::create_dir_all(&out)?;
        } else if file_type.is_file() {
            std::fs::copy(entry.path(), &out)?;
        } else {
            debug!(path = %entry.path().display(), "skipping non-regular file");
        }
    }
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_dir_overwrites_previous_install() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        std::fs::create_dir_all(src.join("nested")).unwrap();
        std::fs::write(src.join("SKILL.md"), "new").unwrap();
        std::fs::write(src.join("nested/a.txt"), "a").unwrap();

        let dst = tmp.path().join("target/skill");
        std::fs::create_dir_all(&dst).unwrap();
        std::fs::write(dst.join("stale.txt"), "old").unwrap();

        replace_dir(&src, &dst).unwrap();
        assert!(!dst.join("stale.txt").exists());
        assert_eq!(std::fs::read_to_string(dst.join("SKILL.md")).unwrap(), "new");
        assert_eq!(std::fs::read_to_string(dst.join("nested/a.txt")).unwrap(), "a");
    }

    #[test]
    fn replace_dir_replaces_a_plain_file() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("SKILL.md"), "x").unwrap();
        let dst = tmp.path().join("skill");
        std::fs::write(&dst, "not a dir").unwrap();

        replace_dir(&src, &dst).unwrap();
        assert!(dst.join("SKILL.md").is_file());
    }

    #[test]
    fn subdirectory_must_stay_inside_download() {
        assert!(is_plain_relative(Path::new("skills/pdf")));
        assert!(is_plain_relative(Path::new("./pdf")));
        assert!(!is_plain_relative(Path::new("../pdf")));
        assert!(!is_plain_relative(Path::new("/etc")));
    }

    #[test]
    fn subdirectory_must_be_a_directory() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("skills/pdf")).unwrap();
        std::fs::write(tmp.path().join("skills/README.md"), "x").unwrap();

        assert_eq!(
            real_subdirectory(tmp.path(), Path::new("skills/pdf")),
            Some(tmp.path().join("skills/pdf"))
        );
        assert!(real_subdirectory(tmp.path(), Path::new("./skills")).is_some());
        assert!(real_subdirectory(tmp.path(), Path::new("skills/README.md")).is_none());
        assert!(real_subdirectory(tmp.path(), Path::new("skills/missing")).is_none());
        assert!(real_subdirectory(tmp.path(), Path::new("../skills")).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_subdirectory_is_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let outside = tmp.path().join("outside");
        std::fs::create_dir_all(&outside).unwrap();
        std::fs::write(outside.join("secret.txt"), "x").unwrap();
        let download = tmp.path().join("download");
        std::fs::create_dir_all(download.join("real")).unwrap();
        std::os::unix::fs::symlink(&outside, download.join("linked")).unwrap();
        std::os::unix::fs::symlink(&outside, download.join("real/nested")).unwrap();

        assert!(real_subdirectory(&download, Path::new("linked")).is_none());
        assert!(real_subdirectory(&download, Path::new("real/nested")).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn copy_of_tree_with_symlinks_verifies() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        std::fs::create_dir_all(src.join("real")).unwrap();
        std::fs::write(src.join("SKILL.md"), "skill").unwrap();
        std::fs::write(src.join("real/a.txt"), "a").unwrap();
        std::os::unix::fs::symlink("SKILL.md", src.join("README.md")).unwrap();
        std::os::unix::fs::symlink("real", src.join("alias")).unwrap();

        let dst = tmp.path().join("target/skill");
        replace_dir(&src, &dst).unwrap();
        assert_eq!(
            crate::hash::digest_dir(&src).unwrap(),
            crate::hash::digest_dir(&dst).unwrap()
        );
    }

    #[test]
    fn mismatch_warning_converts_to_hash_mismatch() {
        let warning = VerificationWarning {
            target: PathBuf::from("/t/pdf"),
            expected: IntegrityDigest::parse("h1:AAAA").unwrap(),
            actual: IntegrityDigest::parse("h1:BBBB").unwrap(),
        };
        let err = warning.to_error();
        assert_eq!(err.kind(), crate::error::ErrorKind::HashMismatch);
        assert!(err.to_string().contains("h1:AAAA"));
    }
}
