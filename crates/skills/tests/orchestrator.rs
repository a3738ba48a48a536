#![allow(clippy::unwrap_used, clippy::expect_used)]
use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    skillpm_skills::{
        ContentHasher, DirHasher, Error, ErrorKind, IntegrityDigest, ManifestStore,
        NetworkFailureKind, ResolvedDownload, Result, Skill, SkillManager, Source, SourceAdapter,
        SourceKind, SourceRegistry,
        hash::digest_dir,
        sources::{TempRoot, is_latest},
    },
    tokio_util::sync::CancellationToken,
};

/// Serves a fixed tree for any locator. Locator `broken` fails after a short
/// delay; version `missing` does not exist.
struct FakeAdapter {
    kind: SourceKind,
    latest: &'static str,
    files: &'static [(&'static str, &'static str)],
    external_ledger: bool,
}

impl FakeAdapter {
    fn npm() -> Self {
        Self {
            kind: SourceKind::Npm,
            latest: "2.0.0",
            files: &[("SKILL.md", "# pdf"), ("scripts/run.sh", "echo hi")],
            external_ledger: false,
        }
    }
}

#[async_trait]
impl SourceAdapter for FakeAdapter {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn download(&self, source: &Source, version: &str) -> Result<ResolvedDownload> {
        if source.locator == "broken" {
            tokio::time::sleep(Duration::from_millis(200)).await;
            return Err(Error::network(NetworkFailureKind::Connectivity, "registry down"));
        }
        if version == "missing" {
            return Err(Error::version_not_found(&source.locator, version));
        }
        let version = if is_latest(version) {
            self.latest
        } else {
            version
        };
        let dir = TempRoot::default().create("fake")?;
        for (rel, body) in self.files {
            let path = dir.path().join(rel);
            std::fs::create_dir_all(path.parent().unwrap())?;
            std::fs::write(path, body)?;
        }
        Ok(ResolvedDownload::new(dir, version).with_external_ledger(self.external_ledger))
    }

    async fn latest_version(&self, _source: &Source) -> Result<String> {
        Ok(self.latest.to_string())
    }
}

/// Real digests, except that copies under `tampered` report a bogus value.
struct TamperingHasher {
    tampered: PathBuf,
    calls: AtomicUsize,
}

#[async_trait]
impl ContentHasher for TamperingHasher {
    async fn digest(&self, path: &Path) -> Result<IntegrityDigest> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if path.starts_with(&self.tampered) {
            return IntegrityDigest::parse("h1:dGFtcGVyZWQ=");
        }
        DirHasher.digest(path).await
    }
}

struct Env {
    tmp: tempfile::TempDir,
    store: ManifestStore,
}

impl Env {
    fn new(targets: usize) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let store = ManifestStore::in_data_dir(&tmp.path().join("data"));
        let mut manifest = store.load().unwrap();
        for i in 0..targets {
            manifest.add_target(tmp.path().join(format!("target-{i}")));
        }
        store.save(&manifest).unwrap();
        Self { tmp, store }
    }

    fn target(&self, i: usize) -> PathBuf {
        self.tmp.path().join(format!("target-{i}"))
    }

    fn manager(&self, adapter: FakeAdapter) -> SkillManager {
        let mut registry = SourceRegistry::new();
        registry.register(Arc::new(adapter));
        SkillManager::new(self.store.clone(), Arc::new(registry))
    }

    fn add(&self, manager: &SkillManager, name: &str, locator: &str, version: &str) {
        let mut skill = Skill::new(name, Source::new(SourceKind::Npm, locator).unwrap());
        skill.version = version.to_string();
        manager.add_skill(skill).unwrap();
    }

    /// Digest of the tree `FakeAdapter::npm` serves.
    fn fake_digest(&self) -> IntegrityDigest {
        let dir = self.tmp.path().join("reference");
        for (rel, body) in FakeAdapter::npm().files {
            let path = dir.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, body).unwrap();
        }
        digest_dir(&dir).unwrap()
    }
}

#[tokio::test]
async fn install_copies_into_every_target_and_records_digest() {
    let env = Env::new(2);
    let manager = env.manager(FakeAdapter::npm());
    env.add(&manager, "pdf", "@acme/pdf", "");

    let outcomes = manager
        .install(None, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].version, "2.0.0");
    assert!(outcomes[0].warnings.is_empty());

    let expected = env.fake_digest();
    assert_eq!(outcomes[0].digest.as_ref(), Some(&expected));
    for i in 0..2 {
        let installed = env.target(i).join("pdf");
        assert_eq!(digest_dir(&installed).unwrap(), expected);
    }

    let manifest = env.store.load().unwrap();
    let skill = manifest.find("pdf").unwrap();
    assert_eq!(skill.version, "2.0.0");
    assert_eq!(skill.digest.as_ref(), Some(&expected));
}

#[tokio::test]
async fn mismatch_at_one_target_warns_without_rollback() {
    let env = Env::new(2);
    let hasher = Arc::new(TamperingHasher {
        tampered: env.target(1),
        calls: AtomicUsize::new(0),
    });
    let manager = env.manager(FakeAdapter::npm()).with_hasher(hasher);
    env.add(&manager, "pdf", "@acme/pdf", "1.0.0");

    let outcomes = manager
        .install(Some("pdf"), &CancellationToken::new())
        .await
        .unwrap();
    let outcome = &outcomes[0];
    assert_eq!(outcome.warnings.len(), 1);
    assert_eq!(outcome.warnings[0].target, env.target(1).join("pdf"));
    assert_eq!(outcome.warnings[0].to_error().kind(), ErrorKind::HashMismatch);

    let expected = env.fake_digest();
    let manifest = env.store.load().unwrap();
    assert_eq!(manifest.find("pdf").unwrap().digest.as_ref(), Some(&expected));
    for i in 0..2 {
        assert!(env.target(i).join("pdf/SKILL.md").is_file());
        assert!(env.target(i).join("pdf/scripts/run.sh").is_file());
    }
}

#[tokio::test]
async fn external_ledger_skips_digest_and_verification() {
    let env = Env::new(2);
    let hasher = Arc::new(TamperingHasher {
        tampered: env.target(0),
        calls: AtomicUsize::new(0),
    });
    let adapter = FakeAdapter {
        external_ledger: true,
        ..FakeAdapter::npm()
    };
    let manager = env.manager(adapter).with_hasher(Arc::clone(&hasher) as _);
    env.add(&manager, "pdf", "@acme/pdf", "");

    let outcomes = manager
        .install(None, &CancellationToken::new())
        .await
        .unwrap();
    assert!(outcomes[0].digest.is_none());
    assert!(outcomes[0].warnings.is_empty());
    assert_eq!(hasher.calls.load(Ordering::SeqCst), 0);

    let manifest = env.store.load().unwrap();
    assert!(manifest.find("pdf").unwrap().digest.is_none());
    assert!(env.target(0).join("pdf/SKILL.md").is_file());
}

#[tokio::test]
async fn update_reports_previous_and_new_version() {
    let env = Env::new(1);
    let manager = env.manager(FakeAdapter::npm());
    env.add(&manager, "pdf", "@acme/pdf", "1.0.0");

    let outcomes = manager
        .update(Some("pdf"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcomes[0].previous_version, "1.0.0");
    assert_eq!(outcomes[0].installed.version, "2.0.0");
    assert!(outcomes[0].changed());
    assert_eq!(
        env.store.load().unwrap().find("pdf").unwrap().version,
        "2.0.0"
    );
}

#[tokio::test]
async fn uninstall_unknown_skill_changes_nothing() {
    let env = Env::new(2);
    let manager = env.manager(FakeAdapter::npm());
    env.add(&manager, "pdf", "@acme/pdf", "");
    manager
        .install(None, &CancellationToken::new())
        .await
        .unwrap();
    let before = std::fs::read(env.store.path()).unwrap();

    let err = manager.uninstall("nope").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SkillNotFound);
    assert_eq!(std::fs::read(env.store.path()).unwrap(), before);
    assert!(env.target(0).join("pdf").is_dir());
    assert!(env.target(1).join("pdf").is_dir());
}

#[tokio::test]
async fn uninstall_removes_copies_and_entry() {
    let env = Env::new(2);
    let manager = env.manager(FakeAdapter::npm());
    env.add(&manager, "pdf", "@acme/pdf", "");
    manager
        .install(None, &CancellationToken::new())
        .await
        .unwrap();

    let removed = manager.uninstall("pdf").await.unwrap();
    assert_eq!(removed.name, "pdf");
    assert!(!env.target(0).join("pdf").exists());
    assert!(!env.target(1).join("pdf").exists());
    let manifest = env.store.load().unwrap();
    assert!(manifest.find("pdf").is_none());
    assert_eq!(manifest.install_targets.len(), 2);
}

#[tokio::test]
async fn install_without_targets_is_fatal() {
    let env = Env::new(0);
    let manager = env.manager(FakeAdapter::npm());
    env.add(&manager, "pdf", "@acme/pdf", "");

    let err = manager
        .install(None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoInstallTargets);
}

#[tokio::test]
async fn missing_subdirectory_is_named_and_installs_nothing() {
    let env = Env::new(1);
    let manager = env.manager(FakeAdapter::npm());
    let mut skill = Skill::new("pdf", Source::new(SourceKind::Npm, "@acme/pdf").unwrap());
    skill.subdirectory = Some("skills/pdf".into());
    manager.add_skill(skill).unwrap();

    let err = manager
        .install(None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SubdirectoryNotFound);
    assert!(err.to_string().contains("skills/pdf"));
    assert!(!env.target(0).join("pdf").exists());
}

#[tokio::test]
async fn subdirectory_content_is_installed_alone() {
    let env = Env::new(1);
    let manager = env.manager(FakeAdapter::npm());
    let mut skill = Skill::new("runner", Source::new(SourceKind::Npm, "@acme/pdf").unwrap());
    skill.subdirectory = Some("scripts".into());
    manager.add_skill(skill).unwrap();

    manager
        .install(None, &CancellationToken::new())
        .await
        .unwrap();
    let installed = env.target(0).join("runner");
    assert!(installed.join("run.sh").is_file());
    assert!(!installed.join("SKILL.md").exists());
}

#[tokio::test]
async fn failed_sibling_keeps_partial_progress() {
    let env = Env::new(1);
    let manager = env.manager(FakeAdapter::npm());
    env.add(&manager, "pdf", "@acme/pdf", "");
    env.add(&manager, "down", "broken", "");

    let err = manager
        .install(None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NetworkFailure);
    assert!(err.to_string().contains("down"));

    let manifest = env.store.load().unwrap();
    assert_eq!(manifest.find("pdf").unwrap().version, "2.0.0");
    assert_eq!(manifest.find("down").unwrap().version, "");
    assert!(env.target(0).join("pdf/SKILL.md").is_file());
}

#[tokio::test]
async fn first_failure_cancels_workers_still_waiting() {
    let env = Env::new(1);
    let manager = env.manager(FakeAdapter::npm()).with_max_concurrency(1);
    env.add(&manager, "down", "broken", "");
    env.add(&manager, "pdf", "@acme/pdf", "1.0.0");
    let before = std::fs::read(env.store.path()).unwrap();

    let err = manager
        .install(None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NetworkFailure);
    assert_eq!(err.network_kind(), Some(NetworkFailureKind::Connectivity));
    assert!(err.to_string().contains("down"));

    assert!(!env.target(0).join("pdf").exists());
    let manifest = env.store.load().unwrap();
    assert!(manifest.find("pdf").unwrap().digest.is_none());
    assert_eq!(std::fs::read(env.store.path()).unwrap(), before);
}

#[tokio::test]
async fn unknown_version_fails_the_skill() {
    let env = Env::new(1);
    let manager = env.manager(FakeAdapter::npm());
    env.add(&manager, "pdf", "@acme/pdf", "missing");

    let err = manager
        .install(Some("pdf"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::VersionNotFound);
}

#[tokio::test]
async fn cancelled_batch_installs_nothing() {
    let env = Env::new(1);
    let manager = env.manager(FakeAdapter::npm());
    env.add(&manager, "pdf", "@acme/pdf", "");
    let before = std::fs::read(env.store.path()).unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = manager.install(None, &cancel).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(std::fs::read(env.store.path()).unwrap(), before);
    assert!(!env.target(0).join("pdf").exists());
}

#[tokio::test]
async fn unsafe_names_and_unregistered_kinds_are_rejected() {
    let env = Env::new(1);
    let manager = env.manager(FakeAdapter::npm());

    let escape = Skill::new("../etc", Source::new(SourceKind::Npm, "x").unwrap());
    assert_eq!(
        manager.add_skill(escape).unwrap_err().kind(),
        ErrorKind::InvalidSource
    );

    let pip = Skill::new("kit", Source::new(SourceKind::Pip, "skill-kit").unwrap());
    assert_eq!(
        manager.add_skill(pip).unwrap_err().kind(),
        ErrorKind::InvalidSource
    );
}

#[tokio::test]
async fn bounded_concurrency_installs_every_skill() {
    let env = Env::new(2);
    let manager = env.manager(FakeAdapter::npm()).with_max_concurrency(2);
    for i in 0..6 {
        env.add(&manager, &format!("skill-{i}"), "@acme/pdf", "1.0.0");
    }

    let outcomes = manager
        .install(None, &CancellationToken::new())
        .await
        .unwrap();
    let names: Vec<_> = outcomes.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(names, [
        "skill-0", "skill-1", "skill-2", "skill-3", "skill-4", "skill-5"
    ]);
    for i in 0..6 {
        assert!(env.target(1).join(format!("skill-{i}/SKILL.md")).is_file());
    }
}
