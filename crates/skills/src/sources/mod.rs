//! Source adapters and the dispatcher that selects one per [`SourceKind`].

pub mod cargo;
pub mod git;
pub mod goproxy;
pub mod http;
pub mod npm;
pub mod pip;
pub mod registry;

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use {async_trait::async_trait, skillpm_config::SourcesConfig, tempfile::TempDir};

use crate::{
    error::{Error, Result},
    types::{Source, SourceKind},
};

/// Version string meaning "resolve the newest for me".
pub const LATEST: &str = "latest";

/// True for the empty string and the `latest` sentinel.
pub fn is_latest(version: &str) -> bool {
    let version = version.trim();
    version.is_empty() || version == LATEST
}

/// Content fetched by an adapter, living in a private temp directory that is
/// deleted when this value is dropped.
#[derive(Debug)]
pub struct ResolvedDownload {
    dir: TempDir,
    /// Directory inside `dir` holding the content (usually `dir` itself).
    root: PathBuf,
    pub version: String,
    /// The version came from the ecosystem's own manifest (go.mod), whose
    /// checksum database vouches for integrity instead of our digest.
    pub external_ledger: bool,
}

impl ResolvedDownload {
    pub fn new(dir: TempDir, version: impl Into<String>) -> Self {
        let root = dir.path().to_path_buf();
        Self {
            dir,
            root,
            version: version.into(),
            external_ledger: false,
        }
    }

    #[must_use]
    pub fn with_external_ledger(mut self, external_ledger: bool) -> Self {
        self.external_ledger = external_ledger;
        self
    }

    /// Point the content root at a child of the temp directory.
    #[must_use]
    pub fn with_root(mut self, relative: &Path) -> Self {
        self.root = self.dir.path().join(relative);
        self
    }

    pub fn path(&self) -> &Path {
        &self.root
    }
}

/// Contract every source kind implements.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Stable identifier used for dispatch and persistence.
    fn kind(&self) -> SourceKind;

    /// Resolve `version` (empty or `latest` = adapter decides) and fetch the
    /// content into a fresh temp directory.
    async fn download(&self, source: &Source, version: &str) -> Result<ResolvedDownload>;

    /// Newest version the source offers.
    async fn latest_version(&self, source: &Source) -> Result<String>;
}

/// Creates private temp directories, optionally under a configured parent.
#[derive(Debug, Clone, Default)]
pub struct TempRoot {
    parent: Option<PathBuf>,
}

impl TempRoot {
    pub fn new(parent: Option<PathBuf>) -> Self {
        Self { parent }
    }

    pub fn create(&self, label: &str) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        let prefix = format!("skillpm-{label}-");
        builder.prefix(&prefix);
        let dir = match &self.parent {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            },
            None => builder.tempdir()?,
        };
        Ok(dir)
    }
}

/// Maps a source kind to its adapter. Built once at startup.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    adapters: HashMap<SourceKind, Arc<dyn SourceAdapter>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in adapter, configured from `config`.
    pub fn with_defaults(config: &SourcesConfig) -> Result<Self> {
        let client = http::client()?;
        let temp = TempRoot::new(config.temp_dir.clone());
        let git = Arc::new(git::GitAdapter::new(
            config.git_credentials.clone(),
            temp.clone(),
        ));

        let mut registry = Self::new();
        registry.register(git.clone());
        registry.register(Arc::new(npm::npm_adapter(client.clone(), temp.clone())));
        registry.register(Arc::new(pip::pip_adapter(client.clone(), temp.clone())));
        registry.register(Arc::new(cargo::cargo_adapter(client.clone(), temp.clone())));
        registry.register(Arc::new(goproxy::GoModuleAdapter::new(
            goproxy::parse_proxy_chain(&config.goproxy),
            client,
            temp,
            git,
            config.work_dir.clone(),
        )));
        Ok(registry)
    }

    /// Add or replace the adapter for its kind.
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn get(&self, kind: SourceKind) -> Result<Arc<dyn SourceAdapter>> {
        self.adapters
            .get(&kind)
            .cloned()
            .ok_or_else(|| Error::invalid_source(format!("no adapter registered for '{kind}'")))
    }

    /// Validate `source` and return its adapter.
    pub fn for_source(&self, source: &Source) -> Result<Arc<dyn SourceAdapter>> {
        source.validate()?;
        self.get(source.kind)
    }

    pub fn kinds(&self) -> Vec<SourceKind> {
        let mut kinds: Vec<_> = self.adapters.keys().copied().collect();
        kinds.sort();
        kinds
    }
}
