//! The shared shape of the npm, pip and cargo adapters.
//!
//! Each registry differs only in where its metadata lives, how the latest
//! version is named, and where a version's tarball is. Those three answers are
//! a [`RegistryProtocol`]; [`RegistryAdapter`] does the rest: fetch metadata,
//! resolve the version, stream the archive, extract it.

use std::{marker::PhantomData, path::Path};

use {async_trait::async_trait, reqwest::Client, serde::de::DeserializeOwned, tracing::info};

use crate::{
    archive,
    error::{Error, Result},
    sources::{ResolvedDownload, SourceAdapter, TempRoot, http, is_latest},
    types::{Source, SourceKind},
};

/// Registry-specific knowledge plugged into [`RegistryAdapter`].
pub trait RegistryProtocol: Send + Sync + 'static {
    type Metadata: DeserializeOwned + Send;

    const KIND: SourceKind;
    /// Public registry used when the source sets no `registry`/`index` option.
    const DEFAULT_REGISTRY: &'static str;
    /// Word used in messages: "package", "crate".
    const NOUN: &'static str;

    fn metadata_url(registry: &str, name: &str) -> String;

    /// The registry's own notion of latest.
    fn latest(meta: &Self::Metadata) -> Option<String>;

    fn has_version(meta: &Self::Metadata, version: &str) -> bool;

    /// Archive URL for an existing `version`.
    fn download_url(meta: &Self::Metadata, registry: &str, version: &str) -> Result<String>;
}

/// A [`SourceAdapter`] for any gzip-tarball registry.
pub struct RegistryAdapter<P> {
    client: Client,
    temp: TempRoot,
    _protocol: PhantomData<fn() -> P>,
}

impl<P: RegistryProtocol> RegistryAdapter<P> {
    pub fn new(client: Client, temp: TempRoot) -> Self {
        Self {
            client,
            temp,
            _protocol: PhantomData,
        }
    }

    /// Registry root for `source`, without a trailing slash.
    pub fn registry_root(source: &Source) -> String {
        source
            .option("registry")
            .or_else(|| source.option("index"))
            .unwrap_or(P::DEFAULT_REGISTRY)
            .trim()
            .trim_end_matches('/')
            .to_string()
    }

    async fn metadata(&self, source: &Source, registry: &str) -> Result<P::Metadata> {
        let name = source.locator.trim();
        let url = P::metadata_url(registry, name);
        http::get_json(
            &self.client,
            &url,
            &format!("{} '{name}' not found in {registry}", P::NOUN),
        )
        .await
    }

    fn resolve(source: &Source, meta: &P::Metadata, requested: &str) -> Result<String> {
        let name = source.locator.trim();
        if is_latest(requested) {
            return P::latest(meta)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| Error::version_not_found(name, "latest"));
        }
        let requested = requested.trim();
        if P::has_version(meta, requested) {
            Ok(requested.to_string())
        } else {
            Err(Error::version_not_found(name, requested))
        }
    }
}

#[async_trait]
impl<P: RegistryProtocol> SourceAdapter for RegistryAdapter<P> {
    fn kind(&self) -> SourceKind {
        P::KIND
    }

    async fn download(&self, source: &Source, version: &str) -> Result<ResolvedDownload> {
        let registry = Self::registry_root(source);
        let meta = self.metadata(source, &registry).await?;
        let version = Self::resolve(source, &meta, version)?;
        let url = P::download_url(&meta, &registry, &version)?;

        let scratch = self.temp.create("archive")?;
        let archive_path = scratch.path().join("archive.tar.gz");
        http::download_to_file(&self.client, &url, &archive_path).await?;

        let content = self.temp.create(P::KIND.as_str())?;
        let dest = content.path().to_path_buf();
        tokio::task::spawn_blocking(move || archive::extract_tar_gz(&archive_path, &dest))
            .await
            .map_err(|e| Error::external("extraction task failed", e))??;
        drop(scratch);

        info!(kind = %P::KIND, name = %source.locator, %version, "downloaded package");
        Ok(ResolvedDownload::new(content, version))
    }

    async fn latest_version(&self, source: &Source) -> Result<String> {
        let registry = Self::registry_root(source);
        let meta = self.metadata(source, &registry).await?;
        Self::resolve(source, &meta, "")
    }
}

/// Join a registry root and a path that may or may not start with `/`.
pub(crate) fn join_url(root: &str, path: &str) -> String {
    format!("{}/{}", root.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// True if `url`'s path ends with `suffix` (ignoring any query string).
pub(crate) fn url_path_ends_with(url: &str, suffix: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(suffix))
}
