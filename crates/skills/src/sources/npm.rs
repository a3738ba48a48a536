use std::collections::HashMap;

use {reqwest::Client, serde::Deserialize};

use crate::{
    error::{Error, Result},
    sources::{
        TempRoot,
        registry::{RegistryAdapter, RegistryProtocol, join_url},
    },
    types::SourceKind,
};

/// Packument subset: `dist-tags.latest` and `versions.<v>.dist.tarball`.
#[derive(Debug, Deserialize)]
pub struct Packument {
    #[serde(rename = "dist-tags", default)]
    pub dist_tags: HashMap<String, String>,
    #[serde(default)]
    pub versions: HashMap<String, PackageVersion>,
}

#[derive(Debug, Deserialize)]
pub struct PackageVersion {
    pub dist: Dist,
}

#[derive(Debug, Deserialize)]
pub struct Dist {
    pub tarball: String,
}

pub struct Npm;

impl RegistryProtocol for Npm {
    type Metadata = Packument;

    const DEFAULT_REGISTRY: &'static str = "https://registry.npmjs.org";
    const KIND: SourceKind = SourceKind::Npm;
    const NOUN: &'static str = "package";

    fn metadata_url(registry: &str, name: &str) -> String {
        // Scoped packages keep the `@` but escape the separator.
        join_url(registry, &name.replace('/', "%2F"))
    }

    fn latest(meta: &Packument) -> Option<String> {
        meta.dist_tags.get("latest").cloned()
    }

    fn has_version(meta: &Packument, version: &str) -> bool {
        meta.versions.contains_key(version)
    }

    fn download_url(meta: &Packument, _registry: &str, version: &str) -> Result<String> {
        meta.versions
            .get(version)
            .map(|v| v.dist.tarball.clone())
            .filter(|url| !url.is_empty())
            .ok_or_else(|| Error::message(format!("npm version {version} has no dist.tarball")))
    }
}

pub type NpmAdapter = RegistryAdapter<Npm>;

pub fn npm_adapter(client: Client, temp: TempRoot) -> NpmAdapter {
    RegistryAdapter::new(client, temp)
}
