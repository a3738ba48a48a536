use {reqwest::Client, serde::Deserialize};

use crate::{
    error::{Error, Result},
    sources::{
        TempRoot,
        registry::{RegistryAdapter, RegistryProtocol, join_url},
    },
    types::SourceKind,
};

/// crates.io API subset: `crate.max_version` and `versions[].{num,dl_path}`.
#[derive(Debug, Deserialize)]
pub struct CrateResponse {
    #[serde(rename = "crate")]
    pub krate: CrateInfo,
    #[serde(default)]
    pub versions: Vec<CrateVersion>,
}

#[derive(Debug, Deserialize)]
pub struct CrateInfo {
    pub max_version: String,
}

#[derive(Debug, Deserialize)]
pub struct CrateVersion {
    pub num: String,
    pub dl_path: String,
}

pub struct Cargo;

impl RegistryProtocol for Cargo {
    type Metadata = CrateResponse;

    const DEFAULT_REGISTRY: &'static str = "https://crates.io";
    const KIND: SourceKind = SourceKind::Cargo;
    const NOUN: &'static str = "crate";

    fn metadata_url(registry: &str, name: &str) -> String {
        join_url(registry, &format!("api/v1/crates/{name}"))
    }

    fn latest(meta: &CrateResponse) -> Option<String> {
        Some(meta.krate.max_version.clone())
    }

    fn has_version(meta: &CrateResponse, version: &str) -> bool {
        meta.versions.iter().any(|v| v.num == version)
    }

    fn download_url(meta: &CrateResponse, registry: &str, version: &str) -> Result<String> {
        meta.versions
            .iter()
            .find(|v| v.num == version)
            .map(|v| join_url(registry, &v.dl_path))
            .ok_or_else(|| Error::message(format!("crate version {version} has no dl_path")))
    }
}

pub type CargoAdapter = RegistryAdapter<Cargo>;

pub fn cargo_adapter(client: Client, temp: TempRoot) -> CargoAdapter {
    RegistryAdapter::new(client, temp)
}
