use std::collections::HashMap;

use {reqwest::Client, serde::Deserialize};

use crate::{
    error::{Error, Result},
    sources::{
        TempRoot,
        registry::{RegistryAdapter, RegistryProtocol, join_url, url_path_ends_with},
    },
    types::SourceKind,
};

/// PyPI JSON API subset: `info.version` and `releases.<v>[]`.
#[derive(Debug, Deserialize)]
pub struct Project {
    pub info: ProjectInfo,
    #[serde(default)]
    pub releases: HashMap<String, Vec<ReleaseFile>>,
}

#[derive(Debug, Deserialize)]
pub struct ProjectInfo {
    pub version: String,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseFile {
    pub packagetype: String,
    pub url: String,
}

pub struct Pip;

impl RegistryProtocol for Pip {
    type Metadata = Project;

    const DEFAULT_REGISTRY: &'static str = "https://pypi.org";
    const KIND: SourceKind = SourceKind::Pip;
    const NOUN: &'static str = "package";

    fn metadata_url(registry: &str, name: &str) -> String {
        join_url(registry, &format!("pypi/{name}/json"))
    }

    fn latest(meta: &Project) -> Option<String> {
        Some(meta.info.version.clone())
    }

    fn has_version(meta: &Project, version: &str) -> bool {
        meta.releases.contains_key(version)
    }

    fn download_url(meta: &Project, _registry: &str, version: &str) -> Result<String> {
        let files = meta
            .releases
            .get(version)
            .map(Vec::as_slice)
            .unwrap_or_default();

        if let Some(sdist) = files
            .iter()
            .find(|f| f.packagetype == "sdist" && url_path_ends_with(&f.url, ".tar.gz"))
        {
            return Ok(sdist.url.clone());
        }

        // Wheels are zip files with a different layout; refuse rather than
        // guess at their extraction.
        if let Some(wheel) = files.iter().find(|f| f.packagetype == "bdist_wheel") {
            return Err(Error::UnsupportedArchive {
                url: wheel.url.clone(),
                reason: "release has no .tar.gz sdist and wheel extraction is not implemented"
                    .into(),
            });
        }

        Err(Error::message(format!(
            "release {version} has no downloadable sdist or wheel"
        )))
    }
}

pub type PipAdapter = RegistryAdapter<Pip>;

pub fn pip_adapter(client: Client, temp: TempRoot) -> PipAdapter {
    RegistryAdapter::new(client, temp)
}
