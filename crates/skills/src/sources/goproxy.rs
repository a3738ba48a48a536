//! Go modules, resolved through a GOPROXY-style endpoint chain.
//!
//! The chain string is comma-separated groups of pipe-separated endpoints.
//! Each endpoint is a proxy URL or one of the literals `direct` (fetch the
//! module's repository with git) and `off` (lookups disabled). Endpoints are
//! tried in order; a failure moves on to the next one, `off` ends the walk.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    async_trait::async_trait,
    reqwest::Client,
    serde::Deserialize,
    tracing::{debug, info, warn},
};

use crate::{
    archive,
    error::{Error, NetworkFailureKind, Result},
    sources::{
        ResolvedDownload, SourceAdapter, TempRoot,
        git::{GitAdapter, module_repo_url},
        http, is_latest,
    },
    types::{Source, SourceKind},
};

pub const DEFAULT_PROXY: &str = "https://proxy.golang.org";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyEndpoint {
    Url(String),
    Direct,
    Off,
}

impl ProxyEndpoint {
    fn parse(token: &str) -> Self {
        match token {
            "direct" => Self::Direct,
            "off" => Self::Off,
            url => Self::Url(url.to_string()),
        }
    }
}

/// One endpoint of the chain. `fallback` only records which separator
/// introduced the entry: it is set on the first endpoint of each comma group
/// and cleared on endpoints joined with `|`. Resolution ignores it and moves
/// to the next entry on any failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEntry {
    pub endpoint: ProxyEndpoint,
    pub fallback: bool,
}

impl ProxyEntry {
    fn new(endpoint: ProxyEndpoint, fallback: bool) -> Self {
        Self { endpoint, fallback }
    }
}

/// The git revision behind a module version: the commit prefix of a
/// pseudo-version, otherwise the tag with any `+incompatible` dropped.
pub fn direct_revision(version: &str) -> &str {
    let version = version.trim();
    let tag = version.strip_suffix("+incompatible").unwrap_or(version);
    pseudo_version_commit(tag).unwrap_or(tag)
}

/// `abcdef123456` from `v0.0.0-20240101000000-abcdef123456` and the
/// `-pre.0.<stamp>-<rev>` / `-0.<stamp>-<rev>` forms.
fn pseudo_version_commit(version: &str) -> Option<&str> {
    let (rest, rev) = version.rsplit_once('-')?;
    if rev.len() != 12 || !rev.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let stamp = rest.rsplit(['-', '.']).next()?;
    (stamp.len() == 14 && stamp.bytes().all(|b| b.is_ascii_digit())).then_some(rev)
}

/// Parse a GOPROXY string. Empty input yields the default
/// `proxy.golang.org, direct` chain.
pub fn parse_proxy_chain(raw: &str) -> Vec<ProxyEntry> {
    let mut chain = Vec::new();
    for group in raw.split(',') {
        let mut first = true;
        for token in group.split('|').map(str::trim).filter(|t| !t.is_empty()) {
            chain.push(ProxyEntry::new(ProxyEndpoint::parse(token), first));
            first = false;
        }
    }
    if chain.is_empty() {
        chain = vec![
            ProxyEntry::new(ProxyEndpoint::Url(DEFAULT_PROXY.to_string()), true),
            ProxyEntry::new(ProxyEndpoint::Direct, true),
        ];
    }
    chain
}

/// Case-encode a module path or version for proxy URLs: each uppercase
/// letter becomes `!` followed by its lowercase form.
pub fn escape_module_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        if c.is_ascii_uppercase() {
            out.push('!');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Nearest `go.mod` in `start` or one of its ancestors.
pub fn find_go_mod(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join("go.mod"))
        .find(|candidate| candidate.is_file())
}

/// `(module, version)` pairs from every `require` directive, block or
/// single-line form. Comments, including `// indirect`, are dropped.
pub fn parse_go_mod_requires(content: &str) -> Vec<(String, String)> {
    fn requirement(line: &str) -> Option<(String, String)> {
        let mut parts = line.split_whitespace();
        let module = parts.next()?.trim_matches('"');
        let version = parts.next()?;
        Some((module.to_string(), version.to_string()))
    }

    let mut requires = Vec::new();
    let mut in_block = false;
    for raw in content.lines() {
        let line = raw.split("//").next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }
        if in_block {
            if line == ")" {
                in_block = false;
            } else {
                requires.extend(requirement(line));
            }
            continue;
        }
        let Some(rest) = line.strip_prefix("require") else {
            continue;
        };
        if let Some(after) = rest.trim_start().strip_prefix('(') {
            in_block = true;
            let after = after.trim();
            if let Some(inline) = after.strip_suffix(')') {
                in_block = false;
                requires.extend(requirement(inline));
            } else {
                requires.extend(requirement(after));
            }
        } else if rest.starts_with(char::is_whitespace) {
            requires.extend(requirement(rest));
        }
    }
    requires
}

#[derive(Debug, Deserialize)]
struct VersionInfo {
    #[serde(rename = "Version")]
    version: String,
}

/// Go module source adapter.
pub struct GoModuleAdapter {
    chain: Vec<ProxyEntry>,
    client: Client,
    temp: TempRoot,
    git: Arc<GitAdapter>,
    work_dir: Option<PathBuf>,
}

impl GoModuleAdapter {
    pub fn new(
        chain: Vec<ProxyEntry>,
        client: Client,
        temp: TempRoot,
        git: Arc<GitAdapter>,
        work_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            chain,
            client,
            temp,
            git,
            work_dir,
        }
    }

    pub fn chain(&self) -> &[ProxyEntry] {
        &self.chain
    }

    /// Version pinned for `module` by the nearest go.mod, if any.
    async fn go_mod_version(&self, module: &str) -> Result<Option<String>> {
        let start = match &self.work_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()?,
        };
        let Some(go_mod) = find_go_mod(&start) else {
            return Ok(None);
        };
        let content = tokio::fs::read_to_string(&go_mod).await?;
        let version = parse_go_mod_requires(&content)
            .into_iter()
            .find(|(path, _)| path == module)
            .map(|(_, version)| version);
        if let Some(version) = &version {
            debug!(%module, %version, go_mod = %go_mod.display(), "version pinned by go.mod");
        }
        Ok(version)
    }

    async fn latest(&self, module: &str) -> Result<String> {
        let mut last_err = None;
        for entry in &self.chain {
            let attempt = match &entry.endpoint {
                ProxyEndpoint::Off => return Err(lookup_disabled(module)),
                ProxyEndpoint::Direct => self.git.latest_for_url(&module_repo_url(module)).await,
                ProxyEndpoint::Url(base) => self.latest_from_proxy(base, module).await,
            };
            match attempt {
                Ok(version) => return Ok(version),
                Err(e) => {
                    warn!(%module, endpoint = ?entry.endpoint, error = %e, "module proxy lookup failed");
                    last_err = Some(e);
                },
            }
        }
        Err(last_err.unwrap_or_else(|| lookup_disabled(module)))
    }

    async fn fetch(&self, module: &str, version: &str) -> Result<ResolvedDownload> {
        let mut last_err = None;
        for entry in &self.chain {
            let attempt = match &entry.endpoint {
                ProxyEndpoint::Off => return Err(lookup_disabled(module)),
                ProxyEndpoint::Direct => self.fetch_direct(module, version).await,
                ProxyEndpoint::Url(base) => self.fetch_from_proxy(base, module, version).await,
            };
            match attempt {
                Ok(download) => return Ok(download),
                Err(e) => {
                    warn!(%module, %version, endpoint = ?entry.endpoint, error = %e, "module fetch failed");
                    last_err = Some(e);
                },
            }
        }
        Err(last_err.unwrap_or_else(|| lookup_disabled(module)))
    }

    /// VCS fetch. The reported version stays the module version asked for.
    async fn fetch_direct(&self, module: &str, version: &str) -> Result<ResolvedDownload> {
        let mut download = self
            .git
            .fetch(&module_repo_url(module), direct_revision(version))
            .await?;
        if !is_latest(version) {
            download.version = version.trim().to_string();
        }
        Ok(download)
    }

    async fn latest_from_proxy(&self, base: &str, module: &str) -> Result<String> {
        let url = format!(
            "{}/{}/@latest",
            base.trim_end_matches('/'),
            escape_module_path(module)
        );
        let info: VersionInfo = http::get_json(
            &self.client,
            &url,
            &format!("module '{module}' not found"),
        )
        .await?;
        Ok(info.version)
    }

    async fn fetch_from_proxy(
        &self,
        base: &str,
        module: &str,
        version: &str,
    ) -> Result<ResolvedDownload> {
        let base = base.trim_end_matches('/');
        let module_url = format!(
            "{base}/{}/@v/{}",
            escape_module_path(module),
            escape_module_path(version)
        );

        let info_url = format!("{module_url}.info");
        match http::get_json_strict::<VersionInfo>(&self.client, &info_url).await {
            Ok(_) => {},
            Err(e) if e.network_kind() == Some(NetworkFailureKind::NotFound) => {
                return Err(Error::version_not_found(module, version));
            },
            Err(e) => return Err(e),
        }

        let scratch = self.temp.create("gozip")?;
        let zip_path = scratch.path().join("module.zip");
        http::download_to_file(&self.client, &format!("{module_url}.zip"), &zip_path).await?;

        let content = self.temp.create("go-module")?;
        let dest = content.path().to_path_buf();
        let prefix = format!("{module}@{version}/");
        tokio::task::spawn_blocking(move || archive::extract_module_zip(&zip_path, &prefix, &dest))
            .await
            .map_err(|e| Error::external("extraction task failed", e))??;
        drop(scratch);

        info!(%module, %version, proxy = %base, "downloaded module");
        Ok(ResolvedDownload::new(content, version))
    }
}

fn lookup_disabled(module: &str) -> Error {
    Error::network(
        NetworkFailureKind::Other,
        format!("module lookup disabled by GOPROXY=off (module {module})"),
    )
}

#[async_trait]
impl SourceAdapter for GoModuleAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::GoModule
    }

    async fn download(&self, source: &Source, version: &str) -> Result<ResolvedDownload> {
        let module = source.locator.trim();

        // Only an empty request consults go.mod; "latest" always asks the chain.
        if version.trim().is_empty()
            && let Some(pinned) = self.go_mod_version(module).await?
        {
            let download = self.fetch(module, &pinned).await?;
            return Ok(download.with_external_ledger(true));
        }

        let version = if is_latest(version) {
            self.latest(module).await?
        } else {
            version.trim().to_string()
        };
        self.fetch(module, &version).await
    }

    async fn latest_version(&self, source: &Source) -> Result<String> {
        self.latest(source.locator.trim()).await
    }
}
