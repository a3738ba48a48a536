//! Git sources.
//!
//! Cloning and checkout shell out to the system `git` so SSH agents, proxies
//! and credential helpers behave as the user expects. Ref resolution in the
//! fresh clone goes through `gix`.
//!
//! Resolution order for an explicit version: tag, then commit id, then
//! branch. An explicit version that matches none of these is an error; only
//! an empty or `latest` version means HEAD of the default branch.

use std::{path::Path, process::Stdio};

use {
    async_trait::async_trait,
    base64::{Engine as _, engine::general_purpose::STANDARD},
    skillpm_config::GitCredentials,
    tokio::process::Command,
    tracing::{debug, info},
};

use crate::{
    error::{Error, NetworkFailureKind, Result},
    sources::{ResolvedDownload, SourceAdapter, TempRoot, is_latest},
    types::{Source, SourceKind},
};

/// Git source adapter.
#[derive(Debug, Clone)]
pub struct GitAdapter {
    credentials: Option<GitCredentials>,
    temp: TempRoot,
}

/// A version resolved inside a clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRef {
    /// Reported version: the tag name, or a commit id.
    pub version: String,
    /// Commit to check out.
    pub commit: String,
}

impl GitAdapter {
    pub fn new(credentials: Option<GitCredentials>, temp: TempRoot) -> Self {
        Self { credentials, temp }
    }

    /// Environment that makes `git` send the configured credentials. Only
    /// HTTPS remotes get them; SSH relies on the user's agent and keys.
    fn auth_env(&self, url: &str) -> Vec<(&'static str, String)> {
        let Some(creds) = &self.credentials else {
            return Vec::new();
        };
        if !url.starts_with("https://") {
            return Vec::new();
        }
        let basic = STANDARD.encode(format!("{}:{}", creds.username, creds.password()));
        vec![
            ("GIT_CONFIG_COUNT", "1".to_string()),
            ("GIT_CONFIG_KEY_0", "http.extraHeader".to_string()),
            ("GIT_CONFIG_VALUE_0", format!("Authorization: Basic {basic}")),
        ]
    }

    fn git(&self, url: &str) -> Command {
        let mut cmd = Command::new("git");
        cmd.envs(self.auth_env(url))
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, url: &str, op: &str, mut cmd: Command) -> Result<String> {
        check_remote(url)?;
        let output = cmd.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::message("git executable not found on PATH")
            } else {
                Error::external(format!("failed to run git {op}"), e)
            }
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(git_failure(url, op, &stderr));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Clone `url`, resolve `version`, check it out, and drop `.git`.
    pub async fn fetch(&self, url: &str, version: &str) -> Result<ResolvedDownload> {
        check_remote(url)?;
        let dir = self.temp.create("git")?;

        let mut clone = self.git(url);
        clone
            .args(["clone", "--quiet", "--no-checkout", "--", url])
            .arg(dir.path());
        self.run(url, "clone", clone).await?;

        let repo_dir = dir.path().to_path_buf();
        let locator = url.to_string();
        let requested = version.to_string();
        let resolved =
            tokio::task::spawn_blocking(move || resolve_ref(&repo_dir, &locator, &requested))
                .await
                .map_err(|e| Error::external("ref resolution task failed", e))??;

        let mut checkout = self.git(url);
        checkout
            .arg("-C")
            .arg(dir.path())
            .args(["checkout", "--quiet", "--detach", &resolved.commit]);
        self.run(url, "checkout", checkout).await?;

        tokio::fs::remove_dir_all(dir.path().join(".git")).await?;

        info!(%url, version = %resolved.version, commit = %resolved.commit, "checked out git source");
        Ok(ResolvedDownload::new(dir, resolved.version))
    }

    /// Highest semver tag on the remote, or the remote HEAD commit when no
    /// tag parses as semver.
    pub async fn latest_for_url(&self, url: &str) -> Result<String> {
        let mut tags = self.git(url);
        tags.args(["ls-remote", "--tags", "--refs", "--", url]);
        let listing = self.run(url, "ls-remote", tags).await?;
        let names = parse_ls_remote_tags(&listing);
        if let Some(tag) = select_latest_tag(&names) {
            return Ok(tag);
        }

        debug!(%url, tags = names.len(), "no semver tags, falling back to HEAD");
        let mut head = self.git(url);
        head.args(["ls-remote", "--", url, "HEAD"]);
        let listing = self.run(url, "ls-remote", head).await?;
        listing
            .split_whitespace()
            .next()
            .map(str::to_string)
            .ok_or_else(|| Error::version_not_found(url, "HEAD"))
    }
}

#[async_trait]
impl SourceAdapter for GitAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Git
    }

    async fn download(&self, source: &Source, version: &str) -> Result<ResolvedDownload> {
        self.fetch(source.locator.trim(), version).await
    }

    async fn latest_version(&self, source: &Source) -> Result<String> {
        self.latest_for_url(source.locator.trim()).await
    }
}

/// A remote that `git` would read as an option is refused.
fn check_remote(url: &str) -> Result<()> {
    if url.is_empty() || url.starts_with('-') {
        return Err(Error::invalid_source(format!("invalid git remote '{url}'")));
    }
    Ok(())
}

/// Resolve `version` inside the clone at `repo_dir`.
pub fn resolve_ref(repo_dir: &Path, locator: &str, version: &str) -> Result<ResolvedRef> {
    let repo =
        gix::open(repo_dir).map_err(|e| Error::external("failed to open cloned repository", e))?;

    if is_latest(version) {
        let head = repo
            .head_id()
            .map_err(|e| Error::external("repository has no HEAD commit", e))?
            .detach()
            .to_string();
        return Ok(ResolvedRef {
            version: head.clone(),
            commit: head,
        });
    }

    let version = version.trim();
    if let Some(commit) = peel_to_commit(&repo, &format!("refs/tags/{version}")) {
        return Ok(ResolvedRef {
            version: version.to_string(),
            commit,
        });
    }
    if looks_like_commit_id(version)
        && let Some(commit) = peel_to_commit(&repo, version)
    {
        return Ok(ResolvedRef {
            version: commit.clone(),
            commit,
        });
    }
    if let Some(commit) = peel_to_commit(&repo, &format!("refs/remotes/origin/{version}")) {
        return Ok(ResolvedRef {
            version: commit.clone(),
            commit,
        });
    }

    Err(Error::version_not_found(locator, version))
}

fn peel_to_commit(repo: &gix::Repository, rev: &str) -> Option<String> {
    let rev = format!("{rev}^{{commit}}");
    repo.rev_parse_single(rev.as_str())
        .ok()
        .map(|id| id.detach().to_string())
}

fn looks_like_commit_id(s: &str) -> bool {
    (4..=40).contains(&s.len()) && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Tag names from `git ls-remote --tags --refs` output.
pub fn parse_ls_remote_tags(listing: &str) -> Vec<String> {
    listing
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .filter_map(|r| r.strip_prefix("refs/tags/"))
        .map(|t| t.trim_end_matches("^{}").to_string())
        .collect()
}

/// Highest release tag by semver; prereleases only when no release exists.
/// Tags that are not semver (with or without a leading `v`) are ignored.
pub fn select_latest_tag(tags: &[String]) -> Option<String> {
    let parsed: Vec<(semver::Version, &String)> = tags
        .iter()
        .filter_map(|tag| {
            let bare = tag.strip_prefix(['v', 'V']).unwrap_or(tag);
            semver::Version::parse(bare).ok().map(|v| (v, tag))
        })
        .collect();

    let newest = |release: bool| {
        parsed
            .iter()
            .filter(|(v, _)| v.pre.is_empty() == release)
            .max_by(|a, b| a.0.cmp(&b.0))
            .map(|(_, tag)| (*tag).clone())
    };
    newest(true).or_else(|| newest(false))
}

/// Sub-classify a failed git invocation from its stderr.
pub fn classify_git_failure(stderr: &str) -> NetworkFailureKind {
    let s = stderr.to_ascii_lowercase();
    const AUTH: &[&str] = &[
        "authentication failed",
        "could not read username",
        "could not read password",
        "terminal prompts disabled",
        "permission denied (publickey",
        "access denied",
        "http 401",
        "error: 401",
        "error: 403",
        "returned error: 403",
        "returned error: 401",
    ];
    const NOT_FOUND: &[&str] = &[
        "repository not found",
        "not found",
        "does not appear to be a git repository",
        "does not exist",
    ];
    const CONNECTIVITY: &[&str] = &[
        "could not resolve host",
        "connection refused",
        "connection timed out",
        "operation timed out",
        "network is unreachable",
        "failed to connect",
        "could not connect",
        "connection reset",
        "unable to access",
    ];

    if AUTH.iter().any(|p| s.contains(p)) {
        NetworkFailureKind::AuthRequired
    } else if NOT_FOUND.iter().any(|p| s.contains(p)) {
        NetworkFailureKind::NotFound
    } else if CONNECTIVITY.iter().any(|p| s.contains(p)) {
        NetworkFailureKind::Connectivity
    } else {
        NetworkFailureKind::Other
    }
}

fn git_failure(url: &str, op: &str, stderr: &str) -> Error {
    let kind = classify_git_failure(stderr);
    let detail = stderr.trim();
    let message = match kind {
        NetworkFailureKind::AuthRequired => format!(
            "authentication required for {url}: set GIT_TOKEN (or GITHUB_TOKEN, GITLAB_TOKEN, \
             GITEA_TOKEN) or both GIT_USERNAME and GIT_PASSWORD; ssh remotes use your SSH agent \
             and keys ({detail})"
        ),
        NetworkFailureKind::NotFound => {
            format!("repository {url} not found: check the URL and your access to it ({detail})")
        },
        NetworkFailureKind::Connectivity => {
            format!("could not reach {url}: check your network connection ({detail})")
        },
        NetworkFailureKind::Other => format!("git {op} failed for {url}: {detail}"),
    };
    Error::network(kind, message)
}

/// Where a Go module's VCS repository lives for `direct` resolution.
pub fn module_repo_url(module: &str) -> String {
    format!("https://{module}")
}
