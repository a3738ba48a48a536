//! HTTP helpers shared by the registry and module-proxy adapters.

use std::path::Path;

use {
    futures::StreamExt,
    reqwest::{Client, StatusCode},
    serde::de::DeserializeOwned,
    tokio::io::AsyncWriteExt,
};

use crate::error::{Error, NetworkFailureKind, Result};

const USER_AGENT: &str = concat!("skillpm/", env!("CARGO_PKG_VERSION"));

/// Shared client. Registries such as crates.io reject requests without a
/// User-Agent.
pub fn client() -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| Error::network_with_source(NetworkFailureKind::Other, "failed to build HTTP client", e))
}

fn transport_error(url: &str, e: reqwest::Error) -> Error {
    let kind = if e.is_connect() || e.is_timeout() {
        NetworkFailureKind::Connectivity
    } else {
        NetworkFailureKind::Other
    };
    Error::network_with_source(kind, format!("request to {url} failed: {e}"), e)
}

async fn send(client: &Client, url: &str) -> Result<reqwest::Response> {
    client
        .get(url)
        .send()
        .await
        .map_err(|e| transport_error(url, e))
}

fn status_error(url: &str, status: StatusCode) -> Error {
    let kind = match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => NetworkFailureKind::NotFound,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => NetworkFailureKind::AuthRequired,
        _ => NetworkFailureKind::Other,
    };
    Error::network(kind, format!("GET {url} returned HTTP {status}"))
}

/// GET a JSON document. A 404 becomes a not-found failure carrying
/// `not_found` as its message; any other non-2xx names the URL.
pub async fn get_json<T: DeserializeOwned>(client: &Client, url: &str, not_found: &str) -> Result<T> {
    let resp = send(client, url).await?;
    let status = resp.status();
    if status == StatusCode::NOT_FOUND {
        return Err(Error::network(
            NetworkFailureKind::NotFound,
            format!("{not_found} ({url})"),
        ));
    }
    if !status.is_success() {
        return Err(status_error(url, status));
    }
    resp.json::<T>().await.map_err(|e| {
        Error::network_with_source(
            NetworkFailureKind::Other,
            format!("invalid JSON from {url}: {e}"),
            e,
        )
    })
}

/// GET a JSON document, reporting every non-2xx (including 404/410) through
/// the status classification.
pub async fn get_json_strict<T: DeserializeOwned>(client: &Client, url: &str) -> Result<T> {
    let resp = send(client, url).await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(status_error(url, status));
    }
    resp.json::<T>().await.map_err(|e| {
        Error::network_with_source(
            NetworkFailureKind::Other,
            format!("invalid JSON from {url}: {e}"),
            e,
        )
    })
}

/// Stream the body of `url` into `dest` without buffering it in memory.
pub async fn download_to_file(client: &Client, url: &str, dest: &Path) -> Result<u64> {
    let resp = send(client, url).await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(status_error(url, status));
    }

    let mut file = tokio::fs::File::create(dest).await?;
    let mut stream = resp.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| transport_error(url, e))?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    tracing::debug!(%url, bytes = written, "downloaded");
    Ok(written)
}
