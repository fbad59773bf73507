//! Resolves a user-supplied filename or path to image bytes: an existing
//! local file is read directly, anything else is fetched from the public
//! photo server and kept in the cache directory.

use std::path::Path;

use crate::error::{Result, SearchError};

pub async fn grab_image(input: &str, base_url: &str, cache_dir: &Path) -> Result<Vec<u8>> {
    let local = Path::new(input);
    if local.exists() {
        return Ok(tokio::fs::read(local).await?);
    }
    let cached = cache_dir.join(basename(input));
    if cached.exists() {
        return Ok(tokio::fs::read(&cached).await?);
    }

    let url = format!("{}/{}", base_url.trim_end_matches('/'), input);
    log::info!("[fetch] {input} not local, downloading {url}");
    let response = reqwest::get(&url).await?;
    if !response.status().is_success() {
        return Err(SearchError::ImageNotFound(format!(
            "'{input}' is neither a local file nor on the photo server (HTTP {})",
            response.status()
        )));
    }
    let bytes = response.bytes().await?.to_vec();
    tokio::fs::create_dir_all(cache_dir).await?;
    if let Err(e) = tokio::fs::write(&cached, &bytes).await {
        log::warn!("[fetch] could not cache {}: {e}", cached.display());
    }
    Ok(bytes)
}

/// Final path component, for the newline-joined response body.
pub fn basename(path: &str) -> String {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
        .to_string()
}
