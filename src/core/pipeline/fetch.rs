use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use flate2::read::GzDecoder;
use regex::Regex;
use tracing::{debug, info};

use super::{RepoSource, TutorialRequest};

/// One repository file selected for analysis.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Path relative to the repository root, forward slashes.
    pub path: String,
    pub content: String,
}

/// Collect the analyzable files for a request: a local directory walk or a
/// GitHub tarball download, filtered by the request's patterns and size
/// limit. Binary (non-UTF-8) files are skipped.
pub(super) async fn fetch_repository(
    client: &reqwest::Client,
    request: &TutorialRequest,
) -> Result<Vec<SourceFile>> {
    let filter = PatternFilter::build(request)?;
    match &request.source {
        RepoSource::LocalDir(dir) => {
            let dir = dir.clone();
            let max_size = request.max_file_size;
            tokio::task::spawn_blocking(move || collect_local(&dir, &filter, max_size))
                .await
                .map_err(|e| anyhow!("local walk task failed: {e}"))?
        }
        RepoSource::Url(url) => fetch_github(client, url, request, &filter).await,
    }
}

fn collect_local(root: &Path, filter: &PatternFilter, max_size: u64) -> Result<Vec<SourceFile>> {
    if !root.is_dir() {
        bail!("local directory {} does not exist", root.display());
    }
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)
            .with_context(|| format!("reading directory {}", dir.display()))?
        {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            let rel = path
                .strip_prefix(root)
                .expect("walk stays under root")
                .to_string_lossy()
                .replace('\\', "/");
            let meta = entry.metadata()?;
            if meta.len() > max_size || !filter.matches(&rel) {
                continue;
            }
            match std::fs::read(&path) {
                Ok(bytes) => {
                    if let Ok(content) = String::from_utf8(bytes) {
                        files.push(SourceFile { path: rel, content });
                    }
                }
                Err(e) => debug!("skipping unreadable file {rel}: {e}"),
            }
        }
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

/// Download `codeload.github.com/{owner}/{repo}/tar.gz/HEAD` and unpack it
/// in memory, dropping the archive's top-level directory component.
async fn fetch_github(
    client: &reqwest::Client,
    url: &str,
    request: &TutorialRequest,
    filter: &PatternFilter,
) -> Result<Vec<SourceFile>> {
    let (owner, repo) = parse_github_url(url)?;
    let tarball_url = format!("https://codeload.github.com/{owner}/{repo}/tar.gz/HEAD");

    let mut req = client.get(&tarball_url);
    if let Some(token) = &request.github_token {
        req = req.header("Authorization", format!("Bearer {token}"));
    }

    let response = req
        .send()
        .await
        .with_context(|| format!("downloading {tarball_url}"))?;
    if !response.status().is_success() {
        bail!(
            "repository download failed with HTTP {} for {url}",
            response.status()
        );
    }
    let bytes = response.bytes().await.context("reading repository tarball")?;
    info!(repo = %format!("{owner}/{repo}"), bytes = bytes.len(), "repository tarball downloaded");

    let filter = filter.clone();
    let max_size = request.max_file_size;
    tokio::task::spawn_blocking(move || unpack_tarball(&bytes, &filter, max_size))
        .await
        .map_err(|e| anyhow!("unpack task failed: {e}"))?
}

fn unpack_tarball(bytes: &[u8], filter: &PatternFilter, max_size: u64) -> Result<Vec<SourceFile>> {
    let decoder = GzDecoder::new(bytes);
    let mut archive = tar::Archive::new(decoder);
    let mut files = Vec::new();

    for entry in archive.entries().context("reading tarball entries")? {
        let mut entry = entry.context("reading tarball entry")?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path().context("tarball entry path")?;
        // GitHub tarballs nest everything under "{repo}-{ref}/".
        let rel: String = {
            let mut components = path.components();
            components.next();
            components.as_path().to_string_lossy().replace('\\', "/")
        };
        if rel.is_empty() || entry.size() > max_size || !filter.matches(&rel) {
            continue;
        }
        let mut buf = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut buf).context("reading tarball file")?;
        if let Ok(content) = String::from_utf8(buf) {
            files.push(SourceFile { path: rel, content });
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

fn parse_github_url(url: &str) -> Result<(String, String)> {
    let trimmed = url
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
        .trim_end_matches(".git");
    let mut parts = trimmed.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("github.com"), Some(owner), Some(repo)) if !owner.is_empty() && !repo.is_empty() => {
            Ok((owner.to_string(), repo.to_string()))
        }
        _ => bail!("unsupported repository reference '{url}': expected https://github.com/owner/repo"),
    }
}

/// Compiled include/exclude globs. `*` matches any run of characters
/// (including separators) and `?` a single character, matched against the
/// whole relative path.
#[derive(Debug, Clone)]
pub(super) struct PatternFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl PatternFilter {
    pub(super) fn build(request: &TutorialRequest) -> Result<Self> {
        Ok(Self {
            include: compile_patterns(&request.include_patterns)?,
            exclude: compile_patterns(&request.exclude_patterns)?,
        })
    }

    pub(super) fn matches(&self, path: &str) -> bool {
        let included = self.include.iter().any(|re| re.is_match(path));
        let excluded = self.exclude.iter().any(|re| re.is_match(path));
        included && !excluded
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|pattern| {
            let escaped = regex::escape(pattern).replace(r"\*", ".*").replace(r"\?", ".");
            Regex::new(&format!("^{escaped}$"))
                .with_context(|| format!("invalid file pattern '{pattern}'"))
        })
        .collect()
}
