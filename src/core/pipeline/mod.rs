mod fetch;
mod stages;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tracing::info;

use crate::core::llm::LlmGateway;

pub use fetch::SourceFile;

/// File patterns applied when a request does not supply its own.
pub const DEFAULT_INCLUDE_PATTERNS: &[&str] = &[
    "*.py", "*.js", "*.jsx", "*.ts", "*.tsx", "*.go", "*.java", "*.pyi", "*.pyx", "*.rs", "*.c",
    "*.cc", "*.cpp", "*.h", "*.md", "*.rst", "Dockerfile", "Makefile", "*.yaml", "*.yml",
];

pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &[
    "assets/*",
    "data/*",
    "examples/*",
    "images/*",
    "public/*",
    "static/*",
    "temp/*",
    "docs/*",
    "venv/*",
    ".venv/*",
    "*test*",
    "tests/*",
    "v1/*",
    "dist/*",
    "build/*",
    "experimental/*",
    "deprecated/*",
    "misc/*",
    "legacy/*",
    ".git/*",
    ".github/*",
    ".next/*",
    ".vscode/*",
    "obj/*",
    "bin/*",
    "node_modules/*",
    "target/*",
    "*.log",
];

pub const DEFAULT_MAX_FILE_SIZE: u64 = 100_000;
pub const DEFAULT_MAX_ABSTRACTIONS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoSource {
    Url(String),
    LocalDir(PathBuf),
}

/// A validated, normalized generation request. Produced by the
/// orchestrator's submission gate; raw client input never reaches the
/// pipeline.
#[derive(Debug, Clone)]
pub struct TutorialRequest {
    pub source: RepoSource,
    pub project_name: Option<String>,
    pub language: String,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub max_file_size: u64,
    pub max_abstractions: usize,
    pub use_cache: bool,
    pub github_token: Option<String>,
}

impl TutorialRequest {
    /// A request for a repository URL with every other field defaulted.
    pub fn for_repo_url(url: impl Into<String>) -> Self {
        Self {
            source: RepoSource::Url(url.into()),
            project_name: None,
            language: "english".to_string(),
            include_patterns: DEFAULT_INCLUDE_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            exclude_patterns: DEFAULT_EXCLUDE_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_abstractions: DEFAULT_MAX_ABSTRACTIONS,
            use_cache: true,
            github_token: None,
        }
    }

    /// Display name for the generated tutorial: the explicit project name,
    /// else the last path segment of the repository reference.
    pub fn project_label(&self) -> String {
        if let Some(name) = &self.project_name {
            let trimmed = name.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
        let raw = match &self.source {
            RepoSource::Url(url) => url
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .unwrap_or("tutorial")
                .trim_end_matches(".git"),
            RepoSource::LocalDir(dir) => dir
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("tutorial"),
        };
        if raw.is_empty() {
            "tutorial".to_string()
        } else {
            raw.to_string()
        }
    }
}

/// The generation pipeline behind the orchestrator. Trait seam so job
/// lifecycle tests can run against a stub instead of live LLM traffic.
#[async_trait]
pub trait GenerationPipeline: Send + Sync {
    /// Run the full generation flow, writing artifacts under `output_dir`
    /// and returning the directory containing the finished document set.
    async fn run(
        &self,
        request: &TutorialRequest,
        gateway: &LlmGateway,
        output_dir: &Path,
    ) -> Result<PathBuf>;
}

/// Staged tutorial generation: fetch, identify abstractions, map
/// relationships, order chapters, write chapters, combine. Stages run
/// strictly in sequence and every LLM interaction goes through the
/// gateway.
pub struct TutorialPipeline {
    client: reqwest::Client,
}

impl Default for TutorialPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl TutorialPipeline {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl GenerationPipeline for TutorialPipeline {
    async fn run(
        &self,
        request: &TutorialRequest,
        gateway: &LlmGateway,
        output_dir: &Path,
    ) -> Result<PathBuf> {
        let project = request.project_label();

        let files = fetch::fetch_repository(&self.client, request)
            .await
            .context("fetching repository")?;
        if files.is_empty() {
            bail!("no files matched the include/exclude patterns");
        }
        info!(project = %project, files = files.len(), "repository fetched");

        let abstractions = stages::identify_abstractions(gateway, &files, request).await?;
        if abstractions.is_empty() {
            bail!("abstraction identification produced an empty list");
        }
        info!(project = %project, abstractions = abstractions.len(), "abstractions identified");

        let relationships = stages::map_relationships(gateway, &files, &abstractions, request).await?;
        let order = stages::order_chapters(gateway, &abstractions, &relationships, request).await?;

        let mut chapters = Vec::with_capacity(order.len());
        for (number, &abstraction_idx) in order.iter().enumerate() {
            let chapter = stages::write_chapter(
                gateway,
                &files,
                &abstractions,
                abstraction_idx,
                number + 1,
                &project,
                request,
            )
            .await?;
            chapters.push((abstraction_idx, chapter));
        }
        info!(project = %project, chapters = chapters.len(), "chapters written");

        write_output(output_dir, &project, &abstractions, &relationships, &chapters).await
    }
}

/// Lay the finished document set out as `<output_dir>/<project>/`:
/// an index plus one numbered markdown file per chapter.
async fn write_output(
    output_dir: &Path,
    project: &str,
    abstractions: &[stages::Abstraction],
    relationships: &stages::RelationshipMap,
    chapters: &[(usize, String)],
) -> Result<PathBuf> {
    let project_dir = output_dir.join(safe_file_stem(project));
    tokio::fs::create_dir_all(&project_dir)
        .await
        .with_context(|| format!("creating output directory {}", project_dir.display()))?;

    let mut index = format!("# Tutorial: {project}\n\n{}\n\n", relationships.summary);
    if !relationships.relationships.is_empty() {
        index.push_str("## How the pieces fit together\n\n");
        for rel in &relationships.relationships {
            let from = abstractions.get(rel.from).map(|a| a.name.as_str());
            let to = abstractions.get(rel.to).map(|a| a.name.as_str());
            if let (Some(from), Some(to)) = (from, to) {
                index.push_str(&format!("- **{from}** {} **{to}**\n", rel.label));
            }
        }
        index.push('\n');
    }
    index.push_str("## Chapters\n\n");

    for (number, (abstraction_idx, chapter)) in chapters.iter().enumerate() {
        let name = &abstractions[*abstraction_idx].name;
        let filename = format!("{:02}_{}.md", number + 1, safe_file_stem(name));
        index.push_str(&format!("{}. [{name}]({filename})\n", number + 1));
        tokio::fs::write(project_dir.join(&filename), chapter)
            .await
            .with_context(|| format!("writing chapter {filename}"))?;
    }

    tokio::fs::write(project_dir.join("index.md"), index)
        .await
        .context("writing index.md")?;

    Ok(project_dir)
}

fn safe_file_stem(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() { "tutorial".to_string() } else { stem }
}
