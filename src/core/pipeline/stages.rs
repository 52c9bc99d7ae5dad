use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::TutorialRequest;
use super::fetch::SourceFile;
use crate::core::llm::LlmGateway;

/// Per-file context cap inside prompts; whole files rarely help beyond this.
const MAX_FILE_CONTEXT_CHARS: usize = 6_000;

#[derive(Debug, Clone, Deserialize)]
pub(super) struct Abstraction {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub file_indices: Vec<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub(super) struct RelationshipMap {
    pub summary: String,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

#[derive(Debug, Clone, Deserialize)]
pub(super) struct Relationship {
    pub from: usize,
    pub to: usize,
    pub label: String,
}

pub(super) async fn identify_abstractions(
    gateway: &LlmGateway,
    files: &[SourceFile],
    request: &TutorialRequest,
) -> Result<Vec<Abstraction>> {
    let prompt = format!(
        "You are analyzing a codebase to write a beginner tutorial.\n\
         {language}\
         Identify the {max} most important core abstractions (concepts, components, \
         subsystems) a newcomer must understand.\n\n\
         Return ONLY a JSON array where each element is an object with:\n\
         - \"name\": short abstraction name\n\
         - \"description\": 1-2 sentence beginner-friendly explanation\n\
         - \"file_indices\": array of integer indices of the most relevant files below\n\n\
         Files:\n{context}",
        language = language_clause(request),
        max = request.max_abstractions,
        context = file_context(files),
    );

    let response = gateway.call(&prompt, request.use_cache).await?;
    let mut abstractions: Vec<Abstraction> =
        parse_stage_json("identify abstractions", &response)?;

    for abstraction in &mut abstractions {
        abstraction.file_indices.retain(|&idx| idx < files.len());
    }
    abstractions.truncate(request.max_abstractions);
    Ok(abstractions)
}

pub(super) async fn map_relationships(
    gateway: &LlmGateway,
    files: &[SourceFile],
    abstractions: &[Abstraction],
    request: &TutorialRequest,
) -> Result<RelationshipMap> {
    let prompt = format!(
        "You are analyzing a codebase to write a beginner tutorial.\n\
         {language}\
         Given these abstractions:\n{listing}\n\n\
         And these files:\n{context}\n\n\
         Return ONLY a JSON object with:\n\
         - \"summary\": a short project overview in simple language\n\
         - \"relationships\": array of objects {{\"from\": <abstraction index>, \
         \"to\": <abstraction index>, \"label\": \"<verb phrase>\"}} describing how \
         abstractions interact",
        language = language_clause(request),
        listing = abstraction_listing(abstractions),
        context = file_context(files),
    );

    let response = gateway.call(&prompt, request.use_cache).await?;
    let mut map: RelationshipMap = parse_stage_json("map relationships", &response)?;
    map.relationships
        .retain(|rel| rel.from < abstractions.len() && rel.to < abstractions.len());
    Ok(map)
}

/// Returns abstraction indices in pedagogical order. Indices the model
/// invents are dropped and omissions appended, so every abstraction gets
/// exactly one chapter.
pub(super) async fn order_chapters(
    gateway: &LlmGateway,
    abstractions: &[Abstraction],
    relationships: &RelationshipMap,
    request: &TutorialRequest,
) -> Result<Vec<usize>> {
    let prompt = format!(
        "You are planning the chapter order of a beginner tutorial.\n\
         Project summary: {summary}\n\n\
         Abstractions:\n{listing}\n\n\
         Return ONLY a JSON array of the abstraction indices in the order a \
         beginner should learn them, foundational concepts first.",
        summary = relationships.summary,
        listing = abstraction_listing(abstractions),
    );

    let response = gateway.call(&prompt, request.use_cache).await?;
    let proposed: Vec<usize> = parse_stage_json("order chapters", &response)?;

    let mut order = Vec::with_capacity(abstractions.len());
    for idx in proposed {
        if idx < abstractions.len() && !order.contains(&idx) {
            order.push(idx);
        }
    }
    for idx in 0..abstractions.len() {
        if !order.contains(&idx) {
            order.push(idx);
        }
    }
    Ok(order)
}

pub(super) async fn write_chapter(
    gateway: &LlmGateway,
    files: &[SourceFile],
    abstractions: &[Abstraction],
    abstraction_idx: usize,
    chapter_number: usize,
    project: &str,
    request: &TutorialRequest,
) -> Result<String> {
    let abstraction = &abstractions[abstraction_idx];
    let related: Vec<SourceFile> = abstraction
        .file_indices
        .iter()
        .filter_map(|&idx| files.get(idx).cloned())
        .collect();
    let context = if related.is_empty() {
        file_context(files)
    } else {
        file_context(&related)
    };

    let prompt = format!(
        "Write chapter {number} of a beginner tutorial for the project \"{project}\".\n\
         {language}\
         The chapter covers the abstraction \"{name}\": {description}\n\n\
         Relevant code:\n{context}\n\n\
         Write friendly markdown starting with a `# Chapter {number}: {name}` heading. \
         Explain the concept from first principles, walk through the key code, and \
         end with a short summary.",
        number = chapter_number,
        project = project,
        language = language_clause(request),
        name = abstraction.name,
        description = abstraction.description,
        context = context,
    );

    let chapter = gateway.call(&prompt, request.use_cache).await?;
    if chapter.trim().is_empty() {
        bail!("write chapter stage returned an empty chapter for '{}'", abstraction.name);
    }
    Ok(chapter)
}

fn language_clause(request: &TutorialRequest) -> String {
    if request.language.eq_ignore_ascii_case("english") {
        String::new()
    } else {
        format!("Write all generated prose in {}.\n", request.language)
    }
}

fn file_context(files: &[SourceFile]) -> String {
    let mut context = String::new();
    for (idx, file) in files.iter().enumerate() {
        let mut content = file.content.as_str();
        if let Some((boundary, _)) = content.char_indices().nth(MAX_FILE_CONTEXT_CHARS) {
            content = &content[..boundary];
        }
        context.push_str(&format!("--- File {idx}: {} ---\n{content}\n", file.path));
    }
    context
}

fn abstraction_listing(abstractions: &[Abstraction]) -> String {
    abstractions
        .iter()
        .enumerate()
        .map(|(idx, a)| format!("{idx}. {}: {}", a.name, a.description))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Models wrap JSON in prose or code fences; accept both. A body that
/// still fails to parse is a stage failure, not a retry candidate.
fn parse_stage_json<T: DeserializeOwned>(stage: &str, response: &str) -> Result<T> {
    let candidate = extract_json_candidate(response);
    serde_json::from_str(candidate)
        .with_context(|| format!("{stage} stage returned malformed JSON"))
}

fn extract_json_candidate(response: &str) -> &str {
    let trimmed = response.trim();

    if let Some(fence_start) = trimmed.find("```") {
        let after = &trimmed[fence_start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        if let Some(fence_end) = body.find("```") {
            return body[..fence_end].trim();
        }
    }

    let object = trimmed.find('{').zip(trimmed.rfind('}'));
    let array = trimmed.find('[').zip(trimmed.rfind(']'));
    let span = match (object, array) {
        (Some((os, oe)), Some((as_, ae))) => {
            if as_ < os { Some((as_, ae)) } else { Some((os, oe)) }
        }
        (Some(span), None) | (None, Some(span)) => Some(span),
        (None, None) => None,
    };
    match span {
        Some((start, end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}
