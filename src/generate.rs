//! Aggregate-artifact generation.
//!
//! Reads a group's selected files and writes one timestamped text snapshot
//! into that group's directory. A failure to read any single file is
//! captured inline in the artifact instead of aborting the generation — one
//! bad file must not prevent the rest from being exported.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::warn;

use crate::config::Config;

/// Separator line between per-file sections.
const SECTION_SEPARATOR: &str = "\n----------------------------------------\n\n";

/// What to generate: the selection plus the owning group.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateSpec {
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
}

/// Descriptor of one completed generation. Immutable once produced.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    pub success: bool,
    /// Output path relative to the watch root's output directory
    /// (`{groupId}/{fileName}`).
    pub path: String,
    pub full_path: String,
    pub file_count: usize,
    pub group_id: String,
    pub timestamp: DateTime<Utc>,
    pub file_name: String,
    pub directory: String,
    pub size: usize,
}

/// Generate a content artifact for a group's file selection.
///
/// Directory-creation and final-write failures abort the whole operation;
/// per-file read failures are absorbed into the artifact body.
pub async fn generate_content_file(
    watch_dir: &Path,
    config: &Config,
    spec: &GenerateSpec,
) -> Result<GenerationResult> {
    let group_id = spec
        .group_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| anyhow!("Group ID is required for file generation"))?;

    let now = Utc::now();
    // Compact UTC token for filename uniqueness: YYYYMMDDHHMMSS
    let token = now.format("%Y%m%d%H%M%S").to_string();

    let group_dir = watch_dir.join(&config.output.directory).join(group_id);
    fs::create_dir_all(&group_dir)
        .await
        .with_context(|| format!("Failed to create directory for group {}", group_id))?;

    let file_name = config
        .output
        .file_name_pattern
        .replace("{name}", group_id)
        .replace("{timestamp}", &token);
    let output_path = group_dir.join(&file_name);

    let mut content = String::new();
    content.push_str("###\n");
    content.push_str(&format!("# Content Group: {}\n", spec.name));
    if let Some(description) = spec.description.as_deref().filter(|d| !d.is_empty()) {
        content.push_str(&format!("# Description: {}\n", description));
    }
    content.push_str(&format!(
        "# Generated: {}\n",
        now.to_rfc3339_opts(SecondsFormat::Millis, true)
    ));
    content.push_str(&format!("# Group ID: {}\n", group_id));
    content.push_str(&format!("# Files: {}\n", spec.files.len()));
    content.push_str(&format!("# Directory: {}\n", group_dir.display()));
    content.push_str("###\n\n");

    for file in &spec.files {
        if let Some(section) = render_file_section(watch_dir, file).await {
            content.push_str(&section);
        }
    }

    fs::write(&output_path, &content)
        .await
        .with_context(|| format!("Failed to write {}", output_path.display()))?;

    Ok(GenerationResult {
        success: true,
        path: format!("{}/{}", group_id, file_name),
        full_path: output_path.display().to_string(),
        file_count: spec.files.len(),
        group_id: group_id.to_string(),
        timestamp: now,
        file_name,
        directory: group_dir.display().to_string(),
        size: content.len(),
    })
}

/// Render one per-file section, or `None` for non-regular files.
///
/// Stat and read failures become an inline error notice rather than an
/// `Err` — the caller's generation carries on.
async fn render_file_section(watch_dir: &Path, file: &str) -> Option<String> {
    let path = watch_dir.join(file);

    let metadata = match fs::metadata(&path).await {
        Ok(metadata) => metadata,
        Err(err) => return Some(error_section(file, &err.to_string())),
    };

    if !metadata.is_file() {
        warn!("Skipping non-file: {}", file);
        return None;
    }

    let body = match fs::read_to_string(&path).await {
        Ok(body) => body,
        Err(err) => return Some(error_section(file, &err.to_string())),
    };

    let modified: DateTime<Utc> = metadata
        .modified()
        .map(DateTime::from)
        .unwrap_or_else(|_| Utc::now());

    Some(format!(
        "### File: {} ###\n# Size: {} bytes\n# Modified: {}\n{}{}",
        file,
        metadata.len(),
        modified.to_rfc3339_opts(SecondsFormat::Millis, true),
        body,
        SECTION_SEPARATOR,
    ))
}

fn error_section(file: &str, message: &str) -> String {
    format!(
        "### File: {} ###\n# Error: Failed to read file - {}{}",
        file, message, SECTION_SEPARATOR,
    )
}
