//! Group records and their persistent registry.
//!
//! Groups are persisted as a single JSON document (`groups.json`) inside the
//! output directory, alongside one storage directory per group. The group id
//! doubles as the directory name, so every id change is accompanied by a
//! directory rename.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::config::Config;

/// Id of the group created on first initialization.
pub const DEFAULT_GROUP_ID: &str = "content-group-1";

/// Display color tag for a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GroupColor {
    #[default]
    Blue,
    Green,
    Purple,
    Red,
    Orange,
    Yellow,
    Pink,
    Teal,
}

/// One generation record in a group's history, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub file_name: String,
    pub timestamp: DateTime<Utc>,
}

/// A named, user-curated selection of repository files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub color: GroupColor,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl Group {
    /// New empty group with an id derived from the display name.
    pub fn new(name: &str) -> Self {
        Self {
            id: slugify(name),
            name: name.to_string(),
            files: Vec::new(),
            description: String::new(),
            color: GroupColor::default(),
            history: Vec::new(),
        }
    }

    fn default_group() -> Self {
        Self {
            id: DEFAULT_GROUP_ID.to_string(),
            name: "Content Group 1".to_string(),
            files: Vec::new(),
            description: String::new(),
            color: GroupColor::Blue,
            history: Vec::new(),
        }
    }

    /// Drop duplicate file entries, keeping the first occurrence of each.
    ///
    /// Applied on every update so the invariant holds even when a request
    /// supplies duplicates.
    pub fn dedup_files(&mut self) {
        let mut seen = HashSet::new();
        self.files.retain(|file| seen.insert(file.clone()));
    }
}

/// Derive a URL- and filesystem-safe id from a display name.
///
/// Lowercase alphanumerics and hyphens only; runs of other characters
/// collapse into a single hyphen.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars().flat_map(|c| c.to_lowercase()) {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

/// True if `id` is usable as both a URL segment and a directory name.
pub fn is_valid_slug(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Durable registry of groups plus the directory-per-group convention.
#[derive(Debug, Clone)]
pub struct GroupStore {
    base_dir: PathBuf,
    groups_file: PathBuf,
}

impl GroupStore {
    pub fn new(watch_dir: &Path, config: &Config) -> Self {
        let base_dir = watch_dir.join(&config.output.directory);
        let groups_file = base_dir.join("groups.json");
        Self {
            base_dir,
            groups_file,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn group_directory(&self, group_id: &str) -> PathBuf {
        self.base_dir.join(group_id)
    }

    /// Ensure the storage root exists and seed the registry on first run.
    ///
    /// When no registry document exists yet, one default group (and its
    /// directory) is created so the system is usable immediately. Failing to
    /// create the base directory is fatal.
    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.base_dir)
            .await
            .with_context(|| format!("Failed to create storage root: {}", self.base_dir.display()))?;

        if !path_exists(&self.groups_file).await {
            let default_group = Group::default_group();
            self.create_group_directory(&default_group.id).await?;
            self.save_groups(&[default_group]).await?;
            debug!("Seeded group registry at {}", self.groups_file.display());
        }

        Ok(())
    }

    /// All groups, in registry order.
    ///
    /// Fails soft: a read or parse error is logged and yields an empty list,
    /// since group data is not required for the file-watching half of the
    /// system to function.
    pub async fn get_groups(&self) -> Vec<Group> {
        match self.read_groups().await {
            Ok(groups) => groups,
            Err(err) => {
                warn!("Error reading groups: {:#}", err);
                Vec::new()
            }
        }
    }

    async fn read_groups(&self) -> Result<Vec<Group>> {
        let data = fs::read_to_string(&self.groups_file)
            .await
            .with_context(|| format!("Failed to read {}", self.groups_file.display()))?;
        let groups: Vec<Group> = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse {}", self.groups_file.display()))?;
        Ok(groups)
    }

    /// Overwrite the registry document.
    ///
    /// Writes to a temp file and renames it over `groups.json` so a crashed
    /// write can never leave a torn document. Errors propagate — silent loss
    /// of group edits is unacceptable.
    pub async fn save_groups(&self, groups: &[Group]) -> Result<()> {
        let json = serde_json::to_string_pretty(groups)?;
        let tmp = self.base_dir.join(".groups.json.tmp");
        fs::write(&tmp, &json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.groups_file)
            .await
            .with_context(|| format!("Failed to save {}", self.groups_file.display()))?;
        Ok(())
    }

    /// Create a group's storage directory. Idempotent.
    pub async fn create_group_directory(&self, group_id: &str) -> Result<PathBuf> {
        if group_id.is_empty() {
            bail!("Group ID is required");
        }
        let group_dir = self.group_directory(group_id);
        fs::create_dir_all(&group_dir)
            .await
            .with_context(|| format!("Failed to create directory for group {}", group_id))?;
        Ok(group_dir)
    }

    /// Delete a group's storage directory and everything in it.
    pub async fn delete_group_directory(&self, group_id: &str) -> Result<()> {
        if group_id.is_empty() {
            bail!("Group ID is required");
        }
        let group_dir = self.group_directory(group_id);
        if path_exists(&group_dir).await {
            fs::remove_dir_all(&group_dir)
                .await
                .with_context(|| format!("Failed to delete directory for group {}", group_id))?;
            debug!("Deleted directory for group {}", group_id);
        }
        Ok(())
    }

    /// Move a group's storage directory from `old_id` to `new_id`.
    ///
    /// Every file moves into the new directory, and filenames embedding the
    /// old id are rewritten to the new one. When the old directory never
    /// existed (a group that never generated output) this degrades to plain
    /// directory creation.
    pub async fn rename_group_directory(&self, old_id: &str, new_id: &str) -> Result<()> {
        if old_id.is_empty() || new_id.is_empty() {
            bail!("Group ID is required");
        }

        let old_dir = self.group_directory(old_id);
        let new_dir = self.create_group_directory(new_id).await?;

        if !path_exists(&old_dir).await {
            debug!("No existing directory for {}", old_id);
            return Ok(());
        }

        let mut entries = fs::read_dir(&old_dir)
            .await
            .with_context(|| format!("Failed to list directory for group {}", old_id))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("Failed to list directory for group {}", old_id))?
        {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let new_name = file_name.replace(old_id, new_id);
            fs::rename(entry.path(), new_dir.join(&new_name))
                .await
                .with_context(|| {
                    format!("Failed to move {} from {} to {}", file_name, old_id, new_id)
                })?;
        }

        fs::remove_dir_all(&old_dir)
            .await
            .with_context(|| format!("Failed to remove old directory for group {}", old_id))?;
        debug!("Moved files from {} to {}", old_id, new_id);
        Ok(())
    }

    /// Prepend a generation record to a group's history and persist.
    ///
    /// Read-modify-write with no lock: concurrent calls race and the later
    /// write wins, an accepted trade-off for a single-user local tool.
    pub async fn add_generation_to_history(&self, group_id: &str, file_name: &str) -> Result<()> {
        let mut groups = self.read_groups().await?;
        let group = groups
            .iter_mut()
            .find(|g| g.id == group_id)
            .ok_or_else(|| anyhow!("Group not found: {}", group_id))?;

        group.history.insert(
            0,
            HistoryEntry {
                file_name: file_name.to_string(),
                timestamp: Utc::now(),
            },
        );

        self.save_groups(&groups).await
    }
}

async fn path_exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_to_hyphens() {
        assert_eq!(slugify("Content Group 1"), "content-group-1");
        assert_eq!(slugify("  API -- Docs!  "), "api-docs");
        assert_eq!(slugify("Ünicode näme"), "nicode-n-me");
        assert_eq!(slugify("---"), "");
    }

    #[test]
    fn slug_validation() {
        assert!(is_valid_slug("content-group-1"));
        assert!(!is_valid_slug(""));
        assert!(!is_valid_slug("Group"));
        assert!(!is_valid_slug("a/b"));
        assert!(!is_valid_slug("a b"));
    }

    #[test]
    fn dedup_keeps_insertion_order() {
        let mut group = Group::new("Test");
        group.files = vec![
            "b.md".to_string(),
            "a.md".to_string(),
            "b.md".to_string(),
            "a.md".to_string(),
        ];
        group.dedup_files();
        assert_eq!(group.files, vec!["b.md", "a.md"]);
    }

    #[test]
    fn history_entry_uses_camel_case_on_the_wire() {
        let entry = HistoryEntry {
            file_name: "g/g-1.txt".to_string(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"fileName\""));
    }
}
