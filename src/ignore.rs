//! Ignore-pattern matching for scans and watch events.
//!
//! A single compiled matcher decides whether a path takes part in scanning,
//! watching, and selection. Built-in defaults are always active and are
//! unioned with user-supplied patterns from the resolved configuration.

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::warn;

/// Patterns that are always ignored, independent of user configuration.
/// Bare names expand to match at any depth, directories included.
pub const DEFAULT_IGNORE: &[&str] = &[
    "node_modules",
    ".git",
    "dist",
    "build",
    "coverage",
    ".env*",
    "*.log",
];

/// Compiled ignore-rule set. Pure matcher, no state beyond the compiled globs.
#[derive(Debug, Clone)]
pub struct IgnoreMatcher {
    set: GlobSet,
}

impl IgnoreMatcher {
    /// Compile the built-in defaults plus `user_patterns` into one matcher.
    ///
    /// A malformed pattern is reported as a warning and skipped; it must not
    /// abort matching for the other patterns.
    pub fn new(user_patterns: &[String]) -> Self {
        let mut builder = GlobSetBuilder::new();

        let patterns = DEFAULT_IGNORE
            .iter()
            .map(|p| p.to_string())
            .chain(user_patterns.iter().cloned());

        for pattern in patterns {
            for expanded in expand_pattern(&pattern) {
                match Glob::new(&expanded) {
                    Ok(glob) => {
                        builder.add(glob);
                    }
                    Err(err) => {
                        warn!("Invalid ignore pattern '{}': {}", pattern, err);
                    }
                }
            }
        }

        let set = match builder.build() {
            Ok(set) => set,
            Err(err) => {
                warn!("Failed to build ignore set, ignoring nothing: {}", err);
                GlobSet::empty()
            }
        };

        Self { set }
    }

    /// True if `rel_path` (forward-slash, relative to the watch root) matches
    /// any ignore rule. Paths with a dot-leading segment are ignored by
    /// default even without an explicit pattern.
    pub fn is_ignored(&self, rel_path: &str) -> bool {
        if rel_path.is_empty() {
            return false;
        }

        if rel_path
            .split('/')
            .any(|segment| segment.starts_with('.') && segment.len() > 1)
        {
            return true;
        }

        self.set.is_match(rel_path)
    }
}

/// Expand a bare-name pattern so it matches at any depth.
///
/// `node_modules` from a config file is meant as "ignore every node_modules
/// anywhere": the name itself (prunes the directory before descent), plus
/// `**/node_modules` and `**/node_modules/**` for nested paths. Patterns
/// that already contain a separator are kept verbatim.
fn expand_pattern(pattern: &str) -> Vec<String> {
    if pattern.contains('/') {
        return vec![pattern.to_string()];
    }
    vec![
        pattern.to_string(),
        format!("**/{}", pattern),
        format!("**/{}/**", pattern),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(user: &[&str]) -> IgnoreMatcher {
        let patterns: Vec<String> = user.iter().map(|s| s.to_string()).collect();
        IgnoreMatcher::new(&patterns)
    }

    #[test]
    fn default_patterns_match_at_any_depth() {
        let m = matcher(&[]);
        assert!(m.is_ignored("node_modules/react/index.js"));
        assert!(m.is_ignored("packages/app/node_modules/left-pad/index.js"));
        assert!(m.is_ignored("dist/bundle.js"));
        assert!(m.is_ignored("server/debug.log"));
        assert!(!m.is_ignored("src/index.js"));
        assert!(!m.is_ignored("README.md"));
    }

    #[test]
    fn dot_segments_are_ignored_by_default() {
        let m = matcher(&[]);
        assert!(m.is_ignored(".git/HEAD"));
        assert!(m.is_ignored(".env.local"));
        assert!(m.is_ignored("config/.secrets/key.pem"));
        assert!(!m.is_ignored("notes.md"));
    }

    #[test]
    fn bare_user_patterns_match_at_any_depth() {
        let m = matcher(&["scratch", "*.tmp"]);
        assert!(m.is_ignored("scratch"));
        assert!(m.is_ignored("deep/scratch/file.txt"));
        assert!(m.is_ignored("a/b/notes.tmp"));
        assert!(!m.is_ignored("scratchpad.md"));
    }

    #[test]
    fn character_classes_are_supported() {
        let m = matcher(&["chapter-[0-9].md"]);
        assert!(m.is_ignored("chapter-3.md"));
        assert!(m.is_ignored("docs/chapter-7.md"));
        assert!(!m.is_ignored("chapter-x.md"));
    }

    #[test]
    fn malformed_pattern_does_not_poison_the_rest() {
        let m = matcher(&["[unclosed", "*.tmp"]);
        assert!(m.is_ignored("junk.tmp"));
        assert!(!m.is_ignored("src/lib.rs"));
    }
}
