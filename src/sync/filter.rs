//! File filtering from explicit allow/deny settings.
//!
//! No gitignore semantics here: the policy is a pure lookup over the
//! parsed settings, passed explicitly into the synchronizer and watcher.

use std::collections::HashSet;

use crate::config::FilterSettings;
use crate::storage::extension_of;

/// Parsed filter policy.
#[derive(Debug, Clone, Default)]
pub struct FilterPolicy {
    blocked_folders: HashSet<String>,
    blocked_extensions: HashSet<String>,
    allowed_extensions: HashSet<String>,
    blocked_file_names: HashSet<String>,
}

/// Split a comma-separated setting into a lowercase set.
fn parse_list(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.trim_start_matches('.').to_lowercase())
        .collect()
}

impl FilterPolicy {
    /// Parse raw comma-separated settings into a policy.
    #[must_use]
    pub fn from_settings(settings: &FilterSettings) -> Self {
        Self {
            blocked_folders: settings
                .blocked_folders
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_lowercase)
                .collect(),
            blocked_extensions: parse_list(&settings.blocked_extensions),
            allowed_extensions: parse_list(&settings.allowed_extensions),
            blocked_file_names: settings
                .blocked_file_names
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_lowercase)
                .collect(),
        }
    }

    /// Whether a directory name prunes its entire subtree.
    #[must_use]
    pub fn is_folder_blocked(&self, name: &str) -> bool {
        self.blocked_folders.contains(&name.to_lowercase())
    }

    /// Whether a file passes the policy.
    ///
    /// A file is rejected when its name is blocked, its extension is
    /// blocked, or a non-empty allow-list does not contain its
    /// extension. An empty allow-list means "allow anything not blocked".
    #[must_use]
    pub fn allows_file(&self, file_name: &str) -> bool {
        if self.blocked_file_names.contains(&file_name.to_lowercase()) {
            return false;
        }

        let extension = extension_of(file_name);

        if let Some(ref ext) = extension {
            if self.blocked_extensions.contains(ext) {
                return false;
            }
        }

        if self.allowed_extensions.is_empty() {
            return true;
        }

        extension.is_some_and(|ext| self.allowed_extensions.contains(&ext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(
        folders: &str,
        blocked_ext: &str,
        allowed_ext: &str,
        names: &str,
    ) -> FilterPolicy {
        FilterPolicy::from_settings(&FilterSettings {
            blocked_folders: folders.to_string(),
            blocked_extensions: blocked_ext.to_string(),
            allowed_extensions: allowed_ext.to_string(),
            blocked_file_names: names.to_string(),
        })
    }

    #[test]
    fn test_blocked_folders() {
        let p = policy(".git, node_modules ,target", "", "", "");
        assert!(p.is_folder_blocked(".git"));
        assert!(p.is_folder_blocked("node_modules"));
        assert!(p.is_folder_blocked("Target"));
        assert!(!p.is_folder_blocked("src"));
    }

    #[test]
    fn test_blocked_extensions() {
        let p = policy("", "key,.pem", "", "");
        assert!(!p.allows_file("secrets.key"));
        assert!(!p.allows_file("cert.PEM"));
        assert!(p.allows_file("Program.cs"));
    }

    #[test]
    fn test_allow_list() {
        let p = policy("", "", "cs,txt", "");
        assert!(p.allows_file("Program.cs"));
        assert!(p.allows_file("notes.txt"));
        assert!(!p.allows_file("image.png"));
        assert!(!p.allows_file("Makefile"));
    }

    #[test]
    fn test_empty_allow_list_allows_anything_not_blocked() {
        let p = policy("", "key", "", "");
        assert!(p.allows_file("whatever.xyz"));
        assert!(p.allows_file("Makefile"));
        assert!(!p.allows_file("a.key"));
    }

    #[test]
    fn test_blocked_file_names() {
        let p = policy("", "", "", ".env,secrets.json");
        assert!(!p.allows_file(".env"));
        assert!(!p.allows_file("Secrets.JSON"));
        assert!(p.allows_file("settings.json"));
    }

    #[test]
    fn test_blocked_extension_wins_over_allow_list() {
        let p = policy("", "cs", "cs", "");
        assert!(!p.allows_file("Program.cs"));
    }

    #[test]
    fn test_default_settings_parse() {
        let p = FilterPolicy::from_settings(&FilterSettings::default());
        assert!(p.is_folder_blocked(".git"));
        assert!(!p.allows_file("secrets.key"));
        assert!(p.allows_file("Program.cs"));
    }
}
