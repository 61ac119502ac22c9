//! Cache roles and their versioned cache names.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical cache bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheRole {
    /// Font files from the static font CDN.
    GoogleFont,
    /// Font stylesheets from the font API.
    GoogleFontStyles,
    /// Navigated pages.
    Pages,
    /// Scripts, styles, and worker scripts.
    Assets,
    /// Documents.
    Documents,
    /// Images.
    Images,
    /// A role no route ever writes to. Listed by cache reports.
    #[serde(rename = "out-of-this-world")]
    Unknown,
}

impl CacheRole {
    /// Roles that back a runtime route or message.
    pub const REGISTERED: [CacheRole; 6] = [
        CacheRole::GoogleFont,
        CacheRole::GoogleFontStyles,
        CacheRole::Pages,
        CacheRole::Assets,
        CacheRole::Documents,
        CacheRole::Images,
    ];

    /// Every role, including `Unknown`.
    pub const ALL: [CacheRole; 7] = [
        CacheRole::GoogleFont,
        CacheRole::GoogleFontStyles,
        CacheRole::Pages,
        CacheRole::Assets,
        CacheRole::Documents,
        CacheRole::Images,
        CacheRole::Unknown,
    ];

    /// The role segment of the cache name.
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheRole::GoogleFont => "google-font",
            CacheRole::GoogleFontStyles => "google-font-styles",
            CacheRole::Pages => "pages",
            CacheRole::Assets => "assets",
            CacheRole::Documents => "documents",
            CacheRole::Images => "images",
            CacheRole::Unknown => "out-of-this-world",
        }
    }
}

impl fmt::Display for CacheRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps roles to `{prefix}-{role}-{version}` cache names.
///
/// Bumping the version orphans every name produced by the previous one;
/// see [`CacheRegistry::is_orphaned`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRegistry {
    prefix: String,
    version: String,
}

impl CacheRegistry {
    /// Create a registry.
    pub fn new(prefix: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            version: version.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Cache name for a role.
    pub fn name(&self, role: CacheRole) -> String {
        format!("{}-{}-{}", self.prefix, role, self.version)
    }

    /// Cache name holding the precache manifest.
    pub fn precache_name(&self) -> String {
        format!("{}-precache-{}", self.prefix, self.version)
    }

    /// Names of every registered role for this version.
    pub fn names(&self) -> Vec<String> {
        CacheRole::REGISTERED
            .iter()
            .map(|role| self.name(*role))
            .collect()
    }

    /// Whether a cache name is one this version writes to.
    pub fn is_current(&self, name: &str) -> bool {
        name == self.precache_name() || CacheRole::ALL.iter().any(|r| self.name(*r) == name)
    }

    /// A cache carrying our prefix that this version no longer uses.
    pub fn is_orphaned(&self, name: &str) -> bool {
        name.starts_with(&format!("{}-", self.prefix)) && !self.is_current(name)
    }

    /// A precache cache left behind by another version.
    pub fn is_outdated_precache(&self, name: &str) -> bool {
        name.starts_with(&format!("{}-precache-", self.prefix)) && name != self.precache_name()
    }
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self::new("obi-wan", "v1")
    }
}
