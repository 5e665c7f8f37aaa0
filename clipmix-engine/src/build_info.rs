//! Build provenance stamped by `build.rs`

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfo {
    pub version: &'static str,
    pub git_commit: &'static str,
    /// Tracked files had uncommitted changes at build time
    pub git_dirty: bool,
    pub built_at: &'static str,
    pub profile: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            git_commit: env!("CLIPMIX_GIT_COMMIT"),
            git_dirty: matches!(env!("CLIPMIX_GIT_DIRTY"), "true"),
            built_at: env!("CLIPMIX_BUILT_AT"),
            profile: env!("CLIPMIX_BUILD_PROFILE"),
        }
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (git {}", self.version, self.git_commit)?;
        if self.git_dirty {
            write!(f, "-dirty")?;
        }
        write!(f, ", built {}, {})", self.built_at, self.profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_build() {
        let info = BuildInfo::current();
        assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
        assert!(!info.git_commit.is_empty());
        assert!(!info.profile.is_empty());
    }

    #[test]
    fn test_display_marks_dirty_tree() {
        let info = BuildInfo {
            version: "0.1.0",
            git_commit: "abcd1234",
            git_dirty: true,
            built_at: "2026-01-01T00:00:00Z",
            profile: "debug",
        };
        assert_eq!(info.to_string(), "0.1.0 (git abcd1234-dirty, built 2026-01-01T00:00:00Z, debug)");

        let clean = BuildInfo { git_dirty: false, ..info };
        assert_eq!(clean.to_string(), "0.1.0 (git abcd1234, built 2026-01-01T00:00:00Z, debug)");
    }

    #[test]
    fn test_serializes_camel_case() {
        let json = serde_json::to_value(BuildInfo::current()).unwrap();
        assert!(json.get("gitCommit").is_some());
        assert!(json.get("builtAt").is_some());
    }
}
