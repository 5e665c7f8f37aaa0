//! Embeds build provenance for `clipmix_engine::BuildInfo`

use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    Some(text.trim().to_string())
}

fn main() {
    let commit = git(&["rev-parse", "--short=8", "HEAD"]).unwrap_or_else(|| "unknown".into());
    let dirty = git(&["status", "--porcelain", "--untracked-files=no"]).is_some_and(|s| !s.is_empty());
    let built_at = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let profile = std::env::var("PROFILE").unwrap_or_else(|_| "unknown".into());

    println!("cargo:rustc-env=CLIPMIX_GIT_COMMIT={}", commit);
    println!("cargo:rustc-env=CLIPMIX_GIT_DIRTY={}", dirty);
    println!("cargo:rustc-env=CLIPMIX_BUILT_AT={}", built_at);
    println!("cargo:rustc-env=CLIPMIX_BUILD_PROFILE={}", profile);
}
