//! Stamps the mixd binary with its build identity
//!
//! Exposes GIT_HASH, BUILD_TIMESTAMP and BUILD_PROFILE to `env!`. Packagers
//! building outside a git checkout can set MIXD_GIT_HASH instead.

use std::process::Command;

const UNKNOWN: &str = "unknown";

fn git_hash() -> String {
    if let Ok(hash) = std::env::var("MIXD_GIT_HASH") {
        if !hash.trim().is_empty() {
            return hash.trim().to_string();
        }
    }

    Command::new("git")
        .args(["rev-parse", "--short=8", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|hash| hash.trim().to_string())
        .filter(|hash| !hash.is_empty())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

fn main() {
    println!("cargo:rerun-if-env-changed=MIXD_GIT_HASH");
    println!("cargo:rerun-if-changed=../.git/HEAD");

    let stamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let profile = std::env::var("PROFILE").unwrap_or_else(|_| UNKNOWN.to_string());

    println!("cargo:rustc-env=GIT_HASH={}", git_hash());
    println!("cargo:rustc-env=BUILD_TIMESTAMP={}", stamp);
    println!("cargo:rustc-env=BUILD_PROFILE={}", profile);
}
