// SPDX-License-Identifier: MPL-2.0

use std::process::Command;

fn main() {
    println!("cargo::rerun-if-changed=.git/HEAD");
    println!("cargo::rerun-if-changed=.git/refs/tags");
    println!("cargo::rerun-if-env-changed=DUALCAM_VERSION");

    // Packaged builds have no git checkout and pass the version in
    let version = std::env::var("DUALCAM_VERSION")
        .ok()
        .or_else(git_version)
        .unwrap_or_else(|| std::env::var("CARGO_PKG_VERSION").unwrap_or_default());

    println!("cargo::rustc-env=GIT_VERSION={}", version);
}

/// `0.1.0-abcdef1` on a tag, `0.1.0-dirty-abcdef1` past it
fn git_version() -> Option<String> {
    let describe = git(&["describe", "--tags", "--match", "v*"]);
    let hash = git(&["rev-parse", "--short", "HEAD"])?;

    let Some(describe) = describe else {
        let base = std::env::var("CARGO_PKG_VERSION").unwrap_or_default();
        return Some(format!("{}-{}", base, hash));
    };
    let describe = describe.strip_prefix('v').unwrap_or(&describe);

    // describe past a tag: <tag>-<commits>-g<hash>
    let parts: Vec<&str> = describe.rsplitn(3, '-').collect();
    Some(match parts.as_slice() {
        [_, _, tag] => format!("{}-dirty-{}", tag, hash),
        _ => format!("{}-{}", describe, hash),
    })
}

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
}
