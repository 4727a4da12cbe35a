use std::process::Command;

/// Output of `git <args>` run at the workspace root, if git is available and succeeds.
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").current_dir("..").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}

fn main() {
    // exported to ProtocolVersion for diagnosing mismatched worker deployments
    let exports = [
        (
            "RSTAGE_GIT_DESCRIBE",
            git(&["describe", "--tags", "--long", "--always", "--dirty"]),
        ),
        ("RSTAGE_GIT_HASH", git(&["rev-parse", "HEAD"])),
    ];
    for (var, value) in exports {
        if let Some(value) = value {
            println!("cargo:rustc-env={var}={value}");
        }
    }
    let git_dir = std::path::Path::new("..").join(".git");
    if git_dir.exists() {
        println!("cargo:rerun-if-changed=../.git/HEAD");
        println!("cargo:rerun-if-changed=../.git/refs");
    }
}
