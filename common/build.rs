// Stamps the crate version with the short git commit hash so every binary
// reports exactly which build ran the bootstrap.

use std::process::Command;

fn main() {
    let commit_hash = match option_env!("DEVNET_COMMIT_HASH") {
        Some(hash) => hash.chars().take(7).collect::<String>(),
        None => match Command::new("git")
            .args(["rev-parse", "--short", "HEAD"])
            .output()
        {
            Ok(output) if output.status.success() => {
                String::from_utf8_lossy(&output.stdout).trim().to_string()
            }
            // Building from a source archive
            _ => "unknown".to_string(),
        },
    };

    let build_version = format!("{}-{}", env!("CARGO_PKG_VERSION"), commit_hash);
    println!("cargo:rerun-if-env-changed=DEVNET_COMMIT_HASH");
    println!("cargo:rustc-env=BUILD_VERSION={build_version}");
}
