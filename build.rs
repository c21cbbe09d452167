//! Build script: embeds the git hash and runs toolkit pre-flight checks.
//!
//! whisper-rs-sys compiles whisper.cpp with cmake; GPU features additionally
//! need their vendor toolkit. Missing tools are reported here, before the
//! native build produces a wall of unrelated errors.

use std::process::Command;

/// A native tool that a cargo feature depends on.
struct Toolkit {
    feature: &'static str,
    program: &'static str,
    args: &'static [&'static str],
    install_hint: &'static str,
}

const TOOLKITS: &[Toolkit] = &[
    Toolkit {
        feature: "whisper",
        program: "cmake",
        args: &["--version"],
        install_hint: "sudo apt install cmake",
    },
    Toolkit {
        feature: "cuda",
        program: "nvcc",
        args: &["--version"],
        install_hint: "https://developer.nvidia.com/cuda-downloads",
    },
    Toolkit {
        feature: "vulkan",
        program: "vulkaninfo",
        args: &["--summary"],
        install_hint: "https://vulkan.lunarg.com/",
    },
    Toolkit {
        feature: "hipblas",
        program: "rocminfo",
        args: &[],
        install_hint: "https://rocm.docs.amd.com/",
    },
];

fn main() {
    if let Ok(output) = Command::new("git")
        .args(["rev-parse", "--short=7", "HEAD"])
        .output()
        && output.status.success()
    {
        let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
        println!("cargo:rustc-env=GIT_HASH={}", hash);
    }
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads/");

    for toolkit in TOOLKITS {
        if feature_enabled(toolkit.feature) {
            check_toolkit(toolkit);
        }
    }

    if let Some(version) = feature_enabled("cuda")
        .then(|| Command::new("nvcc").arg("--version").output().ok())
        .flatten()
        .and_then(|out| parse_cuda_version(&String::from_utf8_lossy(&out.stdout)))
    {
        println!("cargo::warning=CUDA toolkit {}.{} detected", version.0, version.1);
    }
}

/// Cargo exposes enabled features to build scripts as `CARGO_FEATURE_<NAME>`.
fn feature_enabled(feature: &str) -> bool {
    let var = format!("CARGO_FEATURE_{}", feature.to_uppercase().replace('-', "_"));
    std::env::var_os(var).is_some()
}

fn check_toolkit(toolkit: &Toolkit) {
    let found = Command::new(toolkit.program)
        .args(toolkit.args)
        .output()
        .is_ok_and(|out| out.status.success());

    if !found {
        panic!(
            "\n\n`{}` not found, required by the `{}` feature.\n\
             Install: {}\n\
             Or build without it: cargo build --release --no-default-features --features cli\n",
            toolkit.program, toolkit.feature, toolkit.install_hint
        );
    }
}

/// Parse "release X.Y" from nvcc --version output.
fn parse_cuda_version(text: &str) -> Option<(u32, u32)> {
    // nvcc output: "Cuda compilation tools, release 12.4, V12.4.131"
    let release_pos = text.find("release ")?;
    let after = &text[release_pos + 8..];
    let comma = after.find(',')?;
    let mut parts = after[..comma].split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cuda_version_standard() {
        let text = "Cuda compilation tools, release 12.4, V12.4.131";
        assert_eq!(parse_cuda_version(text), Some((12, 4)));
    }

    #[test]
    fn parse_cuda_version_no_match() {
        assert_eq!(parse_cuda_version("no version here"), None);
    }
}
