//! Build script for the native test fixtures
//!
//! Compiles the C sources under `native/` into shared libraries with the host C
//! compiler and exports their paths to the test suite. A missing compiler is not
//! fatal: the environment variables are simply not set and the native tests skip.

use std::env;
use std::path::{Path, PathBuf};

const FIXTURES: &[(&str, &str)] = &[("arith", "NCK_ARITH_LIB"), ("strings", "NCK_STRINGS_LIB")];

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_else(|_| "linux".to_string());

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=native/");

    for (name, env_key) in FIXTURES {
        let source = PathBuf::from("native").join(format!("{}.c", name));
        let output = out_dir.join(shared_library_name(name, &target_os));

        match compile_shared(&source, &output) {
            Ok(()) => println!("cargo:rustc-env={}={}", env_key, output.display()),
            Err(reason) => println!(
                "cargo:warning=Skipping native fixture '{}': {}",
                name, reason
            ),
        }
    }
}

/// Compile one C file into a position-independent shared library
fn compile_shared(source: &Path, output: &Path) -> Result<(), String> {
    let compiler = cc::Build::new()
        .pic(true)
        .opt_level(1)
        .warnings(true)
        .try_get_compiler()
        .map_err(|e| format!("no C compiler: {}", e))?;

    if compiler.is_like_msvc() {
        return Err("MSVC shared fixtures are not supported".to_string());
    }

    let status = compiler
        .to_command()
        .arg("-shared")
        .arg("-o")
        .arg(output)
        .arg(source)
        .status()
        .map_err(|e| format!("failed to spawn compiler: {}", e))?;

    if status.success() {
        Ok(())
    } else {
        Err(format!("compiler exited with {}", status))
    }
}

/// Construct the platform-specific library filename
fn shared_library_name(name: &str, target_os: &str) -> String {
    match target_os {
        "macos" | "ios" => format!("lib{}.dylib", name),
        "windows" => format!("{}.dll", name),
        _ => format!("lib{}.so", name),
    }
}
