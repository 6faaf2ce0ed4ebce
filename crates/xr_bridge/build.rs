// build.rs
// Build script for compositor shader compilation

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

fn main() {
    // Tell cargo to rerun this build script if any shader files change
    println!("cargo:rerun-if-changed=shaders");
    println!("cargo:rerun-if-env-changed=VULKAN_SDK");
    println!("cargo:rerun-if-env-changed=SKIP_SHADERS");

    // Only the Vulkan backend consumes SPIR-V
    if env::var_os("CARGO_FEATURE_VULKAN").is_none() {
        return;
    }

    if env::var("SKIP_SHADERS").is_ok() {
        eprintln!("info: Skipping shader compilation (SKIP_SHADERS set)");
        return;
    }

    let Ok(vulkan_sdk) = env::var("VULKAN_SDK") else {
        eprintln!("warning: VULKAN_SDK not set, shader compilation skipped");
        eprintln!("hint: Install Vulkan SDK and set VULKAN_SDK environment variable");
        return;
    };

    let glslc = if cfg!(target_os = "windows") {
        format!("{vulkan_sdk}\\Bin\\glslc.exe")
    } else {
        format!("{vulkan_sdk}/bin/glslc")
    };

    if !Path::new(&glslc).exists() {
        eprintln!("error: glslc not found at: {glslc}");
        eprintln!("hint: Ensure Vulkan SDK is properly installed");
        panic!("Shader compiler not found");
    }

    let shader_dir = PathBuf::from("shaders");
    let target_dir = PathBuf::from("../../target/shaders");

    if let Err(e) = std::fs::create_dir_all(&target_dir) {
        eprintln!("warning: Failed to create target directory: {e}");
        return;
    }

    let shader_files = match std::fs::read_dir(&shader_dir) {
        Ok(files) => files,
        Err(_) => {
            eprintln!("info: No shader directory found at: {shader_dir:?}");
            return;
        }
    };

    let mut compiled_count = 0;
    for entry in shader_files.flatten() {
        let path = entry.path();
        let Some(ext) = path.extension() else { continue };
        if ext != "vert" && ext != "frag" {
            continue;
        }
        let Some(stem) = path.file_stem() else { continue };
        let out_file = target_dir.join(stem).with_extension("spv");

        let needs_compile = match (
            std::fs::metadata(&path).and_then(|m| m.modified()),
            std::fs::metadata(&out_file).and_then(|m| m.modified()),
        ) {
            (Ok(src), Ok(dst)) => src > dst,
            _ => true,
        };
        if !needs_compile {
            continue;
        }

        let status = Command::new(&glslc).arg(&path).arg("-o").arg(&out_file).status();
        match status {
            Ok(s) if s.success() => {
                eprintln!("info: Compiled {path:?} -> {out_file:?}");
                compiled_count += 1;
            }
            Ok(s) => {
                eprintln!("error: glslc failed for {path:?} with exit code: {}", s.code().unwrap_or(-1));
                panic!("Shader compilation failed");
            }
            Err(e) => {
                eprintln!("error: Failed to run glslc for {path:?}: {e}");
                panic!("Failed to execute shader compiler");
            }
        }
    }

    if compiled_count > 0 {
        eprintln!("info: Successfully compiled {compiled_count} shader(s)");
    }
}
