// Build script to bake the overlay shaders into SPIR-V
//
// The baked words are embedded with include_bytes! from OUT_DIR. When glslc
// is not installed an empty file is written instead and the layer expects the
// shader paths to be supplied through overlay.toml.

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=shaders/");

    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));

    // Compile shaders using glslc (part of Vulkan SDK)
    compile_shader("shaders/overlay.vert", &out_dir.join("overlay.vert.spv"));
    compile_shader("shaders/overlay.frag", &out_dir.join("overlay.frag.spv"));
}

fn compile_shader(input: &str, output: &Path) {
    let input_path = Path::new(input);

    // Check if glslc is available
    let result = Command::new("glslc")
        .arg(input_path)
        .arg("-o")
        .arg(output)
        .status();

    match result {
        Ok(status) if status.success() => {
            println!("Compiled {} -> {}", input, output.display());
        }
        Ok(status) => {
            panic!("Failed to compile {}: exit code {:?}", input, status.code());
        }
        Err(e) => {
            println!("cargo:warning=glslc not found ({}), {} is not baked", e, input);
            println!(
                "cargo:warning=Compile it manually and point [shaders] in overlay.toml at it: glslc {} -o overlay.spv",
                input
            );
            std::fs::write(output, []).expect("OUT_DIR is writable");
        }
    }
}
