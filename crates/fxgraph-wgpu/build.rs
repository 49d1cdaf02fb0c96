//! Build script for the fxgraph-wgpu crate
//!
//! Compiles every bundled effect with the load-time tooling so that a broken
//! definition fails the build, then generates a table embedding each
//! definition and its program sources into the binary.

use fxgraph_wgpu_build::{CompiledEffect, bundled::BUNDLED_EFFECTS};

/// Converts a path into a Rust string literal
fn path_literal(path: &std::path::Path) -> String {
    format!("{:?}", path.to_str().expect("Non UTF-8 path"))
}

/// Generates the table entry of one bundled effect
fn dump_bundled_effect(id: &str, definition_path: &std::path::Path) -> String {
    let effect = CompiledEffect::from_file(definition_path).unwrap_or_else(|e| panic!("Failed to compile bundled effect {id}: {e}"));
    let dir = definition_path.parent().expect("Definition has no parent directory");

    let mut output = String::new();
    output.push_str("    BundledEffect {\n");
    output.push_str(&format!("        id: {id:?},\n"));
    output.push_str(&format!("        definition: include_str!({}),\n", path_literal(definition_path)));
    output.push_str("        programs: &[\n");
    for program in effect.programs.values() {
        if let Some(error) = &program.compile_error {
            panic!("Program {} of bundled effect {id} does not compile:\n{error}", program.id);
        }
        let source_path = dir.join(&program.file);
        output.push_str(&format!("            ({:?}, include_str!({})),\n", program.file, path_literal(&source_path)));
        println!("cargo:rerun-if-changed={}", source_path.display());
    }
    output.push_str("        ],\n");
    output.push_str("    },\n");

    println!("cargo:rerun-if-changed={}", definition_path.display());
    output
}

/// Generates bundled.rs with one entry per bundled effect
fn write_code() {
    let project_dir = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .and_then(|crates| crates.parent())
        .expect("Failed to locate the workspace root")
        .to_path_buf();

    let mut code = String::new();
    code.push_str("// This file is generated by the build script.\n\n");
    code.push_str("pub const BUNDLED: &[BundledEffect] = &[\n");
    for (id, filepath) in BUNDLED_EFFECTS {
        code.push_str(&dump_bundled_effect(id, &project_dir.join(filepath)));
    }
    code.push_str("];\n");

    let out_dir = std::env::var("OUT_DIR").expect("OUT_DIR not set");
    let output_path = std::path::PathBuf::from(out_dir).join("bundled.rs");
    std::fs::write(output_path, code).expect("Failed to write bundled.rs");
}

fn main() {
    write_code();
}
