//! Bundled effect check
//!
//! Compiles every bundled effect and writes a JSON summary of each resolved
//! pass graph. Exits non-zero when any effect fails to compile.

use fxgraph_wgpu_build::{CompiledEffect, bundled::BUNDLED_EFFECTS, graph::PassGraph};
use serde::Serialize;
use std::{collections::BTreeMap, env, fs, path::Path, process};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EffectSummary<'a> {
    name: &'a str,
    description: Option<&'a str>,
    params: Vec<&'a str>,
    programs: BTreeMap<&'a str, Option<&'a str>>,
    graph: &'a PassGraph,
}

impl<'a> EffectSummary<'a> {
    fn new(effect: &'a CompiledEffect) -> Self {
        Self {
            name: &effect.definition.name,
            description: effect.definition.description.as_deref(),
            params: effect.definition.globals.keys().map(String::as_str).collect(),
            programs: effect.programs.iter().map(|(id, program)| (id.as_str(), program.compile_error.as_deref())).collect(),
            graph: &effect.graph,
        }
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() != 3 {
        eprintln!("Usage: {} <project_root> <output_file>", args[0]);
        eprintln!("Compiles all bundled effects and dumps a summary to a JSON file");
        eprintln!("  project_root: Path to the fxgraph workspace root");
        eprintln!("  output_file:  Path to the output JSON file");
        process::exit(1);
    }

    let project_root = Path::new(&args[1]);
    let output_file = &args[2];

    if !project_root.exists() {
        eprintln!("Error: Project root '{}' does not exist", project_root.display());
        process::exit(1);
    }

    let mut effects = BTreeMap::new();
    let mut failed = 0;
    for (id, path) in BUNDLED_EFFECTS {
        println!("Processing effect: {id} ({path})");
        match CompiledEffect::from_file(project_root.join(path)) {
            Ok(effect) => {
                for (program, error) in effect.programs.iter().filter_map(|(id, p)| p.compile_error.as_ref().map(|e| (id, e))) {
                    eprintln!("Warning: program '{program}' of '{id}' does not compile:\n{error}");
                }
                effects.insert(*id, effect);
            }
            Err(e) => {
                eprintln!("Error: Failed to load effect '{id}': {e}");
                failed += 1;
            }
        }
    }

    let summaries: BTreeMap<&str, EffectSummary> = effects.iter().map(|(id, effect)| (*id, EffectSummary::new(effect))).collect();
    match serde_json::to_string_pretty(&summaries) {
        Ok(json) => {
            if let Err(e) = fs::write(output_file, json) {
                eprintln!("Error writing output file '{output_file}': {e}");
                process::exit(1);
            }
            println!("Successfully wrote {} effects to '{}'", summaries.len(), output_file);
        }
        Err(e) => {
            eprintln!("Error serializing effects to JSON: {e}");
            process::exit(1);
        }
    }

    if failed > 0 {
        process::exit(1);
    }
}
