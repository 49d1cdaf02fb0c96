//! Effect analysis tool
//!
//! Loads an effect definition, resolves its pass graph and loads its programs,
//! then dumps the compiled result to stdout.

use fxgraph_wgpu_build::load_effect_file;
use std::env;
use std::path::Path;
use std::process;

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() != 2 && args.len() != 3 {
        eprintln!("Usage: {} <definition.yaml|definition.json> [--graph]", args[0]);
        eprintln!("Compiles an effect definition and dumps the result to stdout");
        eprintln!("  --graph: Print only the resolved pass graph");
        process::exit(1);
    }

    let definition_path = &args[1];
    let graph_only = args.get(2).is_some_and(|arg| arg == "--graph");

    if !Path::new(definition_path).exists() {
        eprintln!("Error: Definition file '{definition_path}' does not exist");
        process::exit(1);
    }

    match load_effect_file(definition_path) {
        Ok(effect) if graph_only => println!("{:#?}", effect.graph),
        Ok(effect) => {
            println!("{:#?}", effect.graph);
            for program in effect.programs.values() {
                println!("program {} ({})", program.id, program.file);
                match (&program.interface, &program.compile_error) {
                    (Some(interface), _) => println!("{interface:#?}"),
                    (None, Some(error)) => println!("  does not compile:\n{error}"),
                    (None, None) => {}
                }
            }
        }
        Err(e) => {
            eprintln!("Error compiling effect '{definition_path}': {e}");
            process::exit(1);
        }
    }
}
