use std::env;
use std::fs;
use std::process;
use std::sync::Arc;

use mpl::executor::Compiler;
use mpl::{midi, Dictionary};

fn usage() -> ! {
    eprintln!("Usage: mpl compile <input.mpl> [output.mid] [--no-midi] [--base-path DIR]");
    process::exit(1);
}

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 || args[1] != "compile" {
        usage();
    }

    let mut input_path: Option<&String> = None;
    let mut output_path: Option<&String> = None;
    let mut no_midi = false;
    let mut base_path: Option<&String> = None;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--no-midi" => no_midi = true,
            "--base-path" => {
                i += 1;
                base_path = args.get(i);
                if base_path.is_none() {
                    eprintln!("--base-path requires a directory argument");
                    process::exit(1);
                }
            }
            _ if input_path.is_none() => input_path = Some(&args[i]),
            _ if output_path.is_none() => output_path = Some(&args[i]),
            other => {
                eprintln!("unrecognized argument '{}'", other);
                usage();
            }
        }
        i += 1;
    }

    let Some(input_path) = input_path else { usage() };

    let source = match fs::read_to_string(input_path) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("Error reading file '{}': {}", input_path, e);
            process::exit(1);
        }
    };

    let mut compiler = Compiler::new(Arc::new(Dictionary::default()));
    if let Some(base) = base_path {
        compiler = compiler.with_base_path(base.as_str());
    }

    let output = match compiler.compile(&source, input_path) {
        Ok(output) => output,
        Err(e) => {
            eprintln!("Compilation error: {}", e);
            process::exit(1);
        }
    };

    for warning in &output.warnings {
        eprintln!("warning: {}:{}: {}", warning.file, warning.line, warning.message);
    }

    if no_midi {
        println!("{:#?}", output.sequence);
        return;
    }

    let bytes = midi::write_smf(&output.sequence);
    match output_path {
        Some(path) => {
            if let Err(e) = fs::write(path, &bytes) {
                eprintln!("Error writing to '{}': {}", path, e);
                process::exit(1);
            }
            eprintln!("Wrote {} bytes to {}", bytes.len(), path);
        }
        None => {
            use std::io::Write;
            if let Err(e) = std::io::stdout().write_all(&bytes) {
                eprintln!("Error writing to stdout: {}", e);
                process::exit(1);
            }
        }
    }
}
