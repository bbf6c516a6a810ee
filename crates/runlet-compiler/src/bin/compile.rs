// Copyright (C) 2025 The runlet Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Function compiler CLI
//!
//! Compiles a function source file to an instrumented artifact.
//!
//! Usage:
//!
//! ```text
//! runlet-compile --source <path> [--env <dev|test|prod>] [--output <path>] [--json]
//! ```
//!
//! Example:
//!
//! ```text
//! runlet-compile --source handler.js --env prod --output ./handler.min.js
//! ```

use runlet_compiler::{CompileEnvironment, CompileOptions, Compiler};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

fn print_usage() {
    eprintln!(
        r#"Usage: runlet-compile [OPTIONS]

Compile a function source file to an instrumented artifact.

OPTIONS:
    --source <path>      Path to function source (required)
    --env <name>         Preset: dev, test or prod (default: dev)
    --minify             Force minification on
    --strip-comments     Force comment removal on
    --strip-console      Force console.log stripping on
    --no-tracing         Disable tracing injection
    --no-gas             Disable gas tracking injection
    --output <path>      Write the artifact here (default: stdout)
    --json               Print the full compilation result as JSON
    --help               Show this help message

ENVIRONMENT:
    RUST_LOG             Log filter for diagnostics on stderr (default: warn)

EXAMPLES:
    # Production build to a file
    runlet-compile --source handler.js --env prod --output ./handler.min.js

    # Inspect pass warnings
    runlet-compile --source handler.js --json
"#
    );
}

struct Args {
    source_path: PathBuf,
    options: CompileOptions,
    output_path: Option<PathBuf>,
    json: bool,
}

fn parse_args() -> Result<Args, String> {
    let args: Vec<String> = std::env::args().collect();

    let mut source_path: Option<PathBuf> = None;
    let mut environment = CompileEnvironment::Dev;
    let mut minify = false;
    let mut strip_comments = false;
    let mut strip_console = false;
    let mut no_tracing = false;
    let mut no_gas = false;
    let mut output_path: Option<PathBuf> = None;
    let mut json = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--source" => {
                i += 1;
                if i >= args.len() {
                    return Err("--source requires a path".to_string());
                }
                source_path = Some(PathBuf::from(&args[i]));
            }
            "--env" => {
                i += 1;
                if i >= args.len() {
                    return Err("--env requires a name".to_string());
                }
                environment = args[i].parse()?;
            }
            "--output" => {
                i += 1;
                if i >= args.len() {
                    return Err("--output requires a path".to_string());
                }
                output_path = Some(PathBuf::from(&args[i]));
            }
            "--minify" => minify = true,
            "--strip-comments" => strip_comments = true,
            "--strip-console" => strip_console = true,
            "--no-tracing" => no_tracing = true,
            "--no-gas" => no_gas = true,
            "--json" => json = true,
            arg => {
                return Err(format!("Unknown argument: {}", arg));
            }
        }
        i += 1;
    }

    let source_path = source_path.ok_or("--source is required")?;

    let mut options = CompileOptions::for_environment(environment);
    options.minify |= minify;
    options.remove_comments |= strip_comments;
    options.strip_console_log |= strip_console;
    options.inject_tracing &= !no_tracing;
    options.inject_gas_tracking &= !no_gas;

    Ok(Args {
        source_path,
        options,
        output_path,
        json,
    })
}

fn main() -> ExitCode {
    // Initialize minimal logging (default to warn if RUST_LOG not set)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(io::stderr)
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    let source = match fs::read_to_string(&args.source_path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error reading source file {:?}: {}", args.source_path, e);
            return ExitCode::FAILURE;
        }
    };

    eprintln!(
        "Compiling {:?} with options: {}",
        args.source_path,
        args.options.fingerprint()
    );

    let compiler = Compiler::new();
    let result = match compiler.compile(&source, Some(&args.options)) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Compilation failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    for warning in &result.warnings {
        eprintln!("Warning: {}", warning);
    }
    for error in &result.errors {
        eprintln!("Error: {}", error);
    }
    eprintln!("Compilation finished:");
    eprintln!("  Size: {} -> {} bytes", source.len(), result.compiled_code.len());
    eprintln!("  Hash: {}", result.code_hash);

    let rendered = if args.json {
        match serde_json::to_string_pretty(result.as_ref()) {
            Ok(json) => json,
            Err(e) => {
                eprintln!("Error serializing result: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        result.compiled_code.clone()
    };

    match args.output_path {
        Some(output_path) => {
            if let Err(e) = fs::write(&output_path, rendered) {
                eprintln!("Error writing output to {:?}: {}", output_path, e);
                return ExitCode::FAILURE;
            }
            // Print final path to stdout for scripts to capture
            println!("{}", output_path.display());
        }
        None => println!("{}", rendered),
    }

    ExitCode::SUCCESS
}
