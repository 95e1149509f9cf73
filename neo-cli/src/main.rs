use std::fs;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::Parser;
use neo_core::compile_c;
use neo_core::runtime::{RuntimeLayout, default_runtime_root};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod host;

/// Compile a Neo program to C, build it against the runtime and run it.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Neo source file
    file: PathBuf,

    #[arg(
        short,
        long,
        value_name = "PATH",
        default_value = "output/main.c",
        help = "Path of the generated C file; the executable is written next to it"
    )]
    output: PathBuf,

    #[arg(
        long,
        value_name = "DIR",
        help = "Runtime root containing include/neo.h and the runtime sources"
    )]
    runtime: Option<PathBuf>,

    #[arg(long, value_name = "CC", default_value = "cc", help = "Host C compiler")]
    cc: String,

    #[arg(long, help = "Stop after writing the C file")]
    emit_only: bool,
}

fn main() -> ExitCode {
    install_tracing();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    match execute(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn install_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn execute(cli: Cli) -> Result<ExitCode> {
    let source = fs::read_to_string(&cli.file)
        .with_context(|| format!("failed to read input file {}", cli.file.display()))?;

    // Resolve the runtime before writing anything so a bad root leaves no
    // half-built output behind.
    let layout = if cli.emit_only {
        None
    } else {
        let root = cli.runtime.clone().unwrap_or_else(default_runtime_root);
        Some(RuntimeLayout::discover(&root)?)
    };

    let artifact = match compile_c(&source) {
        Ok(artifact) => artifact,
        Err(err) => {
            let Some(diagnostic) = err.diagnostic() else {
                return Err(err.into());
            };
            let filename = cli.file.display().to_string();
            let color = io::stderr().is_terminal();
            eprint!("{}", diagnostic.render(&source, &filename, color));
            return Ok(ExitCode::FAILURE);
        }
    };

    write_output(&cli.output, &artifact.c_source)?;
    info!(output = %cli.output.display(), functions = artifact.functions.len(), "wrote C source");

    let Some(layout) = layout else {
        return Ok(ExitCode::SUCCESS);
    };
    let binary = host::binary_path(&cli.output);
    host::compile(&cli.cc, &layout, &cli.output, &binary)?;
    let status = host::run(&binary)?;
    if !status.success() {
        bail!("program exited with {status}");
    }
    Ok(ExitCode::SUCCESS)
}

fn write_output(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {parent:?}"))?;
        }
    }
    fs::write(path, contents)
        .with_context(|| format!("failed to write output file {}", path.display()))?;
    Ok(())
}
