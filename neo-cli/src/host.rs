//! Building and running the generated C against the runtime.

use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use anyhow::{Context, Result, bail};
use neo_core::runtime::{LINK_LIBRARIES, RuntimeLayout};
use tracing::{debug, info};

/// Executable written next to the generated C file.
pub fn binary_path(c_path: &Path) -> PathBuf {
    let binary = c_path.with_extension("");
    if binary.parent().is_some_and(|parent| parent.as_os_str().is_empty()) {
        Path::new(".").join(binary)
    } else {
        binary
    }
}

/// `cc <out.c> -I<include> <runtime sources> -l... -o <bin>`
pub fn compile_command(cc: &str, layout: &RuntimeLayout, c_path: &Path, binary: &Path) -> Command {
    let mut command = Command::new(cc);
    command
        .arg(c_path)
        .arg(format!("-I{}", layout.include_dir.display()))
        .args(&layout.sources);
    for library in LINK_LIBRARIES {
        command.arg(format!("-l{library}"));
    }
    command.arg("-o").arg(binary);
    command
}

pub fn compile(cc: &str, layout: &RuntimeLayout, c_path: &Path, binary: &Path) -> Result<()> {
    let mut command = compile_command(cc, layout, c_path, binary);
    debug!(?command, "invoking host compiler");
    let output = command
        .output()
        .with_context(|| format!("failed to run C compiler `{cc}`"))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("C compilation failed: {stderr}");
    }
    info!(binary = %binary.display(), "built executable");
    Ok(())
}

/// Run the built program with inherited stdio.
pub fn run(binary: &Path) -> Result<ExitStatus> {
    Command::new(binary)
        .status()
        .with_context(|| format!("failed to run {}", binary.display()))
}
