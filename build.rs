//! Renders `hostdrive.1` and one `hostdrive-<subcommand>.1` page per
//! subcommand into `OUT_DIR` with clap-mangen.

use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{Command, CommandFactory};
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

use cli::Cli;

fn render(command: Command, out_dir: &Path, page: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut buffer = Vec::new();
    Man::new(command).title(page).render(&mut buffer)?;
    fs::write(out_dir.join(format!("{page}.1")), buffer)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = std::io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir = PathBuf::from(env::var_os("OUT_DIR").ok_or("OUT_DIR was not set")?);
    let command = Cli::command();
    let name = command.get_name().to_owned();
    for subcommand in command.get_subcommands() {
        let page = format!("{name}-{}", subcommand.get_name());
        render(subcommand.clone(), &out_dir, &page)?;
    }
    render(command, &out_dir, &name)
}
