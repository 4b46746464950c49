//! Command-line inspection of AppImage payloads.

mod logger;

use crate::logger::StderrLogger;
use appimage_payload::{AppImage, EntryKind, compute_archive_offset};
use appimage_squashfs::Archive;
use clap::{ArgAction, Parser, Subcommand};
use log::info;
use std::error::Error as _;
use std::fs;
use std::io::{self, Write};
use std::num::ParseIntError;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "appimage-peek", version, about = "Inspect the SquashFS payload of AppImage files")]
struct Cli {
    /// Payload offset to use instead of computing it from the ELF headers
    /// (decimal or 0x-prefixed hex).
    #[arg(long, global = true, value_name = "N", value_parser = parse_offset)]
    offset: Option<u64>,

    /// Increase log output (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the byte offset of the payload.
    Offset { file: PathBuf },
    /// List a directory inside the payload.
    Ls {
        file: PathBuf,
        #[arg(default_value = "/")]
        path: String,
    },
    /// Write a file from the payload to stdout.
    Cat { file: PathBuf, path: String },
    /// Print the desktop entry at the payload root.
    Desktop { file: PathBuf },
    /// Save the `.DirIcon` of the payload to OUT.
    Icon { file: PathBuf, out: PathBuf },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Payload(#[from] appimage_payload::Error),
    #[error("failed to write {}", path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write to stdout")]
    Stdout(#[source] io::Error),
}

impl From<appimage_squashfs::Error> for CliError {
    fn from(value: appimage_squashfs::Error) -> Self {
        Self::Payload(value.into())
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = StderrLogger::from_verbosity(cli.verbose).init() {
        eprintln!("warning: {e}");
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            let mut source = e.source();
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    match cli.command {
        Command::Offset { file } => {
            let offset = payload_offset(&file, cli.offset)?;
            writeln!(stdout, "{offset}").map_err(CliError::Stdout)?;
        }
        Command::Ls { file, path } => {
            let offset = payload_offset(&file, cli.offset)?;
            let mut archive = Archive::open(&file, offset)?;
            for entry in archive.list_directory(&path)? {
                let name = entry.name_lossy();
                let line = match link_path(&path, entry.kind(), entry.name()) {
                    Some(link) => {
                        let target = archive.read_link(&link)?;
                        writeln!(
                            stdout,
                            "l {name} -> {}",
                            String::from_utf8_lossy(&target)
                        )
                    }
                    None => writeln!(stdout, "{} {name}", marker(entry.kind())),
                };
                line.map_err(CliError::Stdout)?;
            }
            archive.close();
        }
        Command::Cat { file, path } => {
            let offset = payload_offset(&file, cli.offset)?;
            let mut archive = Archive::open(&file, offset)?;
            let written = archive.copy_file(&path, &mut stdout)?;
            info!("Wrote {written} bytes of {path:?}");
            archive.close();
        }
        Command::Desktop { file } => {
            let app = appimage(file, cli.offset)?;
            let entry = app.desktop_entry()?;
            info!("Desktop entry {}", entry.file_name);
            stdout.write_all(&entry.contents).map_err(CliError::Stdout)?;
        }
        Command::Icon { file, out } => {
            let app = appimage(file, cli.offset)?;
            let icon = app.dir_icon()?;
            fs::write(&out, &icon).map_err(|source| CliError::Output {
                path: out.clone(),
                source,
            })?;
            info!("Wrote {} byte icon to {}", icon.len(), out.display());
        }
    }
    stdout.flush().map_err(CliError::Stdout)
}

fn payload_offset(file: &Path, forced: Option<u64>) -> Result<u64, CliError> {
    match forced {
        Some(offset) => Ok(offset),
        None => Ok(compute_archive_offset(file)?),
    }
}

fn appimage(file: PathBuf, forced: Option<u64>) -> Result<AppImage, CliError> {
    match forced {
        Some(offset) => Ok(AppImage::with_offset(file, offset)),
        None => Ok(AppImage::open(file)?),
    }
}

const fn marker(kind: EntryKind) -> char {
    match kind {
        EntryKind::Directory => 'd',
        EntryKind::File => 'f',
        EntryKind::Symlink => 'l',
        EntryKind::Other => '?',
    }
}

/// Inner path of a symlink entry. `None` for other kinds and for names
/// that are not UTF-8, which cannot be spelled as a path.
fn link_path(dir: &str, kind: EntryKind, name: &[u8]) -> Option<String> {
    if kind != EntryKind::Symlink {
        return None;
    }
    std::str::from_utf8(name).ok().map(|name| join(dir, name))
}

fn join(dir: &str, name: &str) -> String {
    format!("{}/{name}", dir.trim_end_matches('/'))
}

fn parse_offset(s: &str) -> Result<u64, ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    }
}
