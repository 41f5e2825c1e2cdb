mod decrypt;
mod license;
mod pssh;

pub use decrypt::Decrypt;
pub use license::License;
pub use pssh::Pssh;

use anyhow::{Result, bail};
use clap::{ColorChoice, Parser, Subcommand};
use log::LevelFilter;
use std::{fs, path::Path};
use wvkeys::PsshBox;

/// Acquire Widevine content keys and decrypt DASH downloads with mp4decrypt.
#[derive(Debug, Clone, Parser)]
#[command(version, about)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// When to output colored text.
    #[arg(long, global = true, default_value_t = ColorChoice::Auto)]
    pub color: ColorChoice,

    /// Print debug logs, repeat for trace logs.
    #[arg(short, long, global = true, action = clap::ArgAction::Count, conflicts_with = "quiet")]
    pub verbose: u8,

    /// Only print warnings and errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

impl Args {
    pub fn log_level(&self) -> LevelFilter {
        match (self.quiet, self.verbose) {
            (true, _) => LevelFilter::Warn,
            (false, 0) => LevelFilter::Info,
            (false, 1) => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    Decrypt(Decrypt),
    License(License),
    Pssh(Pssh),
}

/// Widevine PSSH box from an init file path or base64 encoded box.
fn read_pssh(input: &str) -> Result<PsshBox> {
    if Path::new(input).exists() {
        let Some(pssh) = wvkeys_mp4::pssh::scan(&fs::read(input)?) else {
            bail!("No widevine PSSH box found in '{}'.", input);
        };
        return Ok(pssh);
    }

    match PsshBox::from_base64(input) {
        Ok(x) => Ok(x),
        Err(e) => bail!("Unable to read '{}' as an init file or base64 PSSH box ({}).", input, e),
    }
}
