use anyhow::{Result, bail};
use clap::Args;
use log::info;
use std::path::PathBuf;
use wvkeys::{
    ContentKey, KeySet,
    decrypt::{DecryptionJob, Mp4Decrypt},
};

#[derive(Args, Clone, Debug)]
/// Decrypt a downloaded file with mp4decrypt.
pub struct Decrypt {
    /// Encrypted mp4 file.
    #[arg(required = true)]
    input: PathBuf,

    /// Content key in KID:KEY format.
    ///
    /// This option can be used multiple times.
    #[arg(short, long = "key", value_name = "KID:KEY", required = true)]
    keys: Vec<ContentKey>,

    /// Write the decrypted file here instead of replacing the input.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Path to the mp4decrypt binary, searched in PATH by default.
    #[arg(long, value_name = "PATH")]
    mp4decrypt: Option<PathBuf>,

    /// Strip non printable ASCII characters from file names while decrypting.
    /// Always done on Windows.
    #[arg(long)]
    sanitize_filenames: bool,
}

impl Decrypt {
    pub fn execute(self) -> Result<()> {
        if !self.input.is_file() {
            bail!("'{}' is not a file.", self.input.display());
        }

        let tool = Mp4Decrypt::locate(self.mp4decrypt.as_deref())?
            .sanitize_filenames(self.sanitize_filenames || cfg!(windows));
        let keys = KeySet::new(self.keys);

        let path = match self.output {
            Some(output) => {
                if output.parent() != self.input.parent() {
                    bail!("--output must be in the same directory as the input file.");
                }

                tool.run(&self.input, &output, &keys)?;
                output
            }
            None => DecryptionJob {
                format_id: self.input.display().to_string(),
                filepath: self.input,
                keys,
                merge: false,
            }
            .run(&tool)?,
        };

        info!("Decrypted {}", path.display());
        Ok(())
    }
}
