use anyhow::{Result, bail};
use base64::Engine;
use clap::Args;
use colored::Colorize;
use std::{fs, path::Path};
use wvkeys::PsshBox;
use wvkeys_mp4::pssh;

#[derive(Args, Clone, Debug)]
/// Inspect PSSH boxes of an init segment or a base64 encoded box.
pub struct Pssh {
    /// Init file path or base64 encoded PSSH box.
    #[arg(required = true, value_name = "PATH|BASE64")]
    input: String,

    /// Also list boxes of other DRM systems.
    #[arg(long)]
    all: bool,
}

impl Pssh {
    pub fn execute(self) -> Result<()> {
        let boxes = if Path::new(&self.input).exists() {
            let data = fs::read(&self.input)?;
            pssh::scan_all(&data)
                .filter(|x| self.all || x.system_id == pssh::SystemId::Widevine)
                .collect::<Vec<_>>()
        } else {
            vec![PsshBox::from_base64(&self.input)?]
        };

        if boxes.is_empty() {
            bail!("No PSSH box found in '{}'.", self.input);
        }

        for pssh in boxes {
            println!(
                "{} {} (v{})",
                "[PSSH]".bold().green(),
                pssh.system_id,
                pssh.version
            );
            println!("  system id: {}", pssh.system_id.uuid());

            for kid in pssh.key_ids() {
                println!("  kid: {}", kid);
            }

            println!(
                "  data: {}",
                base64::engine::general_purpose::STANDARD.encode(&pssh.data)
            );
            println!("  box: {}", pssh.to_base64());
        }

        Ok(())
    }
}
