use crate::{
    Error, KeySet, Result,
    track::{DownloadInfo, Formats, TrackState},
    utils::{self, prepend_extension, sanitize_filename, unused_name},
};
use colored::Colorize;
use log::{debug, info, warn};
use std::{
    ffi::OsStr,
    fs,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

/// Runs the external `mp4decrypt` tool.
#[derive(Clone, Debug)]
pub struct Mp4Decrypt {
    bin: PathBuf,
    sanitize_filenames: bool,
}

impl Mp4Decrypt {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            sanitize_filenames: cfg!(windows),
        }
    }

    /// Use `bin` when given, search `PATH` otherwise.
    pub fn locate(bin: Option<&Path>) -> Result<Self> {
        let bin = match bin {
            Some(x) => x.to_owned(),
            None => utils::find_mp4decrypt().ok_or(Error::Mp4DecryptNotFound)?,
        };

        // Invocations change the working directory.
        let bin = fs::canonicalize(&bin).map_err(|_| Error::Mp4DecryptNotFound)?;
        Ok(Self::new(bin))
    }

    /// Rename files with names outside printable ASCII while the tool runs.
    pub fn sanitize_filenames(mut self, sanitize: bool) -> Self {
        self.sanitize_filenames = sanitize;
        self
    }

    pub fn bin(&self) -> &Path {
        &self.bin
    }

    /// Decrypt `input` into `output`, both in the same directory.
    pub fn run(&self, input: &Path, output: &Path, keys: &KeySet) -> Result<()> {
        let cwd = match input.parent() {
            Some(x) if !x.as_os_str().is_empty() => x.to_owned(),
            _ => PathBuf::from("."),
        };
        let mut filename = file_name(input)?.to_owned();
        let mut outname = file_name(output)?.to_owned();
        let mut renames = Vec::new();

        // Temporary names never replace files already in the directory.
        if self.sanitize_filenames {
            let safe = sanitize_filename(&filename);

            if safe != filename {
                let safe = unused_name(&cwd, &safe, &[]);
                debug!("Renaming {} to {}", filename, safe);
                fs::rename(cwd.join(&filename), cwd.join(&safe))?;
                renames.push((safe.clone(), filename));
                filename = safe;
            }

            let safe = sanitize_filename(&outname);

            if safe != outname {
                let safe = unused_name(&cwd, &safe, &[&filename]);
                renames.push((safe.clone(), outname));
                outname = safe;
            }
        }

        let mut args = keys.to_args();
        args.push(filename.clone());
        args.push(outname.clone());

        info!(
            "Executing {} {}",
            "mp4decrypt".bold(),
            args.iter()
                .map(|x| if x.contains(' ') {
                    format!("\"{x}\"")
                } else {
                    x.to_owned()
                })
                .collect::<Vec<_>>()
                .join(" ")
        );

        let result = Command::new(&self.bin)
            .args(&args)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();

        let failure = match result {
            Ok(x) if x.status.success() => None,
            Ok(x) => {
                let stderr = String::from_utf8_lossy(&x.stderr).trim().to_owned();

                Some(Error::Mp4Decrypt(if stderr.is_empty() {
                    format!("exited with code {}", x.status.code().unwrap_or(1))
                } else {
                    stderr
                }))
            }
            Err(e) => Some(Error::Io(e)),
        };

        if let Some(e) = failure {
            let partial = cwd.join(&outname);

            if partial.exists() {
                let _ = fs::remove_file(&partial);
            }

            // Only the source has been renamed at this point.
            if let Some((from, to)) = renames.first()
                && *from == filename
            {
                fs::rename(cwd.join(from), cwd.join(to))?;
            }

            return Err(e);
        }

        for (from, to) in &renames {
            fs::rename(cwd.join(from), cwd.join(to))?;
        }

        Ok(())
    }
}

fn file_name(path: &Path) -> Result<&str> {
    path.file_name()
        .and_then(OsStr::to_str)
        .ok_or_else(|| Error::Mp4Decrypt(format!("unusable file name {}", path.display())))
}

/// One encrypted part on disk together with its keys.
#[derive(Clone, Debug)]
pub struct DecryptionJob {
    pub format_id: String,
    pub filepath: PathBuf,
    pub keys: KeySet,
    /// The file is listed for a later merge instead of being used directly.
    pub merge: bool,
}

impl DecryptionJob {
    /// `a.mp4` is decrypted into `a.decrypted.mp4`.
    pub fn output(&self) -> PathBuf {
        prepend_extension(&self.filepath, "decrypted")
    }

    /// Decrypt the file and return the path that now holds the plaintext.
    ///
    /// A leftover output from an earlier run is reused as is.
    pub fn run(&self, tool: &Mp4Decrypt) -> Result<PathBuf> {
        let output = self.output();

        if output.exists() {
            info!("Reusing already decrypted {}", output.display());
        } else {
            tool.run(&self.filepath, &output, &self.keys)?;
        }

        if self.merge {
            return Ok(output);
        }

        fs::rename(&output, &self.filepath)?;
        Ok(self.filepath.clone())
    }
}

/// Result of the post-download pass for one record.
#[derive(Debug, Default)]
pub struct DecryptReport {
    /// Ciphertext files superseded by decrypted ones in the merge list.
    pub to_delete: Vec<PathBuf>,
    pub parts: Vec<(String, TrackState)>,
    /// Parts without keys made the merge of this record unsafe, nothing was
    /// decrypted and the merge list was cleared.
    pub merge_skipped: bool,
    /// One entry per encrypted part no key was found for.
    pub errors: Vec<Error>,
}

/// Whether the files of `info` were written by this download.
///
/// A single format found already on disk, usually decrypted by an earlier
/// run, is left alone.
pub(crate) fn was_downloaded(info: &DownloadInfo) -> bool {
    info.is_merged() || info.real_download
}

/// Decrypt every annotated part of a downloaded record.
///
/// Consumes the key annotations. When a part of a multi-part record has no
/// keys, no part of that record is touched and its merge is skipped.
pub fn decrypt_record(tool: &Mp4Decrypt, info: &mut DownloadInfo) -> Result<DecryptReport> {
    let mut report = DecryptReport::default();

    if !was_downloaded(info) {
        debug!("{} was not downloaded, skipping decryption", info.id);
        return Ok(report);
    }

    let mut jobs = Vec::new();
    let files_to_merge = info.files_to_merge().to_vec();

    for part in info.parts_mut() {
        let Some(keys) = part.resolved.take() else {
            continue;
        };

        match &part.filepath {
            Some(filepath) if !keys.is_empty() => jobs.push(DecryptionJob {
                format_id: part.format_id.clone(),
                merge: files_to_merge.contains(filepath),
                filepath: filepath.to_owned(),
                keys,
            }),
            Some(_) => {
                let e = Error::NoKeys {
                    format_id: part.format_id.clone(),
                };
                warn!("{}", e);
                report.errors.push(e);
                report
                    .parts
                    .push((part.format_id.clone(), TrackState::KeyUnavailable));
            }
            None => debug!("Nothing downloaded for {}", part.format_id),
        }
    }

    if !report.errors.is_empty() {
        if let Formats::Merged { files_to_merge, .. } = &mut info.formats {
            warn!("Skipping merge of {}, not every format could be decrypted", info.id);
            files_to_merge.clear();
            report.merge_skipped = true;
        }

        if report.merge_skipped {
            for job in jobs {
                report.parts.push((job.format_id, TrackState::KeyResolved));
            }

            return Ok(report);
        }
    }

    if !jobs.is_empty() {
        info!("Decrypting {} format(s) of {}", jobs.len(), info.id);
    }

    for job in jobs {
        let decrypted = match job.run(tool) {
            Ok(x) => x,
            Err(e) => {
                warn!("Decryption of {} failed", job.format_id);
                return Err(e);
            }
        };

        if job.merge
            && let Formats::Merged { files_to_merge, .. } = &mut info.formats
            && let Some(entry) = files_to_merge.iter_mut().find(|x| **x == job.filepath)
        {
            *entry = decrypted;
            report.to_delete.push(job.filepath.clone());
        }

        report.parts.push((job.format_id, TrackState::Decrypted));
    }

    Ok(report)
}
