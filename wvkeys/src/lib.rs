//! Widevine key acquisition and mp4decrypt post-processing for DASH downloads.
//!
//! A [`Session`] is wired into a host downloader at three points:
//!
//! 1. Manifest parsing, through [`intercept::Intercepted`] or
//!    [`Session::intercept`], which records Widevine protection per manifest.
//! 2. Before the download, [`Session::prepare`] classifies each part of a
//!    record and attaches resolved content keys.
//! 3. After the download, [`Session::decrypt`] runs `mp4decrypt` on each
//!    encrypted part and updates the merge list.
//!
//! # Example
//!
//! ```no_run
//! use wvkeys::{Config, ContentKey, DownloadInfo, TrackPart, track::Container};
//!
//! let session = Config::new().no_cache(true).build()?;
//! let mut info = DownloadInfo::single(
//!     "episode-1",
//!     TrackPart::new("video", Container::Mp4Dash).filepath("episode-1.mp4"),
//! );
//! info.cenc_key.push("91ba752a446148c68400d78374b178b4:a01d7dc4edf582496b7e73d67e9e6899".parse::<ContentKey>()?);
//!
//! session.prepare(&mut info)?;
//! // download happens here
//! info.real_download = true;
//! session.decrypt(&mut info)?;
//! # Ok::<(), wvkeys::Error>(())
//! ```

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod cache;
pub mod cdm;
pub mod classify;
pub mod decrypt;
pub mod intercept;
pub mod license;
pub mod manifest;
pub mod registry;
pub mod remote;
pub mod track;

mod config;
mod error;
mod keys;
mod session;
mod utils;

pub use config::Config;
pub use error::{Error, Result};
pub use keys::{ContentKey, KeySet};
pub use session::{PrepareReport, PreparedPart, Session};
pub use track::{DownloadInfo, TrackPart};
pub use wvkeys_mp4::pssh::PsshBox;
