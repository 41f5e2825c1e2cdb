#![cfg_attr(docsrs, feature(doc_cfg))]

//! This crate contains a small `PSSH` box parser and a scanner for locating
//! Widevine `PSSH` boxes inside raw mp4 initialization segments.
//!
//! The scanner does not walk the box tree. It looks for the `pssh` fourcc
//! anywhere in the buffer, which also finds boxes nested under `moov` or
//! `moof` and boxes inside partially downloaded segments.
//!
//! # Example
//!
//! ```
//! use wvkeys_mp4::pssh::{self, PsshBox, SystemId};
//!
//! let pssh = PsshBox::widevine(b"\x12\x10content".to_vec());
//! let init = [b"\0\0\0\x08free".as_slice(), pssh.to_bytes().as_slice()].concat();
//!
//! let found = pssh::scan(&init).unwrap();
//! assert_eq!(found.system_id, SystemId::Widevine);
//! ```

pub mod pssh;

mod error;
mod reader;

pub use error::Error;
pub use reader::Reader;

/// A `Result` alias where the `Err` case is `wvkeys_mp4::Error`.
pub type Result<T> = std::result::Result<T, Error>;

#[macro_export]
#[doc(hidden)]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::new_decode_err(format!($($arg)*)))
    };
}
