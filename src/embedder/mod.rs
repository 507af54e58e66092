//! Per-format watermark carriers.
//!
//! Each submodule owns one way of hiding a payload in one container
//! family. They share a contract shape rather than a trait: `embed` takes
//! carrier bytes plus payload bytes and returns new carrier bytes,
//! `extract` reverses it, and `supports` reports which file extensions the
//! carrier accepts. The engine composes them into layer plans; see
//! [`crate::engine`].
//!
//! | Carrier | Container | Survives |
//! |---------|-----------|----------|
//! | [`frequency`] | PNG/JPEG/BMP pixels | re-encoding, light edits |
//! | [`lsb`] | PNG pixels | lossless operations only |
//! | [`container`] | JPEG/TIFF EXIF, PNG `tEXt` | pixel edits that copy metadata |
//! | [`audio`] | PCM samples (legacy) | resampling-free processing |
//! | [`mp3`] | ID3v2 tags | transcoding that keeps tags |
//! | [`pdf`] | Info dictionary | page-preserving rewrites |

pub mod audio;
pub mod container;
pub mod frequency;
pub mod lsb;
pub mod mp3;
pub mod pdf;
