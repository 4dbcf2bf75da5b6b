//! Integration test crate for reelcut.
//!
//! Holds the synthetic codec backend and the cross-crate export tests that
//! run against it. Nothing here needs ffmpeg or a GPU.

pub mod synthetic;

#[cfg(test)]
mod export;

#[cfg(test)]
mod properties;

#[cfg(test)]
mod mp4;

#[cfg(test)]
mod session;
