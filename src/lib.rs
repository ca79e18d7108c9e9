//! plate-reader - License plate detection and reading
//!
//! Finds plate regions in still images, video files and live streams,
//! straightens and enhances them, and reads their text through a pluggable
//! recognizer.

pub mod api;
pub mod app;
pub mod capture;
pub mod config;
pub mod error;
pub mod shared;
pub mod storage;
pub mod stream;
pub mod vision;

pub use error::PlateError;
