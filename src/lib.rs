pub mod classify;
pub mod config;
pub mod domain;
pub mod downloader;
pub mod error;
pub mod fs_util;
pub mod intended_for;
pub mod layout;
pub mod license;
pub mod metadata;
pub mod naming;
pub mod output;
pub mod platform;
pub mod progress;
pub mod resources;
pub mod results;
