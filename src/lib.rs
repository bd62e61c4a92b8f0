#![forbid(unsafe_code)]

//! A personal web proxy: pages are fetched under an encoded path, their links
//! are rewritten to route back through the proxy, and YouTube watch pages are
//! served from a local `yt-dlp` cache.

pub mod config;
pub mod decode;
pub mod error;
pub mod favorites;
pub mod fetch;
pub mod logging;
pub mod metadata;
pub mod proxy;
pub mod response_cache;
pub mod rewrite;
pub mod security;
pub mod store;
pub mod video_cache;
