//! # ytlink
//!
//! This crate resolves YouTube video references (a bare 11-character id or
//! one of the usual link shapes) to direct, playable media URLs, through
//! either the external downloader command or a remote resolution API, and
//! can pipe the raw video bytes straight from the downloader into an HTTP
//! response behind a shared-secret guard.
//!
//! ## Usage
//!
//! The library side is a handful of small pieces: parse a reference, pick a
//! strategy, resolve.
//!
//! ```rust,no_run
//! use ytlink::{resolver::Strategy, video::Video, ytdl::Ytdl};
//!
//! #[tokio::main]
//! async fn main() {
//!     let video = Video::from_link("https://youtu.be/dQw4w9WgXcQ").unwrap();
//!
//!     let ytdl = Ytdl::default();
//!     let client = reqwest::Client::new();
//!
//!     let link = Strategy::Ytdl
//!         .resolve(&video, &ytdl, &client)
//!         .await
//!         .unwrap();
//!     println!("{}", link);
//! }
//! ```
//!
//! The `server` module assembles the HTTP surface: redirect routes answering
//! `302 Found` with the resolved link, and key-guarded streaming routes
//! answering `200 OK` with a `video/mp4` body piped from the downloader.

#[forbid(unsafe_code)]
#[macro_use]
extern crate log;

pub mod config;
pub mod resolver;
pub mod server;
pub mod video;
pub mod ytdl;
