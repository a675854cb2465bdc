use std::net::IpAddr;
use std::sync::OnceLock;

use regex::Regex;

const WATCH_BASE_URL: &str = "https://www.youtube.com/watch?v=";
const OEMBED_BASE_URL: &str = "https://www.youtube.com/oembed?url=http://www.youtube.com/watch?v=";

fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("invalid id pattern"))
}

fn link_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^(?:(?:https?:)?//)?(?:(?:www|m)\.)?(?:youtube\.com|youtu\.be)/(?:[\w\-]+\?v=|embed/|v/)?([A-Za-z0-9_-]{11})(?:\S+)?$",
        )
        .expect("invalid link pattern")
    })
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum VideoError {
    #[error("invalid YouTube video link or id")]
    InvalidSource,
    #[error("invalid source ip")]
    InvalidSourceIp,
}

/// A YouTube video reference, reduced to its canonical 11-character id.
///
/// The id can only be set through [`Video::add_video_link`], so a non-empty
/// id is always a validated one. The optional source IP is only honored by
/// the youtube-dl resolution path.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Video {
    video: String,
    source_ip: Option<IpAddr>,
}

impl Video {
    /// Parses a bare 11-character video id or a YouTube link and returns the
    /// corresponding reference. Accepted link shapes include `watch?v=`,
    /// `embed/`, `v/` and bare `youtu.be` paths, with or without scheme and
    /// `www.`/`m.` subdomain, and with arbitrary trailing noise.
    pub fn from_link(video: &str) -> Result<Self, VideoError> {
        let mut reference = Self::default();
        reference.add_video_link(video)?;
        Ok(reference)
    }

    /// Sets the video id from a bare id or a YouTube link.
    pub fn add_video_link(&mut self, video: &str) -> Result<(), VideoError> {
        if id_pattern().is_match(video) {
            self.video = video.to_string();
            return Ok(());
        }

        if let Some(captures) = link_pattern().captures(video) {
            // Group 1 is the 11-character id segment of the link.
            self.video = captures[1].to_string();
            return Ok(());
        }

        Err(VideoError::InvalidSource)
    }

    /// Sets the source IP address passed to youtube-dl's `--source-address`.
    pub fn add_source_ip(&mut self, ip: &str) -> Result<(), VideoError> {
        let ip = ip.parse().map_err(|_| VideoError::InvalidSourceIp)?;
        self.source_ip = Some(ip);
        Ok(())
    }

    /// The canonical video id, or an empty string if none was set.
    pub fn id(&self) -> &str {
        &self.video
    }

    pub fn source_ip(&self) -> Option<IpAddr> {
        self.source_ip
    }

    /// The canonical watch page URL for this video.
    pub fn watch_url(&self) -> String {
        format!("{}{}", WATCH_BASE_URL, self.video)
    }

    /// Checks against the oembed endpoint whether the video exists.
    /// An unset id is reported as not existing without any network call.
    pub async fn exists(&self, client: &reqwest::Client) -> Result<bool, reqwest::Error> {
        if self.video.is_empty() {
            return Ok(false);
        }

        let url = format!("{}{}", OEMBED_BASE_URL, self.video);
        let response = client.get(&url).send().await?;
        Ok(response.status() == reqwest::StatusCode::OK)
    }
}
