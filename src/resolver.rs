use serde::Deserialize;

use crate::video::Video;
use crate::ytdl::{Ytdl, YtdlError};

const REMOTE_API_URL: &str = "http://streampocket.net/json2";

#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
    #[error("no video specified")]
    EmptyVideo,
    #[error("cannot reach remote api")]
    RemoteApiUnreachable,
    #[error("invalid remote api response")]
    RemoteApiBadResponse,
    #[error(transparent)]
    Tool(#[from] YtdlError),
}

/// Decoded reply of the remote resolution API. Only `recorded` is used; it
/// is treated as the direct link without further validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RemoteApiResponse {
    pub recorded: String,
    pub filename: String,
}

/// The closed set of resolution backends. Selected by configuration, one
/// per request, no retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Invoke the external downloader and capture the printed link.
    Ytdl,
    /// Ask the remote resolution API for a recorded link.
    RemoteApi,
    /// Always yield the given link. Only used by tests.
    #[cfg(test)]
    Fixed(&'static str),
}

impl Strategy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ytdl" | "youtube-dl" => Some(Self::Ytdl),
            "remote" | "remote-api" => Some(Self::RemoteApi),
            _ => None,
        }
    }

    /// Resolves `video` to a direct media link using this backend.
    pub async fn resolve(
        self,
        video: &Video,
        ytdl: &Ytdl,
        client: &reqwest::Client,
    ) -> Result<String, ResolveError> {
        if video.id().is_empty() {
            return Err(ResolveError::EmptyVideo);
        }

        match self {
            Self::Ytdl => Ok(ytdl.direct_link(video).await?),
            Self::RemoteApi => remote_api_link(client, video).await,
            #[cfg(test)]
            Self::Fixed(link) => Ok(link.to_string()),
        }
    }
}

/// Resolves a direct link through the remote resolution API.
///
/// A transport or body-read failure is a typed error, never a process exit;
/// a reply that does not decode as [`RemoteApiResponse`] is a distinct one.
pub async fn remote_api_link(
    client: &reqwest::Client,
    video: &Video,
) -> Result<String, ResolveError> {
    if video.id().is_empty() {
        return Err(ResolveError::EmptyVideo);
    }

    request_link(client, REMOTE_API_URL, video).await
}

async fn request_link(
    client: &reqwest::Client,
    api_url: &str,
    video: &Video,
) -> Result<String, ResolveError> {
    let response = client
        .get(api_url)
        .query(&[("stream", video.watch_url())])
        .send()
        .await
        .map_err(|_| ResolveError::RemoteApiUnreachable)?;

    let body = response
        .bytes()
        .await
        .map_err(|_| ResolveError::RemoteApiUnreachable)?;

    let decoded: RemoteApiResponse =
        serde_json::from_slice(&body).map_err(|_| ResolveError::RemoteApiBadResponse)?;

    Ok(decoded.recorded)
}
