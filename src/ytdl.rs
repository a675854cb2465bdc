use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::process::Command;

use crate::video::Video;

/// Default program name, resolved on `$PATH`.
pub const DEFAULT_PROGRAM: &str = "youtube-dl";

#[derive(thiserror::Error, Debug)]
pub enum YtdlError {
    #[error("no video specified")]
    EmptyVideo,
    #[error("downloader command is not installed or cannot be found")]
    Unavailable,
    // Display is the tool's own diagnostic output, surfaced verbatim.
    #[error("{0}")]
    Failed(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Handle on the external downloader executable.
///
/// The same tool is driven in two output modes: [`Ytdl::direct_link`]
/// captures stdout as the resolved URL, [`Ytdl::stream`] pipes raw media
/// bytes from stdout into a sink.
#[derive(Debug, Clone)]
pub struct Ytdl {
    program: PathBuf,
}

impl Ytdl {
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
        }
    }

    /// Checks once at startup that the downloader can be executed.
    pub async fn probe(&self) -> Result<(), YtdlError> {
        let output = Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|_| YtdlError::Unavailable)?;

        if output.status.success() {
            Ok(())
        } else {
            Err(YtdlError::Unavailable)
        }
    }

    /// Resolves the direct link of the best progressive mp4 for `video`.
    ///
    /// If the reference carries a source IP, the downloader binds its
    /// outbound connection to it. On non-zero exit the tool's stderr text is
    /// returned as the error message.
    pub async fn direct_link(&self, video: &Video) -> Result<String, YtdlError> {
        if video.id().is_empty() {
            return Err(YtdlError::EmptyVideo);
        }

        let mut command = Command::new(&self.program);
        command.arg("-f").arg("best[ext=mp4]").arg("-g");
        if let Some(ip) = video.source_ip() {
            command.arg("--source-address").arg(ip.to_string());
        }
        command.arg(video.id()).stdin(Stdio::null());

        let output = command.output().await?;
        if !output.status.success() {
            return Err(YtdlError::Failed(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Streams the best progressive mp4 for `video` into `sink`.
    ///
    /// Stdout is copied chunk by chunk, the payload is never buffered whole.
    /// Bytes may already have reached the sink when an error is returned, so
    /// any error means "stream incomplete", not "stream empty". This mode
    /// does not honor a source IP.
    pub async fn stream<W>(&self, video: &Video, mut sink: W) -> Result<(), YtdlError>
    where
        W: AsyncWrite + Unpin,
    {
        if video.id().is_empty() {
            return Err(YtdlError::EmptyVideo);
        }

        let mut child = Command::new(&self.program)
            .arg("-q")
            .arg("-f")
            .arg("best[ext=mp4]")
            .arg("-o")
            .arg("-")
            .arg(video.id())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| YtdlError::Io(std::io::Error::other("child stdout not captured")))?;

        match tokio::io::copy(&mut stdout, &mut sink).await {
            Ok(_) => {
                sink.flush().await?;
                let status = child.wait().await?;
                if status.success() {
                    Ok(())
                } else {
                    Err(YtdlError::Failed(format!("downloader exited with {}", status)))
                }
            }
            Err(e) => {
                // The sink is gone (client hung up); reap the child instead
                // of leaving it blocked on a closed pipe.
                let _ = child.kill().await;
                Err(YtdlError::Io(e))
            }
        }
    }
}

impl Default for Ytdl {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}
