//! One-shot resolver: turns references given as arguments (or stdin lines)
//! into direct links on stdout. Uses the same environment configuration as
//! the server.

use std::io::BufRead;

use ytlink::{config::Config, resolver::Strategy, video::Video, ytdl::Ytdl};

fn inputs() -> std::io::Result<Vec<String>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if !args.is_empty() {
        return Ok(args);
    }

    std::io::stdin().lock().lines().collect()
}

async fn resolve_one(
    input: &str,
    strategy: Strategy,
    ytdl: &Ytdl,
    client: &reqwest::Client,
) -> Result<String, Box<dyn std::error::Error>> {
    let video = Video::from_link(input)?;
    Ok(strategy.resolve(&video, ytdl, client).await?)
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = Config::from_env().expect("invalid configuration");
    let ytdl = Ytdl::new(&config.program);

    if config.strategy == Strategy::Ytdl {
        ytdl.probe()
            .await
            .expect("downloader command is not installed or cannot be found");
    }

    let client = reqwest::Client::new();
    let videos = inputs().expect("cannot read video(s)");

    let mut had_error = false;
    for video in videos {
        match resolve_one(&video, config.strategy, &ytdl, &client).await {
            Ok(link) => println!("{}", link.trim()),
            Err(e) => {
                had_error = true;
                log::error!("{}: {}", video, e);
            }
        }
    }

    if had_error {
        std::process::exit(1);
    }
}
