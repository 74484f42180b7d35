use std::{path::PathBuf, process};

use anyhow::Result;
use clap::Parser;
use opencv::core::Size;
use trackvid::{display::HighguiSink, exit_code, playback::Playback, source::VideoFileSource};

#[derive(Parser, Debug)]
#[command(name = "playvid", about = "Play a video file at its source frame rate")]
struct Args {
    /// Video file to play
    video: Option<PathBuf>,
    /// Largest window width before frames are scaled down
    #[arg(long, default_value_t = 1024)]
    max_width: i32,
    /// Largest window height before frames are scaled down
    #[arg(long, default_value_t = 768)]
    max_height: i32,
}

fn main() {
    tracing_subscriber::fmt().with_target(false).init();
    let args = Args::parse();
    if let Err(err) = run(args) {
        tracing::error!("{err:#}");
        process::exit(exit_code(&err));
    }
}

fn run(args: Args) -> Result<()> {
    let path = args.video.unwrap_or_default();
    let source = VideoFileSource::open(&path)?;
    let mut playback = Playback::new(
        Box::new(source),
        Box::new(HighguiSink),
        Size::new(args.max_width, args.max_height),
        "playvid",
    )?;

    playback.pause_on_first_frame()?;
    playback.show_video()?;
    playback.hold_last_frame()?;
    Ok(())
}
