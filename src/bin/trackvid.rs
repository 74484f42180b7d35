use std::{path::PathBuf, process};

use anyhow::Result;
use clap::Parser;
use opencv::core::Size;
use trackvid::{
    display::HighguiSink,
    exit_code,
    playback::{draw_objects, Playback},
    regions::load_regions,
    registry::TrackerRegistry,
    source::VideoFileSource,
    tracker::csrt_factory,
};

#[derive(Parser, Debug)]
#[command(
    name = "trackvid",
    about = "Play a video while tracking hand-picked regions with CSRT"
)]
struct Args {
    /// Video file to play
    video: Option<PathBuf>,
    /// JSON list of regions to track (see assets/regions.example.json)
    #[arg(long, value_name = "PATH")]
    regions: Option<PathBuf>,
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
        "trackvid",
    )?;

    let specs = match &args.regions {
        Some(path) => load_regions(path)?,
        None => {
            tracing::warn!("no region list supplied, playing without tracking");
            Vec::new()
        }
    };

    let first = playback.first_frame()?;
    let mut registry = TrackerRegistry::build(
        &specs,
        &first,
        playback.info().fps_rounded(),
        csrt_factory(),
    )?;

    let mut annotated = first.clone();
    draw_objects(&mut annotated, registry.drawable(0))?;
    playback.preview(&annotated)?;

    playback.show_video_tracking(&mut registry, first)?;
    playback.hold_last_frame()?;
    Ok(())
}
