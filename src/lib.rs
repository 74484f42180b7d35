use thiserror::Error;

pub mod clock;
pub mod display;
pub mod playback;
pub mod regions;
pub mod registry;
pub mod source;
pub mod tracker;

/// Failure conditions the binaries recognize and map to exit code 1.
/// Anything else that surfaces through `anyhow` is unrecognized and
/// maps to exit code 2.
#[derive(Error, Debug, Clone)]
pub enum Errors {
    #[error("failed to open {0}")]
    OpenFailed(String),
    #[error("frame rate {0} cannot be used for playback")]
    BadFrameRate(f64),
    #[error("the video contains no frames")]
    EmptyVideo,
    #[error("invalid region list: {0}")]
    InvalidRegions(String),
    #[error("user requested to quit")]
    QuitRequested,
}

/// Exit code for a failure that reached the entry point.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<Errors>().is_some() {
        1
    } else {
        2
    }
}
