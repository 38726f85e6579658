//! # rf-av
//!
//! External process plumbing for reframe.
//!
//! - **Tool discovery** ([`ToolRegistry`]) finds ffmpeg, ffprobe, and the
//!   external image optimizer.
//! - **Command execution** ([`ToolCommand`]) runs a process with a deadline
//!   and kills it when the deadline passes.
//! - **Scratch directories** ([`Scratch`]) hold the files an out-of-process
//!   tool reads and writes.
//! - **Probing** ([`probe_dimensions`], [`probe_duration`]) reads frame size
//!   and length with ffprobe.
//! - **Transcoding** ([`Transcoder`], [`FfmpegTranscoder`]) renders one video
//!   format with ffmpeg and pulls still frames for crop analysis.

pub mod command;
pub mod probe;
pub mod scratch;
pub mod tools;
pub mod transcode;

pub use command::{ToolCommand, ToolOutput};
pub use probe::{probe_dimensions, probe_duration};
pub use scratch::Scratch;
pub use tools::{ToolInfo, ToolRegistry};
pub use transcode::{FfmpegTranscoder, TranscodeRequest, Transcoder};
