//! Match recording and seekable playback.

pub mod file;
pub mod timeline;

pub use file::{
    BattleReplayFile, ReplayError, ReplayRecorder, ReplaySnapshot, REPLAY_FORMAT_VERSION,
};
pub use timeline::ReplayTimeline;
