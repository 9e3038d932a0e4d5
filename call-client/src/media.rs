//! Local media capture seam.
//!
//! Acquisition is a suspending operation: it can block on a permission
//! prompt or fail on device errors. The orchestrator owns the returned
//! stream exclusively for the duration of one call and stops it on every
//! terminal path.

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::CallKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl MediaConstraints {
    /// Calls always capture audio; video only for video calls.
    pub fn for_call(kind: CallKind) -> Self {
        Self {
            audio: true,
            video: kind == CallKind::Video,
        }
    }
}

#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Acquire camera/microphone tracks. May suspend on a permission
    /// prompt; fails with [`crate::ClientError::Media`] on denial or
    /// device error.
    async fn acquire(&self, constraints: MediaConstraints) -> Result<Box<dyn MediaStream>>;
}

pub trait MediaStream: Send {
    /// Stop and release every track. Must be idempotent.
    fn stop(&mut self);

    fn set_audio_enabled(&mut self, enabled: bool);

    fn set_video_enabled(&mut self, enabled: bool);

    fn has_video(&self) -> bool;
}
