//! Playback engines
//!
//! Capability-driven delivery decisions, the transcode supervisor,
//! keyframe-aware seek reloading, playlist generators and the session
//! lifecycle.

pub mod decision;
pub mod engine;
pub mod playlist;
pub mod seek;
pub mod session;
pub mod transcoder;

pub use decision::{DecisionConfig, DeliveryMode, StreamPlan, TranscodeReasons};
pub use engine::{ClientStatus, DecideAction, DecideInput, DecideOutput, PlaybackEngine};
pub use playlist::PlaylistService;
pub use seek::SeekService;
pub use session::SessionRegistry;
pub use transcoder::TranscodeSupervisor;
