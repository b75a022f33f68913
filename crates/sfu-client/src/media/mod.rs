//! Local media: tracks, capture and encoding parameters

pub mod parameters;
pub mod source;
pub mod track;

pub use parameters::{
    default_simulcast_encodings, validate_encodings, CodecOptions, MediaParameters,
    ScalabilityMode,
};
pub use source::{ConstraintRange, LocalSourceAcquirer, MediaSource, VideoConstraints};
pub use track::{MediaTrack, TrackSettings};
