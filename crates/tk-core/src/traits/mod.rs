//! Core trait definitions

mod local;

pub use local::{LocalControl, LocalReader, LocalStreams, LocalWriter, ResizeStream};
