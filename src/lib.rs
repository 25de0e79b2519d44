pub mod audio;
pub mod config;
pub mod error;
pub mod media;
pub mod mesh;
pub mod relay;
pub mod rtc;
pub mod session;
pub mod signal;
pub mod signaling;
