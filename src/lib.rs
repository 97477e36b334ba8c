//! Pause Music Player Daemon when a countdown runs out
//!
//! A [`Timer`] counts down and runs an [`Action`] when it expires, which in
//! practice is [`MpcPause`]. The [`server`] module exposes the timer over
//! HTTP so that it can be set from a phone before falling asleep.

pub mod action;
pub mod config;
pub mod duration;
pub mod server;
pub mod timer;

pub use action::{Action, MpcPause};
pub use config::Config;
pub use timer::{Status, Timer};
