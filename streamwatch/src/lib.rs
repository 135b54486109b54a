//! streamwatch library crate.
//!
//! Tracks the live state of subscribed Twitch channels, notifies every
//! subscribing Discord guild once per live session, and keeps monthly
//! go-live leaderboards.

pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod leaderboard;
pub mod logging;
pub mod monitor;
pub mod notification;
pub mod panic_hook;
pub mod scheduler;
pub mod services;
pub mod utils;

pub use error::{Error, Result};
