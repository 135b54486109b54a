//! Database models for streamwatch.
//!
//! These models map directly to the database schema; conversions into
//! domain types live next to each model.

pub mod guild;
pub mod leaderboard;
pub mod live_session;
pub mod notification;
pub mod subscription;

pub use guild::*;
pub use leaderboard::*;
pub use live_session::*;
pub use notification::*;
pub use subscription::*;
