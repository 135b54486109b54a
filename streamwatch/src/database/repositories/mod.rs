//! Repository layer for database access.
//!
//! Each aggregate gets an `async_trait` repository and a `Sqlx*` implementation.

pub mod leaderboard;
pub mod live_session;
pub mod notification;
pub mod subscription;

pub use leaderboard::*;
pub use live_session::*;
pub use notification::*;
pub use subscription::*;
