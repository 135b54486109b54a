//! Domain layer for streamwatch.
//!
//! Value objects and entities shared by the store, the monitor and the
//! notification fan-out.

pub mod channel;
pub mod month;
pub mod subscription;

pub use channel::ChannelName;
pub use month::MonthKey;
pub use subscription::{
    DEFAULT_EMBED_COLOR, DeliveryTarget, DisplayPreferences, GuildSettings, Subscriber,
    Subscription,
};
