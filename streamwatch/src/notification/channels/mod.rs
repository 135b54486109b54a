//! Delivery transports.

mod discord;

pub use discord::DiscordTransport;
