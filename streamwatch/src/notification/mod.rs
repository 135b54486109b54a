//! Notification delivery.
//!
//! Turns a newly detected live session into one message per subscribing
//! guild and retracts those messages again when the stream ends.
//!
//! # Example
//!
//! ```ignore
//! use streamwatch::notification::{DiscordTransport, NotificationDispatcher};
//!
//! let transport = Arc::new(DiscordTransport::new(client, token));
//! let dispatcher = NotificationDispatcher::new(transport, notification_repo, 16);
//! let report = dispatcher.dispatch(&snapshot, &subscribers).await;
//! ```

pub mod channels;
pub mod cleanup;
pub mod dispatcher;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use channels::DiscordTransport;
pub use cleanup::{CleanupReport, NotificationCleanup};
pub use dispatcher::{DeliveryOutcome, DispatchReport, NotificationDispatcher};
pub use transport::{DeliveryError, DeliveryTransport, MessageRef};
