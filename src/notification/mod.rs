//! Keyed notification channels with blocking, cancellable reads.

mod channel;
mod registry;

pub use channel::Notification;
pub use registry::NotificationRegistry;
