//! Push notification model, delivery and token cleanup.

pub mod delivery;
pub mod log;
pub mod notification;
pub mod reclaim;
pub mod retry;
pub mod sender;

#[cfg(test)]
pub(crate) mod testing;

pub use delivery::Delivery;
pub use log::{LogOptions, LogPushEntry, PushStatus};
pub use notification::{Platform, PushNotification, RequestPush};
pub use reclaim::TokenReclaimer;
pub use sender::{LoggingSender, PlatformSenders, PushSender, SendOutcome};
