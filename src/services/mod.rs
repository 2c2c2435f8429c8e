pub mod bookings;
pub mod catalog;
pub mod fulfillment;
pub mod notifier;
pub mod packs;
pub mod providers;
pub mod subscriptions;
pub mod waitlist;
