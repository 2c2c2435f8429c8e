pub mod bookings;
pub mod orders;
pub mod packs;
pub mod subscriptions;
pub mod waitlist;
pub mod webhooks;

#[cfg(test)]
pub(crate) mod test_helpers;
