pub mod audit_log;
pub mod booking;
pub mod entitlement;
pub mod order;
pub mod session_pack;
pub mod subscription;
pub mod user;
pub mod waitlist;
pub mod webhook_event;
