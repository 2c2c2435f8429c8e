pub mod audit_log_repository;
pub mod booking_repository;
pub mod entitlement_repository;
pub mod mock_db;
pub mod order_repository;
pub mod pack_repository;
pub mod postgres_audit_log_repository;
pub mod postgres_booking_repository;
pub mod postgres_entitlement_repository;
pub mod postgres_order_repository;
pub mod postgres_pack_repository;
pub mod postgres_subscription_repository;
pub mod postgres_waitlist_repository;
pub mod postgres_webhook_ledger_repository;
pub mod subscription_repository;
pub mod waitlist_repository;
pub mod webhook_ledger_repository;
