pub mod identity;
pub mod jwt;
pub mod reference;
