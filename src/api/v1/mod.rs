pub mod account;
pub mod auth;
pub mod profile;
pub mod token;
pub mod user;
pub mod verification;
