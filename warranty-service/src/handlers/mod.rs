pub mod account;
pub mod admin;
pub mod audit;
pub mod auth;
