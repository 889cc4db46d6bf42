pub mod admin;
pub mod auth;
pub mod session;
pub mod user;
