pub mod client;
pub mod cookies;
