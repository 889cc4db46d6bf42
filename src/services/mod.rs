pub mod auth_service;
pub mod blacklist_service;
pub mod jwt_service;
pub mod refresh_service;
pub mod session_service;
