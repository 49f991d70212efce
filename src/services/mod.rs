pub mod auth_service;
pub mod events;
pub mod lockout;
pub mod rate_limiter;
pub mod session_service;
pub mod token_service;
