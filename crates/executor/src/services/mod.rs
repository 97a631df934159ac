pub mod session_service;
pub mod telegram_service;
