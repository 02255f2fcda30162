pub mod analysis;
pub mod attendance;
pub mod proxy_log;
pub mod session;
