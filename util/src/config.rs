//! Process-wide configuration.
//!
//! `AppConfig` is loaded once from `.env` and the environment, then served
//! from a lazily initialized singleton. Tests and runtime overrides go
//! through the per-field setters; `reset` reloads from the environment.

use std::env;
use std::sync::{OnceLock, RwLock};

/// Runtime configuration, resolved from environment variables with
/// development defaults.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub env: String,
    pub project_name: String,
    pub log_level: String,
    pub log_file: String,
    pub log_to_stdout: bool,
    pub database_path: String,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_duration_minutes: u64,
    /// How many past token windows are still accepted when verifying a
    /// rotating attendance token. `1` means the current and previous window.
    pub token_window_tolerance: i64,
    /// Fallback geofence radius in meters for classrooms without their own.
    pub default_geofence_radius_m: f64,
    /// Rejected attempts by one student before `high_frequency` fires.
    pub high_frequency_threshold: u64,
    /// Distinct device fingerprints for one student before `multiple_devices` fires.
    pub multi_device_threshold: u64,
    /// Distinct students behind one IP or device before a sharing pattern fires.
    pub shared_actor_threshold: u64,
}

static CONFIG_INSTANCE: OnceLock<RwLock<AppConfig>> = OnceLock::new();

impl AppConfig {
    /// Reads the configuration from `.env` and the process environment.
    ///
    /// Panics if a variable is present but malformed; a misconfigured
    /// deployment should fail at startup, not at first use.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            env: env::var("APP_ENV").unwrap_or_else(|_| "development".into()),
            project_name: env::var("PROJECT_NAME").unwrap_or_else(|_| "attendance-engine".into()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "api=info".into()),
            log_file: env::var("LOG_FILE").unwrap_or_else(|_| "api.log".into()),
            log_to_stdout: env::var("LOG_TO_STDOUT").unwrap_or_else(|_| "false".into()) == "true",
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "data/attendance.db".into()),
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "3000".into())
                .parse()
                .unwrap(),
            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| "dev-only-insecure-secret".into()),
            jwt_duration_minutes: env::var("JWT_DURATION_MINUTES")
                .unwrap_or("60".into())
                .parse()
                .unwrap(),
            token_window_tolerance: env::var("TOKEN_WINDOW_TOLERANCE")
                .unwrap_or("1".into())
                .parse()
                .unwrap(),
            default_geofence_radius_m: env::var("DEFAULT_GEOFENCE_RADIUS_M")
                .unwrap_or("50".into())
                .parse()
                .unwrap(),
            high_frequency_threshold: env::var("HIGH_FREQUENCY_THRESHOLD")
                .unwrap_or("5".into())
                .parse()
                .unwrap(),
            multi_device_threshold: env::var("MULTI_DEVICE_THRESHOLD")
                .unwrap_or("3".into())
                .parse()
                .unwrap(),
            shared_actor_threshold: env::var("SHARED_ACTOR_THRESHOLD")
                .unwrap_or("2".into())
                .parse()
                .unwrap(),
        }
    }

    /// Shared read access to the global configuration.
    ///
    /// The returned guard must not be held across an `await`; copy the
    /// fields you need into locals first.
    pub fn global() -> std::sync::RwLockReadGuard<'static, AppConfig> {
        CONFIG_INSTANCE
            .get_or_init(|| RwLock::new(AppConfig::from_env()))
            .read()
            .expect("Failed to acquire AppConfig read lock")
    }

    /// Reloads from the environment, discarding any overrides.
    pub fn reset() {
        if let Some(lock) = CONFIG_INSTANCE.get() {
            let mut guard = lock.write().unwrap();
            *guard = AppConfig::from_env();
        }
    }

    fn set_field<F>(setter: F)
    where
        F: FnOnce(&mut AppConfig),
    {
        let lock = CONFIG_INSTANCE.get_or_init(|| RwLock::new(AppConfig::from_env()));
        let mut guard = lock
            .write()
            .expect("Failed to acquire AppConfig write lock");
        setter(&mut guard);
    }

    // Setters exist only for the knobs tests and operators actually turn;
    // bootstrap values like host and port are fixed for the process lifetime.

    pub fn set_database_path(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.database_path = value.into());
    }

    pub fn set_jwt_secret(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.jwt_secret = value.into());
    }

    pub fn set_token_window_tolerance(value: i64) {
        AppConfig::set_field(|cfg| cfg.token_window_tolerance = value);
    }

    pub fn set_default_geofence_radius_m(value: f64) {
        AppConfig::set_field(|cfg| cfg.default_geofence_radius_m = value);
    }

    pub fn set_high_frequency_threshold(value: u64) {
        AppConfig::set_field(|cfg| cfg.high_frequency_threshold = value);
    }

    pub fn set_multi_device_threshold(value: u64) {
        AppConfig::set_field(|cfg| cfg.multi_device_threshold = value);
    }

    pub fn set_shared_actor_threshold(value: u64) {
        AppConfig::set_field(|cfg| cfg.shared_actor_threshold = value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn overrides_apply_and_reset_restores_env_values() {
        AppConfig::set_token_window_tolerance(3);
        AppConfig::set_default_geofence_radius_m(80.0);
        {
            let cfg = AppConfig::global();
            assert_eq!(cfg.token_window_tolerance, 3);
            assert_eq!(cfg.default_geofence_radius_m, 80.0);
        }

        AppConfig::reset();
        let cfg = AppConfig::global();
        assert_eq!(cfg.token_window_tolerance, 1);
        assert_eq!(cfg.high_frequency_threshold, 5);
    }
}
