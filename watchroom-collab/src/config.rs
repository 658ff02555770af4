use std::env;
use std::time::Duration;

/// Everything the core reads from the process environment, parsed once
/// at boot: a single env lookup with an inline default per field.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub port: u16,

    pub redis_host: String,
    pub redis_port: u16,
    pub redis_password: Option<String>,

    pub mongodb_uri: Option<String>,

    pub inactive_timeout: Duration,
    pub min_video_timeout_hours: f64,
    pub video_duration_multiplier: f64,

    pub is_encrypted_password: bool,

    pub log_level: String,
    pub log_to_files: bool,
    pub error_log_path: Option<String>,
    pub combined_log_path: Option<String>,
    pub node_env: String,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self {
            port: env_parsed("PORT", 8000),
            redis_host: env::var("REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            redis_port: env_parsed("REDIS_PORT", 6379),
            redis_password: env::var("REDIS_PASSWORD").ok().filter(|s| !s.is_empty()),
            mongodb_uri: env::var("MONGODB_URI").ok().filter(|s| !s.is_empty()),
            inactive_timeout: Duration::from_secs(env_parsed("INACTIVE_TIMEOUT", 300)),
            min_video_timeout_hours: env_parsed("MIN_VIDEO_TIMEOUT_HOURS", 2.0),
            video_duration_multiplier: env_parsed("VIDEO_DURATION_MULTIPLIER", 5.0),
            is_encrypted_password: env_bool("IS_ENCRYPTED_PASSWORD", false),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_to_files: env_bool("LOG_TO_FILES", false),
            error_log_path: env::var("ERROR_LOG_PATH").ok(),
            combined_log_path: env::var("COMBINED_LOG_PATH").ok(),
            node_env: env::var("NODE_ENV").unwrap_or_default(),
        }
    }

    /// The Redis connection URL built from the individual `REDIS_*` vars.
    pub fn redis_url(&self) -> String {
        match &self.redis_password {
            Some(password) => format!(
                "redis://:{password}@{}:{}",
                self.redis_host, self.redis_port
            ),
            None => format!("redis://{}:{}", self.redis_host, self.redis_port),
        }
    }

    pub fn is_production(&self) -> bool {
        self.node_env == "production"
    }

    /// The eviction timeout for a room, extended while a video is
    /// actively playing so a long video doesn't get cut off mid-watch.
    pub fn timeout_for(&self, playing_duration_seconds: Option<f64>) -> Duration {
        match playing_duration_seconds {
            Some(duration) => {
                let extended_hours =
                    (self.video_duration_multiplier * duration / 3600.0).max(self.min_video_timeout_hours);
                Duration::from_secs_f64(extended_hours * 3600.0)
            }
            None => self.inactive_timeout,
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_extends_for_long_videos() {
        let config = RuntimeConfig {
            min_video_timeout_hours: 2.0,
            video_duration_multiplier: 5.0,
            inactive_timeout: Duration::from_secs(300),
            ..blank()
        };

        // 5 x 120s = 600s = 0.1667h, below the 2h floor.
        assert_eq!(config.timeout_for(Some(120.0)), Duration::from_secs(7200));

        // 5 x 3600s = 5h, above the floor.
        let extended = config.timeout_for(Some(3600.0));
        assert_eq!(extended, Duration::from_secs(18000));

        assert_eq!(config.timeout_for(None), Duration::from_secs(300));
    }

    fn blank() -> RuntimeConfig {
        RuntimeConfig {
            port: 8000,
            redis_host: "localhost".into(),
            redis_port: 6379,
            redis_password: None,
            mongodb_uri: None,
            inactive_timeout: Duration::from_secs(300),
            min_video_timeout_hours: 2.0,
            video_duration_multiplier: 5.0,
            is_encrypted_password: false,
            log_level: "info".into(),
            log_to_files: false,
            error_log_path: None,
            combined_log_path: None,
            node_env: String::new(),
        }
    }
}
