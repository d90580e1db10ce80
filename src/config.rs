//! 配置系统
//! 从环境变量加载所有配置，使用 Secret 包装敏感信息

use config::{Config, ConfigError, Environment};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// 监听地址，例如 "0.0.0.0:3000"
    pub addr: String,
    /// 优雅关闭超时时间（秒）
    pub graceful_shutdown_timeout_secs: u64,
    /// 会话空闲多久后被回收（秒）
    pub session_idle_timeout_secs: u64,
}

impl ServerConfig {
    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_timeout_secs)
    }
}

/// 键值存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// 数据库连接 URL（使用 Secret 包装，防止日志泄露）；memory 后端可不填
    pub url: Option<Secret<String>>,
    /// 最大连接数
    pub max_connections: u32,
    /// 最小连接数
    pub min_connections: u32,
    /// 获取连接超时时间（秒）
    pub acquire_timeout_secs: u64,
    /// 空闲连接超时时间（秒）
    pub idle_timeout_secs: u64,
    /// 连接最大生命周期（秒）
    pub max_lifetime_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别: trace, debug, info, warn, error
    pub level: String,
    /// 日志格式: json, pretty
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// JWT 密钥（使用 Secret 包装，防止日志泄露）
    pub jwt_secret: Secret<String>,
    /// 访问令牌过期时间（秒）
    pub access_token_exp_secs: u64,
}

/// 审计日志队列与持久化配置
#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// 队列达到该长度时立即刷盘
    pub batch_size: usize,
    /// 后台刷盘周期（秒）
    pub flush_interval_secs: u64,
    /// 保留天数，超过的条目在刷盘时被清除
    pub retention_days: i64,
    /// 刷盘失败后的首次退避（秒），之后按 2 的幂增长
    pub backoff_base_secs: u64,
    /// 退避上限（秒）
    pub backoff_max_secs: u64,
    /// 连续失败达到该次数后转入死信缓冲
    pub max_flush_attempts: u32,
    /// 死信 JSON-lines 文件（可选）
    pub dead_letter_path: Option<PathBuf>,
}

impl AuditConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    /// 第 `failures` 次连续失败后的等待时间
    pub fn backoff_for(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(16);
        let secs = self.backoff_base_secs.saturating_mul(1u64 << exp);
        Duration::from_secs(secs.min(self.backoff_max_secs))
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            flush_interval_secs: 30,
            retention_days: 90,
            backoff_base_secs: 30,
            backoff_max_secs: 600,
            max_flush_attempts: 5,
            dead_letter_path: None,
        }
    }
}

/// 分析计算模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyticsMode {
    /// 沿用占位数据：趋势为线性爬升、会话时长固定 30 分钟、校验错误随机
    #[default]
    Placeholder,
    /// 基于进度快照、登录/登出配对、失败的更新记录计算
    Measured,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    /// 缓存有效期（秒）
    pub cache_ttl_secs: u64,
    pub mode: AnalyticsMode,
}

impl AnalyticsConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 300,
            mode: AnalyticsMode::Placeholder,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AutoSaveConfig {
    /// 防抖延迟（毫秒）
    pub debounce_ms: u64,
    pub max_retries: u32,
    /// 第 n 次重试前等待 retry_base_ms × n
    pub retry_base_ms: u64,
    /// 草稿可恢复的最长时间（小时）
    pub recovery_window_hours: i64,
}

impl Default for AutoSaveConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 2000,
            max_retries: 3,
            retry_base_ms: 1000,
            recovery_window_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub security: SecurityConfig,
    pub audit: AuditConfig,
    pub analytics: AnalyticsConfig,
    pub autosave: AutoSaveConfig,
}

impl AppConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Config::builder();

        // 添加默认配置
        settings = settings
            .set_default("server.addr", "0.0.0.0:3000")?
            .set_default("server.graceful_shutdown_timeout_secs", 30)?
            .set_default("server.session_idle_timeout_secs", 1800)?
            .set_default("storage.backend", "memory")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout_secs", 30)?
            .set_default("database.idle_timeout_secs", 600)?
            .set_default("database.max_lifetime_secs", 1800)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")?
            .set_default("security.jwt_secret", "change-this-secret-in-production-min-32-chars!")?
            .set_default("security.access_token_exp_secs", 3600)?
            .set_default("audit.batch_size", 50)?
            .set_default("audit.flush_interval_secs", 30)?
            .set_default("audit.retention_days", 90)?
            .set_default("audit.backoff_base_secs", 30)?
            .set_default("audit.backoff_max_secs", 600)?
            .set_default("audit.max_flush_attempts", 5)?
            .set_default("analytics.cache_ttl_secs", 300)?
            .set_default("analytics.mode", "placeholder")?
            .set_default("autosave.debounce_ms", 2000)?
            .set_default("autosave.max_retries", 3)?
            .set_default("autosave.retry_base_ms", 1000)?
            .set_default("autosave.recovery_window_hours", 24)?;

        // 从环境变量加载配置（前缀为 NPH_）
        settings = settings.add_source(
            Environment::with_prefix("NPH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = settings.build()?.try_deserialize()?;

        // 验证配置
        config.validate()?;

        Ok(config)
    }

    /// 验证配置合法性
    pub fn validate(&self) -> Result<(), ConfigError> {
        // 验证端口范围
        if let Some(port_str) = self.server.addr.split(':').next_back() {
            if let Ok(port) = port_str.parse::<u16>() {
                if port != 0 && port < 1024 {
                    return Err(ConfigError::Message("Server port should be >= 1024".to_string()));
                }
            }
        }

        // 验证日志级别
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                )))
            }
        }

        // 验证日志格式
        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log format: {}. Must be one of: json, pretty",
                    self.logging.format
                )))
            }
        }

        if self.server.session_idle_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "server.session_idle_timeout_secs must be > 0".to_string(),
            ));
        }

        if self.storage.backend == StorageBackend::Postgres && self.database.url.is_none() {
            return Err(ConfigError::Message(
                "database.url is required when storage.backend = postgres".to_string(),
            ));
        }

        // 验证数据库连接池配置
        if self.database.max_connections < self.database.min_connections {
            return Err(ConfigError::Message(
                "max_connections must be >= min_connections".to_string(),
            ));
        }

        // 验证 JWT 密钥长度（至少 32 字符）
        if self.security.jwt_secret.expose_secret().len() < 32 {
            return Err(ConfigError::Message(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }

        if self.audit.batch_size == 0 {
            return Err(ConfigError::Message("audit.batch_size must be > 0".to_string()));
        }

        if self.audit.flush_interval_secs == 0 {
            return Err(ConfigError::Message(
                "audit.flush_interval_secs must be > 0".to_string(),
            ));
        }

        if self.audit.retention_days < 1 {
            return Err(ConfigError::Message("audit.retention_days must be >= 1".to_string()));
        }

        if self.audit.backoff_max_secs < self.audit.backoff_base_secs {
            return Err(ConfigError::Message(
                "audit.backoff_max_secs must be >= audit.backoff_base_secs".to_string(),
            ));
        }

        if self.audit.max_flush_attempts == 0 {
            return Err(ConfigError::Message(
                "audit.max_flush_attempts must be >= 1".to_string(),
            ));
        }

        if self.autosave.max_retries > 10 {
            return Err(ConfigError::Message(
                "autosave.max_retries must be between 0 and 10".to_string(),
            ));
        }

        Ok(())
    }
}
