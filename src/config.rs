//! Application configuration module / 应用配置模块
//!
//! Manages application configuration loaded from config.json
//! Creates default config file on first run / 首次运行时创建默认配置文件

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Overrides the config file location / 配置文件路径环境变量
pub const CONFIG_PATH_ENV: &str = "FINDEX_CLOUD_CONFIG";

/// Application configuration / 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration / 服务器配置
    pub server: ServerConfig,
    /// Metadata database configuration / 元数据数据库配置
    pub database: DatabaseConfig,
    /// Encrypted tables storage / 密文表存储配置
    pub indexes: IndexesConfig,
    /// Tenancy configuration / 租户配置
    pub tenancy: TenancyConfig,
    /// Request log configuration / 请求日志配置
    pub request_log: RequestLogConfig,
}

/// Server configuration / 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server host address / 服务器监听地址
    pub host: String,
    /// Server port / 服务器端口
    pub port: u16,
    /// Also listen on `[::1]` / 同时监听 IPv6 回环地址
    pub ipv6: bool,
    /// Maximum request body in bytes / 请求体大小上限
    pub body_limit: usize,
    /// Static files served for unknown routes / 静态文件目录
    pub static_dir: String,
}

/// Database configuration / 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Data directory path / 数据目录路径
    pub data_dir: String,
    /// Metadata database file (relative to data_dir) / 元数据数据库文件
    pub db_file: String,
    /// Full URL taking precedence over `db_file` / 完整数据库 URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexesConfig {
    /// `sqlite` or `memory`
    pub backend: String,
    /// Indexes database file (relative to data_dir) / 密文表数据库文件
    pub db_file: String,
}

/// Tenancy configuration / 租户配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TenancyConfig {
    pub multitenant: bool,
    /// Identity provider validating bearer tokens / 身份提供方
    pub auth0_domain: Option<String>,
    /// Console backend owning projects / 项目后端
    pub backend_domain: Option<String>,
    /// Validated token lifetime in cache / 令牌缓存秒数
    pub token_cache_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestLogConfig {
    pub enabled: bool,
    /// Log file (relative to data_dir) / 日志文件
    pub file: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            ipv6: true,
            body_limit: 50_000_000,
            static_dir: "static".to_string(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            db_file: "database.sqlite".to_string(),
            url: None,
        }
    }
}

impl Default for IndexesConfig {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            db_file: "indexes.sqlite".to_string(),
        }
    }
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            multitenant: false,
            auth0_domain: None,
            backend_domain: None,
            token_cache_seconds: 300,
        }
    }
}

impl Default for RequestLogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            file: "requests.log".to_string(),
        }
    }
}

impl AppConfig {
    /// Get the full database URL / 获取完整的数据库URL
    pub fn get_database_url(&self) -> String {
        if let Some(url) = &self.database.url {
            return url.clone();
        }
        let db_path = Path::new(&self.database.data_dir).join(&self.database.db_file);
        format!("sqlite:{}?mode=rwc", db_path.to_string_lossy())
    }

    /// Get the full data directory path / 获取完整的数据目录路径
    pub fn get_data_dir(&self) -> PathBuf {
        PathBuf::from(&self.database.data_dir)
    }

    pub fn get_indexes_db_path(&self) -> PathBuf {
        self.get_data_dir().join(&self.indexes.db_file)
    }

    pub fn get_request_log_path(&self) -> PathBuf {
        self.get_data_dir().join(&self.request_log.file)
    }

    /// Get the server bind address / 获取服务器绑定地址
    pub fn get_bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Apply environment variable overrides / 应用环境变量覆盖
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok().filter(|v| !v.is_empty()));
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("DATABASE_URL") {
            self.database.url = Some(url);
        }
        if let Some(backend) = var("INDEXES_DATABASE_TYPE") {
            self.indexes.backend = backend;
        }
        if let Some(domain) = var("AUTH0_DOMAIN") {
            self.tenancy.auth0_domain = Some(domain);
        }
        if let Some(domain) = var("BACKEND_DOMAIN") {
            self.tenancy.backend_domain = Some(domain);
        }
    }
}

/// Get the config file path / 获取配置文件路径
fn get_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("config.json")
}

/// Load configuration from file, or create default if not exists / 加载配置文件，不存在则创建默认配置
pub fn load_config() -> Result<AppConfig, String> {
    load_config_from(&get_config_path())
}

fn load_config_from(config_path: &Path) -> Result<AppConfig, String> {
    if config_path.exists() {
        let content = std::fs::read_to_string(config_path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let config: AppConfig = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config file: {}", e))?;

        tracing::info!("Loaded configuration from {:?}", config_path);
        Ok(config)
    } else {
        let config = AppConfig::default();
        save_config_to(&config, config_path)?;
        tracing::info!("Created default configuration at {:?}", config_path);
        Ok(config)
    }
}

/// Save configuration to file / 保存配置到文件
fn save_config_to(config: &AppConfig, config_path: &Path) -> Result<(), String> {
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;

    std::fs::write(config_path, content)
        .map_err(|e| format!("Failed to write config file: {}", e))?;

    Ok(())
}

/// Startup configuration: file, then environment / 启动配置：文件加环境变量
pub fn init_config() -> Result<AppConfig, String> {
    let mut config = load_config()?;
    config.apply_env_overrides();
    Ok(config)
}
