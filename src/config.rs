use crate::error::{AppError, AppResult};
use crate::services::raw_api::{DEFAULT_BASE_URL, DEFAULT_VERSION};
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, info};

/// 配置目录下的子目录名
const CONFIG_DIR_NAME: &str = "vxcube";
const CONFIG_FILE_NAME: &str = "config.toml";

/// 客户端配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub base_url: String,
    pub version: f64,
    /// HTTP 请求超时（秒），不设置时使用传输层默认行为
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            version: DEFAULT_VERSION,
            timeout_secs: None,
        }
    }
}

impl ClientConfig {
    /// 默认配置文件位置：`<config_dir>/vxcube/config.toml`
    pub fn default_path() -> AppResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
            .ok_or_else(|| AppError::config("无法确定用户配置目录"))
    }

    /// 从配置文件加载配置，文件不存在时返回默认值
    pub fn load<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("配置文件不存在，使用默认配置: {:?}", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&content)
            .map_err(|e| AppError::config(format!("解析配置文件失败: {}", e)))?;

        // 验证配置
        config.validate()?;

        Ok(config)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> AppResult<()> {
        let url = url::Url::parse(&self.base_url)
            .map_err(|e| AppError::config(format!("服务地址无效 {}: {}", self.base_url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::config("服务地址必须使用 http 或 https"));
        }

        if !self.version.is_finite() || self.version <= 0.0 {
            return Err(AppError::config("API版本必须为正数"));
        }

        if self.timeout_secs == Some(0) {
            return Err(AppError::config("超时时间不能为0"));
        }

        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// 保存配置到文件，自动创建上级目录
    pub fn save<P: AsRef<Path>>(&self, path: P) -> AppResult<()> {
        let path = path.as_ref();
        self.validate()?;

        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::config(format!("序列化配置失败: {}", e)))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        info!("配置已保存到 {:?}", path);
        Ok(())
    }

    /// 删除配置文件，返回是否确实删除了文件
    pub fn delete<P: AsRef<Path>>(path: P) -> AppResult<bool> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(path)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, "https://vxcube.drweb.com/");
        assert_eq!(config.version, 2.0);
        assert!(config.api_key.is_none());
        assert!(config.timeout().is_none());
    }

    #[test]
    fn test_config_validation() {
        let mut config = ClientConfig::default();
        assert!(config.validate().is_ok());

        config.base_url = "ftp://test".to_string();
        assert!(config.validate().is_err());

        config.base_url = "http://test".to_string();
        config.version = 0.0;
        assert!(config.validate().is_err());

        config.version = 2.0;
        config.timeout_secs = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = ClientConfig::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn test_save_and_load_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let original = ClientConfig {
            api_key: Some("key".to_string()),
            base_url: "http://localhost:8000/".to_string(),
            version: 2.1,
            timeout_secs: Some(30),
        };

        // 保存配置
        original.save(&path).unwrap();

        // 加载配置
        let loaded = ClientConfig::load(&path).unwrap();
        assert_eq!(original, loaded);
        assert_eq!(loaded.timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "api_key = \"abc\"\n").unwrap();

        let config = ClientConfig::load(&path).unwrap();
        assert_eq!(config.api_key.as_deref(), Some("abc"));
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_invalid_file_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "version = \"two\"\n").unwrap();
        assert!(matches!(
            ClientConfig::load(&path).unwrap_err(),
            AppError::Config(_)
        ));
    }

    #[test]
    fn test_delete() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        ClientConfig::default().save(&path).unwrap();

        assert!(ClientConfig::delete(&path).unwrap());
        assert!(!ClientConfig::delete(&path).unwrap());
    }
}
