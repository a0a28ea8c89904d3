use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

use super::Console;
use crate::{cli::ConfigArgs, config::ClientConfig, error::AppResult};

/// 保存默认配置，未指定的值沿用当前配置文件中的值
pub fn save_config<W: Write>(
    path: &Path,
    args: ConfigArgs,
    console: &mut Console<W>,
) -> AppResult<()> {
    if args.delete {
        info!("尝试删除配置文件 {:?}", path);
        if ClientConfig::delete(path)? {
            console.line("配置已删除")?;
        } else {
            warn!("配置文件不存在: {:?}", path);
            console.line("没有可删除的配置")?;
        }
        return Ok(());
    }

    let mut config = ClientConfig::load(path)?;
    if let Some(api_key) = args.api_key {
        config.api_key = Some(api_key);
    }
    if let Some(base_url) = args.base_url {
        config.base_url = base_url;
    }
    if let Some(version) = args.version {
        config.version = version;
    }
    if let Some(timeout) = args.timeout {
        config.timeout_secs = Some(timeout);
    }

    config.save(path)?;
    console.line(format!("配置已保存到 {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{console, output};

    fn args() -> ConfigArgs {
        ConfigArgs {
            delete: false,
            api_key: None,
            base_url: None,
            version: None,
            timeout: None,
        }
    }

    #[test]
    fn test_save_config_merges_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        ClientConfig {
            api_key: Some("old-key".to_string()),
            base_url: "http://old.url/".to_string(),
            ..Default::default()
        }
        .save(&path)
        .unwrap();

        let mut out = console();
        save_config(
            &path,
            ConfigArgs {
                api_key: Some("new-key".to_string()),
                version: Some(42.0),
                ..args()
            },
            &mut out,
        )
        .unwrap();

        let saved = ClientConfig::load(&path).unwrap();
        assert_eq!(saved.api_key.as_deref(), Some("new-key"));
        assert_eq!(saved.base_url, "http://old.url/");
        assert_eq!(saved.version, 42.0);
        assert!(output(out).contains("配置已保存"));
    }

    #[test]
    fn test_save_config_rejects_bad_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let result = save_config(
            &path,
            ConfigArgs {
                base_url: Some("not a url".to_string()),
                ..args()
            },
            &mut console(),
        );
        assert!(result.is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_delete_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        ClientConfig::default().save(&path).unwrap();

        let mut out = console();
        save_config(&path, ConfigArgs { delete: true, ..args() }, &mut out).unwrap();
        assert!(!path.exists());
        assert!(output(out).contains("配置已删除"));

        let mut out = console();
        save_config(&path, ConfigArgs { delete: true, ..args() }, &mut out).unwrap();
        assert!(output(out).contains("没有可删除的配置"));
    }
}
