//! 配置管理模块
//!
//! 提供TOML配置文件的读取、写入、校验和自动发现功能。

use crate::endpoints::EndpointList;
use crate::error::{Result, TranslationError};
use crate::types::{EndpointConfig, TranslationConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// 翻译库配置结构
///
/// 包含翻译参数和端点配置，支持从TOML文件加载和保存。
///
/// # 示例
///
/// ```rust,no_run
/// use vocab_translator::TranslationLibConfig;
///
/// // 从默认位置加载配置
/// let config = TranslationLibConfig::load_from_default_locations();
///
/// // 从指定文件加载配置
/// let config = TranslationLibConfig::from_file("translation-config.toml").unwrap();
///
/// // 保存配置到文件
/// config.save_to_file("output.toml").unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranslationLibConfig {
    /// 翻译配置
    #[serde(default)]
    pub translation: TranslationConfig,
    /// 端点配置
    #[serde(default)]
    pub endpoints: EndpointConfig,
}

impl TranslationLibConfig {
    /// 从TOML文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: TranslationLibConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// 保存配置到TOML文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 依次尝试多个常见位置，都不可用时使用默认配置
    pub fn load_from_default_locations() -> Self {
        let possible_paths = [
            "translation-config.toml",
            "config.toml",
            ".translation-config.toml",
        ];

        for path in &possible_paths {
            if Path::new(path).exists() {
                match Self::from_file(path) {
                    Ok(config) => {
                        info!("Loaded configuration from: {}", path);
                        return config;
                    }
                    Err(e) => {
                        warn!("Failed to load config from {}: {}", path, e);
                    }
                }
            }
        }

        info!("No configuration file found, using defaults");
        Self::default()
    }

    /// 生成示例配置文件
    pub fn generate_example_config<P: AsRef<Path>>(path: P) -> Result<()> {
        let mut example_config = Self::default();
        example_config.endpoints.primary = "https://translate.example.com/api/translate".to_string();
        example_config.endpoints.backups =
            vec!["https://backup.example.com/api/translate".to_string()];
        example_config
            .endpoints
            .model_rpm_caps
            .insert(example_config.translation.model.clone(), 30);
        example_config.save_to_file(path)?;
        Ok(())
    }

    /// 检查配置是否可以用来启动一次运行
    ///
    /// 超出范围的批次大小只记录警告，运行时会被截断到 [1, 20]。
    pub fn validate(&self) -> Result<()> {
        let t = &self.translation;
        if t.source_lang.trim().is_empty() || t.target_lang.trim().is_empty() {
            return Err(TranslationError::Config(
                "source_lang and target_lang must not be empty".to_string(),
            ));
        }
        if t.model.trim().is_empty() {
            return Err(TranslationError::Config("model must not be empty".to_string()));
        }
        if t.requests_per_minute == 0 {
            return Err(TranslationError::Config(
                "requests_per_minute must be greater than 0".to_string(),
            ));
        }
        if t.request_timeout_secs == 0 {
            return Err(TranslationError::Config(
                "request_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if t.clamped_batch_size() != t.batch_size {
            warn!(
                "batch_size {} 超出范围，将使用 {}",
                t.batch_size,
                t.clamped_batch_size()
            );
        }
        EndpointList::new(&self.endpoints.primary, &self.endpoints.backups)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("translation-config.toml");
        TranslationLibConfig::generate_example_config(&path).unwrap();

        let loaded = TranslationLibConfig::from_file(&path).unwrap();
        assert_eq!(loaded.translation.batch_size, 10);
        assert_eq!(loaded.endpoints.backups.len(), 1);
        assert_eq!(loaded.endpoints.model_cap("llama-3.1-8b-instant"), 30);
        loaded.validate().unwrap();
    }

    #[test]
    fn partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[translation]
target_lang = "ja"
low_resource_mode = true

[endpoints]
primary = "https://translate.example.com/api"
"#,
        )
        .unwrap();

        let config = TranslationLibConfig::from_file(&path).unwrap();
        assert_eq!(config.translation.target_lang, "ja");
        assert_eq!(config.translation.source_lang, "en");
        assert_eq!(config.translation.batch_delay_ms(), 3000);
        assert_eq!(config.endpoints.default_model_rpm_cap, 60);
        config.validate().unwrap();
    }

    #[test]
    fn malformed_toml_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[translation\nbatch_size = ").unwrap();
        let err = TranslationLibConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, TranslationError::TomlDe(_)));
    }

    #[test]
    fn validation_rejects_unusable_settings() {
        let mut config = TranslationLibConfig::default();
        assert!(config.validate().is_err());

        config.endpoints.primary = "http://insecure.example.com".to_string();
        assert!(config.validate().is_err());

        config.endpoints.primary = "https://secure.example.com".to_string();
        config.validate().unwrap();

        config.translation.requests_per_minute = 0;
        assert!(matches!(
            config.validate(),
            Err(TranslationError::Config(_))
        ));
    }
}
