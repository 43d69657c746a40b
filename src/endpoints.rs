//! 端点列表
//!
//! 主端点加备用端点的有序列表：去重、只接受 https，备用端点成功后可以被提升为主端点。

use crate::error::{Result, TranslationError};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// 提升端点后最多保留的备用端点数
pub const MAX_BACKUPS: usize = 3;

/// 有序端点列表
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointList {
    pub primary: String,
    pub backups: Vec<String>,
}

fn validate(endpoint: &str) -> Result<String> {
    let trimmed = endpoint.trim();
    let url = Url::parse(trimmed)
        .map_err(|e| TranslationError::InvalidEndpoint(format!("{}: {}", trimmed, e)))?;
    if url.scheme() != "https" {
        return Err(TranslationError::InvalidEndpoint(format!(
            "{}: only https endpoints are allowed",
            trimmed
        )));
    }
    Ok(trimmed.to_string())
}

impl EndpointList {
    /// 校验并去重
    ///
    /// 无效地址会被跳过并记录警告；如果主端点无效，第一个有效的备用端点顶替它。
    pub fn new(primary: &str, backups: &[String]) -> Result<Self> {
        let mut valid: Vec<String> = Vec::new();
        let mut last_error = None;

        for candidate in std::iter::once(primary).chain(backups.iter().map(String::as_str)) {
            if candidate.trim().is_empty() {
                continue;
            }
            match validate(candidate) {
                Ok(url) => {
                    if !valid.contains(&url) {
                        valid.push(url);
                    }
                }
                Err(e) => {
                    warn!("忽略无效端点: {}", e);
                    last_error = Some(e);
                }
            }
        }

        if valid.is_empty() {
            return Err(last_error.unwrap_or_else(|| {
                TranslationError::Config("no translation endpoint configured".to_string())
            }));
        }

        let primary = valid.remove(0);
        Ok(Self {
            primary,
            backups: valid,
        })
    }

    /// 按尝试顺序排列的全部端点
    pub fn ordered(&self) -> Vec<String> {
        std::iter::once(self.primary.clone())
            .chain(self.backups.iter().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        1 + self.backups.len()
    }

    /// 把 `ordered()` 中下标为 `index` 的端点提升为主端点
    ///
    /// 新的备用列表由原列表中排在它后面的端点加上旧主端点组成，最多 3 个；
    /// 排在它前面、本次已经失败的备用端点被移出。
    pub fn promote(&mut self, index: usize) -> bool {
        if index == 0 || index > self.backups.len() {
            return false;
        }
        let ordered = self.ordered();
        let new_primary = ordered[index].clone();
        let old_primary = self.primary.clone();

        let mut backups: Vec<String> = ordered[index + 1..].to_vec();
        backups.push(old_primary.clone());
        backups.truncate(MAX_BACKUPS);

        info!("端点 {} 被提升为主端点（原主端点 {}）", new_primary, old_primary);
        self.primary = new_primary;
        self.backups = backups;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(primary: &str, backups: &[&str]) -> EndpointList {
        let backups: Vec<String> = backups.iter().map(|s| s.to_string()).collect();
        EndpointList::new(primary, &backups).unwrap()
    }

    #[test]
    fn deduplicates_and_drops_non_https() {
        let endpoints = list(
            "https://a.example/translate",
            &[
                "https://a.example/translate",
                "http://b.example/translate",
                "not a url",
                "https://c.example/translate",
            ],
        );
        assert_eq!(endpoints.primary, "https://a.example/translate");
        assert_eq!(endpoints.backups, vec!["https://c.example/translate"]);
    }

    #[test]
    fn invalid_primary_falls_back_to_first_backup() {
        let endpoints = list("http://insecure.example", &["https://b.example"]);
        assert_eq!(endpoints.primary, "https://b.example");
        assert!(endpoints.backups.is_empty());
    }

    #[test]
    fn no_valid_endpoint_is_an_error() {
        let err = EndpointList::new("http://a.example", &[]).unwrap_err();
        assert!(matches!(err, TranslationError::InvalidEndpoint(_)));
        let err = EndpointList::new("", &[]).unwrap_err();
        assert!(matches!(err, TranslationError::Config(_)));
    }

    #[test]
    fn promotion_folds_old_primary_into_backups() {
        let mut endpoints = list("https://a.example", &["https://b.example", "https://c.example"]);
        assert!(endpoints.promote(2));
        assert_eq!(endpoints.primary, "https://c.example");
        assert_eq!(endpoints.backups, vec!["https://a.example"]);
    }

    #[test]
    fn promotion_keeps_untried_backups_first_and_caps() {
        let mut endpoints = list(
            "https://a.example",
            &[
                "https://b.example",
                "https://c.example",
                "https://d.example",
                "https://e.example",
                "https://f.example",
            ],
        );
        assert!(endpoints.promote(1));
        assert_eq!(endpoints.primary, "https://b.example");
        assert_eq!(
            endpoints.backups,
            vec!["https://c.example", "https://d.example", "https://e.example"]
        );
    }

    #[test]
    fn promoting_primary_is_a_no_op() {
        let mut endpoints = list("https://a.example", &["https://b.example"]);
        assert!(!endpoints.promote(0));
        assert!(!endpoints.promote(5));
        assert_eq!(endpoints.primary, "https://a.example");
    }
}
