use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::path::Path;
use tracing::debug;

use super::{
    FromPayload,
    fields::{double_option, lenient_time},
};
use crate::{
    error::{AppError, AppResult},
    services::raw_api::{Endpoint, RawApi},
};

/// 已上传的样本
#[derive(Debug, Clone, Default)]
pub struct Sample {
    api: Option<RawApi>,
    pub id: i64,
    /// 上传时的文件名
    pub name: Option<String>,
    /// 文件大小（字节）
    pub size: Option<u64>,
    /// 识别出的格式，未识别时为空
    pub format_name: Option<String>,
    pub upload_date: Option<DateTime<Utc>>,
    pub md5: Option<String>,
    pub sha1: Option<String>,
    pub sha256: Option<String>,
    pub is_x64: Option<bool>,
    /// 可用于分析的平台代码
    pub platforms: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SamplePatch {
    id: Option<i64>,
    #[serde(default, deserialize_with = "double_option")]
    name: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    size: Option<Option<u64>>,
    #[serde(default, deserialize_with = "double_option")]
    format_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "lenient_time")]
    upload_date: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "double_option")]
    md5: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    sha1: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    sha256: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    is_x64: Option<Option<bool>>,
    #[serde(default, deserialize_with = "double_option")]
    platforms: Option<Option<Vec<String>>>,
}

impl Sample {
    pub fn is_bound(&self) -> bool {
        self.api.is_some()
    }

    pub fn bound_api(&self) -> AppResult<&RawApi> {
        self.api.as_ref().ok_or_else(|| AppError::not_bound(Self::NAME))
    }

    fn endpoint(&self) -> AppResult<Endpoint> {
        Ok(self.bound_api()?.endpoint("samples").join(self.id))
    }

    /// 用服务端载荷中出现的字段覆盖当前值
    pub fn update(&mut self, value: JsonValue) -> AppResult<()> {
        let patch: SamplePatch = serde_json::from_value(value)?;
        if let Some(id) = patch.id {
            self.id = id;
        }
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(size) = patch.size {
            self.size = size;
        }
        if let Some(format_name) = patch.format_name {
            self.format_name = format_name;
        }
        if let Some(upload_date) = patch.upload_date {
            self.upload_date = upload_date;
        }
        if let Some(md5) = patch.md5 {
            self.md5 = md5;
        }
        if let Some(sha1) = patch.sha1 {
            self.sha1 = sha1;
        }
        if let Some(sha256) = patch.sha256 {
            self.sha256 = sha256;
        }
        if let Some(is_x64) = patch.is_x64 {
            self.is_x64 = is_x64;
        }
        if let Some(platforms) = patch.platforms {
            self.platforms = platforms.unwrap_or_default();
        }
        Ok(())
    }

    /// 下载样本文件
    pub async fn download(&self, output: &Path) -> AppResult<()> {
        debug!("下载样本 {}", self.id);
        self.endpoint()?.join("download").download(output).await
    }

    /// 重新获取样本信息
    pub async fn refresh(&mut self) -> AppResult<()> {
        debug!("刷新样本 {}", self.id);
        let payload = self.endpoint()?.get().await?;
        match payload.into_json() {
            Some(value @ JsonValue::Object(_)) => self.update(value),
            _ => Err(AppError::unexpected_response("样本信息不是对象")),
        }
    }
}

impl FromPayload for Sample {
    const NAME: &'static str = "Sample";

    fn from_value(value: JsonValue, api: Option<&RawApi>) -> AppResult<Self> {
        let mut sample = Sample {
            api: api.cloned(),
            ..Default::default()
        };
        sample.update(value)?;
        Ok(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockConnector, MockTransport};
    use chrono::Datelike;
    use serde_json::json;
    use std::sync::Arc;

    fn bound(transport: Arc<MockTransport>, value: JsonValue) -> Sample {
        let api = RawApi::new(
            None,
            "http://test",
            2.0,
            transport,
            Arc::new(MockConnector::default()),
        )
        .unwrap();
        Sample::from_value(value, Some(&api)).unwrap()
    }

    #[test]
    fn test_from_value() {
        let sample = Sample::from_value(
            json!({
                "id": 7,
                "name": "calc.exe",
                "size": 1024,
                "format_name": "exe",
                "upload_date": "2019-04-01T12:00:00",
                "md5": "m", "sha1": "s1", "sha256": "s256",
                "is_x64": false,
                "platforms": ["winxpx86", "win7x64"],
                "unknown_field": {"ignored": true}
            }),
            None,
        )
        .unwrap();

        assert_eq!(sample.id, 7);
        assert_eq!(sample.name.as_deref(), Some("calc.exe"));
        assert_eq!(sample.upload_date.unwrap().year(), 2019);
        assert_eq!(sample.platforms, vec!["winxpx86", "win7x64"]);
        assert!(!sample.is_bound());
    }

    #[test]
    fn test_null_clears_absent_keeps() {
        let mut sample =
            Sample::from_value(json!({"id": 1, "name": "a", "format_name": "exe"}), None).unwrap();
        sample
            .update(json!({"format_name": null, "upload_date": ""}))
            .unwrap();
        assert_eq!(sample.name.as_deref(), Some("a"));
        assert_eq!(sample.format_name, None);
        assert_eq!(sample.upload_date, None);
    }

    #[tokio::test]
    async fn test_unbound_download_fails() {
        let sample = Sample::from_value(json!({"id": 1}), None).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let err = sample.download(&dir.path().join("x")).await.unwrap_err();
        assert!(matches!(err, AppError::NotBound { .. }));
    }

    #[tokio::test]
    async fn test_download_and_refresh() {
        let transport = Arc::new(MockTransport::default());
        transport.push_bytes(200, b"content");
        transport.push_json(200, json!({"id": 5, "format_name": "dll"}));
        let mut sample = bound(transport.clone(), json!({"id": 5}));
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.bin");

        sample.download(&output).await.unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), b"content");
        assert_eq!(
            transport.last_request().unwrap().url,
            "http://test/api-2.0/samples/5/download"
        );

        sample.refresh().await.unwrap();
        assert_eq!(sample.format_name.as_deref(), Some("dll"));
        assert_eq!(
            transport.last_request().unwrap().url,
            "http://test/api-2.0/samples/5"
        );
    }
}
