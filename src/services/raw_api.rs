use bytes::Bytes;
use reqwest::Method;
use serde_json::Value as JsonValue;
use std::{
    fmt,
    path::Path,
    sync::{Arc, RwLock},
    time::Duration,
};
use tokio::fs;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    error::{AppError, AppResult},
    response::{Payload, decode_response},
    services::{
        progress::{ProgressConnector, TungsteniteConnector},
        transport::{HttpRequest, HttpTransport, RequestBody, ReqwestTransport},
    },
};

/// 默认服务地址
pub const DEFAULT_BASE_URL: &str = "https://vxcube.drweb.com/";
/// 默认API版本
pub const DEFAULT_VERSION: f64 = 2.0;

/// 解析API版本号，必须是合法的浮点数
pub fn parse_version(version: &str) -> AppResult<f64> {
    version
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| AppError::validation("Version must be a valid float"))
}

/// 版本号格式化，整数版本保留一位小数（2.0 -> "2.0"）
pub fn format_version(version: f64) -> String {
    if version.fract() == 0.0 {
        format!("{:.1}", version)
    } else {
        format!("{}", version)
    }
}

/// 将HTTP地址映射为对应的WebSocket地址（https -> wss，其余 -> ws）
pub fn stream_url(http_url: &str) -> AppResult<String> {
    let parsed = Url::parse(http_url)
        .map_err(|e| AppError::config(format!("无效的URL {}: {}", http_url, e)))?;
    let scheme = if parsed.scheme() == "https" { "wss" } else { "ws" };
    let rest = &parsed.as_str()[parsed.scheme().len()..];
    Ok(format!("{}{}", scheme, rest))
}

struct RawApiInner {
    base_url: String,
    version: f64,
    api_key: RwLock<Option<String>>,
    transport: Arc<dyn HttpTransport>,
    connector: Arc<dyn ProgressConnector>,
}

/// vxCube 原始API句柄
///
/// 持有服务地址、认证头与传输层，克隆后共享同一份状态；
/// 所有领域对象通过它发起后续请求。
#[derive(Clone)]
pub struct RawApi {
    inner: Arc<RawApiInner>,
}

impl fmt::Debug for RawApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawApi")
            .field("base_url", &self.inner.base_url)
            .field("version", &self.inner.version)
            .field("has_api_key", &self.api_key().is_some())
            .finish()
    }
}

impl RawApi {
    pub fn new(
        api_key: Option<String>,
        base_url: &str,
        version: f64,
        transport: Arc<dyn HttpTransport>,
        connector: Arc<dyn ProgressConnector>,
    ) -> AppResult<Self> {
        let root = Url::parse(base_url)
            .map_err(|e| AppError::config(format!("无效的服务地址 {}: {}", base_url, e)))?;
        let base_url = root
            .join(&format!("api-{}/", format_version(version)))
            .map_err(|e| AppError::config(format!("拼接API地址失败: {}", e)))?
            .to_string();

        if version < 2.0 {
            warn!("API version {} is out of date", format_version(version));
        }
        debug!("API地址: {}", base_url);

        Ok(Self {
            inner: Arc::new(RawApiInner {
                base_url,
                version,
                api_key: RwLock::new(api_key),
                transport,
                connector,
            }),
        })
    }

    /// 使用 reqwest 与 tokio-tungstenite 创建
    pub fn connect(
        api_key: Option<String>,
        base_url: &str,
        version: f64,
        timeout: Option<Duration>,
    ) -> AppResult<Self> {
        let transport = Arc::new(ReqwestTransport::new(timeout)?);
        let connector = Arc::new(TungsteniteConnector::default());
        Self::new(api_key, base_url, version, transport, connector)
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn version(&self) -> f64 {
        self.inner.version
    }

    pub fn api_key(&self) -> Option<String> {
        self.inner
            .api_key
            .read()
            .map(|key| key.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn set_api_key(&self, api_key: Option<String>) {
        let mut guard = self
            .inner
            .api_key
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = api_key;
    }

    /// 每个请求携带的公共请求头
    pub fn headers(&self) -> Vec<(String, String)> {
        match self.api_key() {
            Some(key) => vec![("Authorization".to_string(), format!("api-key {}", key))],
            None => Vec::new(),
        }
    }

    /// 两个句柄是否指向同一份状态
    pub fn ptr_eq(&self, other: &RawApi) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// 从根地址开始拼接路径
    pub fn endpoint(&self, segment: impl fmt::Display) -> Endpoint {
        Endpoint {
            api: self.clone(),
            url: self.inner.base_url.trim_end_matches('/').to_string(),
        }
        .join(segment)
    }

    pub(crate) fn connector(&self) -> &Arc<dyn ProgressConnector> {
        &self.inner.connector
    }

    async fn send(&self, method: Method, url: &str, body: RequestBody) -> AppResult<(u16, Bytes)> {
        let request = HttpRequest {
            method,
            url: url.to_string(),
            headers: self.headers(),
            body,
        };
        let response = self.inner.transport.send(request).await?;
        Ok((response.status, response.body))
    }

    /// 发送请求并解码响应
    pub async fn request(&self, method: Method, url: &str, body: RequestBody) -> AppResult<Payload> {
        let (status, body) = self.send(method, url, body).await?;
        decode_response(status, &body)
    }

    /// 发送请求并将成功的响应体写入文件
    pub async fn download(&self, url: &str, body: RequestBody, output: &Path) -> AppResult<()> {
        let (status, data) = self.send(Method::GET, url, body).await?;
        if !(200..300).contains(&status) {
            decode_response(status, &data)?;
            return Err(AppError::service("Unknown error", status, None));
        }

        debug!("保存响应到文件: {:?}", output);
        fs::write(output, &data).await?;
        info!("已下载 {} 字节到 {:?}", data.len(), output);
        Ok(())
    }
}

/// 由 RawApi 拼接出的资源地址
#[derive(Debug, Clone)]
pub struct Endpoint {
    api: RawApi,
    url: String,
}

impl Endpoint {
    pub fn join(&self, segment: impl fmt::Display) -> Endpoint {
        let segment = segment.to_string();
        Endpoint {
            api: self.api.clone(),
            url: format!("{}/{}", self.url, segment.trim_matches('/')),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn get(&self) -> AppResult<Payload> {
        self.api.request(Method::GET, &self.url, RequestBody::Empty).await
    }

    /// 列表接口以JSON请求体传递过滤条件
    pub async fn get_with(&self, json: JsonValue) -> AppResult<Payload> {
        self.api
            .request(Method::GET, &self.url, RequestBody::Json(json))
            .await
    }

    pub async fn post(&self, json: JsonValue) -> AppResult<Payload> {
        self.api
            .request(Method::POST, &self.url, RequestBody::Json(json))
            .await
    }

    pub async fn post_empty(&self) -> AppResult<Payload> {
        self.api
            .request(Method::POST, &self.url, RequestBody::Empty)
            .await
    }

    pub async fn put_empty(&self) -> AppResult<Payload> {
        self.api
            .request(Method::PUT, &self.url, RequestBody::Empty)
            .await
    }

    pub async fn delete(&self) -> AppResult<Payload> {
        self.api
            .request(Method::DELETE, &self.url, RequestBody::Empty)
            .await
    }

    /// 以 multipart 字段 `file` 上传本地文件
    pub async fn upload(&self, path: &Path) -> AppResult<Payload> {
        let data = fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("sample")
            .to_string();

        if data.is_empty() {
            return Err(AppError::validation(format!(
                "文件 {} 为空，无法上传",
                file_name
            )));
        }

        info!("上传文件: {}, 大小: {} 字节", file_name, data.len());
        let body = RequestBody::File {
            field: "file".to_string(),
            file_name,
            data: Bytes::from(data),
        };
        self.api.request(Method::POST, &self.url, body).await
    }

    pub async fn download(&self, output: &Path) -> AppResult<()> {
        self.api.download(&self.url, RequestBody::Empty, output).await
    }

    pub async fn download_with(&self, json: JsonValue, output: &Path) -> AppResult<()> {
        self.api
            .download(&self.url, RequestBody::Json(json), output)
            .await
    }
}
