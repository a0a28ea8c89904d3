use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{
    Client, Method,
    multipart::{Form, Part},
};
use serde_json::Value as JsonValue;
use std::{fmt::Debug, time::Duration};
use tracing::debug;

use crate::error::{AppError, AppResult};

/// 请求体
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(JsonValue),
    /// multipart 上传的单个文件
    File {
        field: String,
        file_name: String,
        data: Bytes,
    },
}

/// 发往服务端的一次请求
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

/// 未解码的HTTP响应
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

/// HTTP 传输层
#[async_trait]
pub trait HttpTransport: Send + Sync + Debug {
    async fn send(&self, request: HttpRequest) -> AppResult<HttpResponse>;
}

/// 基于 reqwest 的传输实现
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// 创建传输层，未指定超时时使用 reqwest 默认行为
    pub fn new(timeout: Option<Duration>) -> AppResult<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| AppError::config(format!("创建HTTP客户端失败: {}", e)))?;
        Ok(Self { client })
    }

    async fn send_once(&self, request: &HttpRequest) -> Result<reqwest::Response, reqwest::Error> {
        let mut builder = self.client.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::File {
                field,
                file_name,
                data,
            } => {
                let part = Part::bytes(data.to_vec()).file_name(file_name.clone());
                builder.multipart(Form::new().part(field.clone(), part))
            }
        };

        builder.send().await
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> AppResult<HttpResponse> {
        debug!(method = %request.method, url = %request.url, "发送请求");

        let response = match self.send_once(&request).await {
            Ok(response) => response,
            Err(e) if e.is_connect() => {
                debug!("连接已断开，重试一次: {}", e);
                self.send_once(&request).await?
            }
            Err(e) => return Err(e.into()),
        };

        let status = response.status().as_u16();
        let body = response.bytes().await?;
        debug!(status, len = body.len(), "收到响应");

        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_transport() {
        assert!(ReqwestTransport::new(None).is_ok());
        assert!(ReqwestTransport::new(Some(Duration::from_secs(5))).is_ok());
    }

    #[tokio::test]
    async fn test_connection_refused_is_http_error() {
        // 本地无监听端口，重试一次后仍然失败
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = ReqwestTransport::new(Some(Duration::from_secs(5))).unwrap();
        let err = transport
            .send(HttpRequest {
                method: Method::GET,
                url: format!("http://{}/api-2.0/samples", addr),
                headers: Vec::new(),
                body: RequestBody::Empty,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Http(_)));
    }
}
