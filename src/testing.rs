//! 测试用的内存传输层与流式连接

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value as JsonValue;
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use crate::{
    error::{AppError, AppResult},
    services::{
        progress::{ProgressConnector, ProgressSocket},
        transport::{HttpRequest, HttpResponse, HttpTransport},
    },
};

/// 按顺序返回预设响应并记录所有请求
#[derive(Debug, Default)]
pub struct MockTransport {
    responses: Mutex<VecDeque<HttpResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn push_json(&self, status: u16, body: JsonValue) {
        self.push_bytes(status, body.to_string().as_bytes());
    }

    pub fn push_bytes(&self, status: u16, body: &[u8]) {
        self.responses.lock().unwrap().push_back(HttpResponse {
            status,
            body: Bytes::copy_from_slice(body),
        });
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> Option<HttpRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> AppResult<HttpResponse> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses.lock().unwrap().pop_front().ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!(
                "没有为 {} {} 预设响应",
                request.method,
                request.url
            ))
        })
    }
}

/// 流式连接上发生的调用
#[derive(Debug, Clone, PartialEq)]
pub enum SocketCall {
    Send(String),
    Close,
}

#[derive(Debug)]
enum Incoming {
    Message(String),
    Closed,
    Error(String),
}

#[derive(Debug, Default)]
struct ConnectorState {
    incoming: VecDeque<Incoming>,
    calls: Vec<SocketCall>,
    urls: Vec<String>,
    headers: Vec<Vec<(String, String)>>,
    send_closed: bool,
    hang_when_drained: bool,
    connect_error: Option<String>,
}

/// 预设消息序列的流式连接器
#[derive(Debug, Default, Clone)]
pub struct MockConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl MockConnector {
    pub fn push_message(&self, message: &str) {
        self.push(Incoming::Message(message.to_string()));
    }

    /// 对端关闭连接
    pub fn push_closed(&self) {
        self.push(Incoming::Closed);
    }

    pub fn push_error(&self, message: &str) {
        self.push(Incoming::Error(message.to_string()));
    }

    /// 发送时报告连接已关闭
    pub fn fail_send_with_closed(&self) {
        self.state.lock().unwrap().send_closed = true;
    }

    /// 预设消息读完后不再返回，模拟一直未结束的推送
    pub fn hang_when_drained(&self) {
        self.state.lock().unwrap().hang_when_drained = true;
    }

    pub fn fail_connect(&self, message: &str) {
        self.state.lock().unwrap().connect_error = Some(message.to_string());
    }

    pub fn calls(&self) -> Vec<SocketCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn connected_urls(&self) -> Vec<String> {
        self.state.lock().unwrap().urls.clone()
    }

    pub fn connected_headers(&self) -> Vec<Vec<(String, String)>> {
        self.state.lock().unwrap().headers.clone()
    }

    fn push(&self, incoming: Incoming) {
        self.state.lock().unwrap().incoming.push_back(incoming);
    }
}

#[async_trait]
impl ProgressConnector for MockConnector {
    async fn connect(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> AppResult<Box<dyn ProgressSocket>> {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = state.connect_error.clone() {
            return Err(AppError::websocket(message));
        }
        state.urls.push(url.to_string());
        state.headers.push(headers.to_vec());
        Ok(Box::new(MockSocket {
            state: self.state.clone(),
        }))
    }
}

struct MockSocket {
    state: Arc<Mutex<ConnectorState>>,
}

#[async_trait]
impl ProgressSocket for MockSocket {
    async fn send(&mut self, text: String) -> AppResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.send_closed {
            return Err(AppError::ConnectionClosed);
        }
        state.calls.push(SocketCall::Send(text));
        Ok(())
    }

    async fn recv(&mut self) -> Option<AppResult<String>> {
        let (incoming, hang) = {
            let mut state = self.state.lock().unwrap();
            (state.incoming.pop_front(), state.hang_when_drained)
        };
        let incoming = match incoming {
            Some(incoming) => incoming,
            None if hang => return std::future::pending().await,
            None => return None,
        };
        Some(match incoming {
            Incoming::Message(message) => Ok(message),
            Incoming::Closed => Err(AppError::ConnectionClosed),
            Incoming::Error(message) => Err(AppError::websocket(message)),
        })
    }

    async fn close(&mut self) -> AppResult<()> {
        self.state.lock().unwrap().calls.push(SocketCall::Close);
        Ok(())
    }
}
