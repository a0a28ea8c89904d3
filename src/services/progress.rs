//! 分析进度订阅
//!
//! 通过单个 WebSocket 连接接收分析内各任务的实时进度，并合并到本地的
//! `Analysis` 对象中。无论循环以何种方式结束（正常结束、对端关闭、调用方
//! 提前退出、出错），都会先关闭连接，再完整拉取一次分析状态进行对账。
//!
//! 事件先合并到分析的副本上，对账完成后才写回调用方的对象。订阅的 future
//! 在中途被丢弃（超时、`select!`）时，连接在后台关闭，
//! 调用方的对象保持订阅前的状态。

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{fmt::Debug, ops::ControlFlow};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        self, Message,
        client::IntoClientRequest,
        error::ProtocolError,
        http::{HeaderName, HeaderValue},
    },
};
use tracing::{debug, info, warn};

use crate::{
    error::{AppError, AppResult},
    models::Analysis,
    services::raw_api::stream_url,
};

/// 单条进度事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub task_id: i64,
    pub progress: f64,
    #[serde(default)]
    pub message: Option<String>,
}

/// 流式连接
#[async_trait]
pub trait ProgressSocket: Send {
    async fn send(&mut self, text: String) -> AppResult<()>;

    /// 读取下一条消息，`None` 表示流已结束
    async fn recv(&mut self) -> Option<AppResult<String>>;

    async fn close(&mut self) -> AppResult<()>;
}

/// 建立流式连接
#[async_trait]
pub trait ProgressConnector: Send + Sync + Debug {
    async fn connect(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> AppResult<Box<dyn ProgressSocket>>;
}

/// 基于 tokio-tungstenite 的连接器
#[derive(Debug, Clone, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl ProgressConnector for TungsteniteConnector {
    async fn connect(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> AppResult<Box<dyn ProgressSocket>> {
        let mut request = url.into_client_request().map_err(map_ws_error)?;
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| AppError::websocket(format!("无效的请求头 {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| AppError::websocket(format!("无效的请求头值: {}", e)))?;
            request.headers_mut().insert(name, value);
        }

        debug!("连接进度推送: {}", url);
        let (stream, _) = connect_async(request).await.map_err(map_ws_error)?;
        Ok(Box::new(TungsteniteSocket { stream }))
    }
}

struct TungsteniteSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl ProgressSocket for TungsteniteSocket {
    async fn send(&mut self, text: String) -> AppResult<()> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(map_ws_error)
    }

    async fn recv(&mut self) -> Option<AppResult<String>> {
        loop {
            let frame = match self.stream.next().await? {
                Ok(frame) => frame,
                Err(e) => return Some(Err(map_ws_error(e))),
            };
            match frame {
                Message::Text(text) => return Some(Ok(text)),
                Message::Binary(data) => {
                    return Some(Ok(String::from_utf8_lossy(&data).into_owned()));
                }
                Message::Close(_) => return Some(Err(AppError::ConnectionClosed)),
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }

    async fn close(&mut self) -> AppResult<()> {
        match self.stream.close(None).await {
            Ok(()) => Ok(()),
            Err(e) => match map_ws_error(e) {
                AppError::ConnectionClosed => Ok(()),
                other => Err(other),
            },
        }
    }
}

/// 持有流式连接，未显式关闭就被丢弃时交给运行时在后台关闭
struct SocketGuard {
    socket: Option<Box<dyn ProgressSocket>>,
}

impl SocketGuard {
    fn new(socket: Box<dyn ProgressSocket>) -> Self {
        Self {
            socket: Some(socket),
        }
    }

    async fn send(&mut self, text: String) -> AppResult<()> {
        match self.socket.as_mut() {
            Some(socket) => socket.send(text).await,
            None => Err(AppError::ConnectionClosed),
        }
    }

    async fn recv(&mut self) -> Option<AppResult<String>> {
        self.socket.as_mut()?.recv().await
    }

    async fn close(&mut self) -> AppResult<()> {
        match self.socket.take() {
            Some(mut socket) => socket.close().await,
            None => Ok(()),
        }
    }
}

impl Drop for SocketGuard {
    fn drop(&mut self) {
        let Some(mut socket) = self.socket.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("订阅被中断，在后台关闭进度连接");
                handle.spawn(async move {
                    if let Err(e) = socket.close().await {
                        debug!("关闭进度连接失败: {}", e);
                    }
                });
            }
            Err(_) => warn!("没有可用的运行时，进度连接未能正常关闭"),
        }
    }
}

fn map_ws_error(error: tungstenite::Error) -> AppError {
    match error {
        tungstenite::Error::ConnectionClosed
        | tungstenite::Error::AlreadyClosed
        | tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            AppError::ConnectionClosed
        }
        other => AppError::websocket(other.to_string()),
    }
}

/// 订阅分析进度
///
/// 每收到一条事件先合并到对应任务，再交给 `on_event`；`on_event` 返回
/// `ControlFlow::Break` 即提前结束订阅。返回前总会关闭连接并刷新分析。
/// future 被丢弃时 `analysis` 不会被修改。
pub(crate) async fn subscribe<F>(analysis: &mut Analysis, mut on_event: F) -> AppResult<()>
where
    F: FnMut(&ProgressEvent) -> ControlFlow<()> + Send,
{
    if analysis.is_finished() {
        debug!("分析 {} 已全部完成，无法订阅", analysis.id);
        return Err(AppError::validation("All tasks finished"));
    }

    let api = analysis.bound_api()?.clone();
    let url = stream_url(api.endpoint("ws").join("progress").url())?;
    let headers = api.headers();

    let mut staged = analysis.clone();
    let outcome = async {
        info!("订阅分析 {} 的进度", staged.id);
        let mut socket = SocketGuard::new(api.connector().connect(&url, &headers).await?);
        let result = receive_loop(&mut socket, &mut staged, &mut on_event).await;
        if let Err(e) = socket.close().await {
            debug!("关闭进度连接失败: {}", e);
        }
        result
    }
    .await;

    // 最终对账：以服务端完整状态为准
    let refreshed = staged.refresh().await;
    *analysis = staged;

    match (outcome, refreshed) {
        (Err(e), Err(refresh_err)) => {
            warn!("订阅结束后刷新分析 {} 失败: {}", analysis.id, refresh_err);
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
        (Ok(()), refreshed) => refreshed,
    }
}

async fn receive_loop<F>(
    socket: &mut SocketGuard,
    analysis: &mut Analysis,
    on_event: &mut F,
) -> AppResult<()>
where
    F: FnMut(&ProgressEvent) -> ControlFlow<()> + Send,
{
    let hello = json!({ "analysis_id": analysis.id }).to_string();
    debug!("发送 {}", hello);
    match socket.send(hello).await {
        Ok(()) => {}
        Err(AppError::ConnectionClosed) => {
            debug!("WebSocket closed");
            return Ok(());
        }
        Err(e) => return Err(e),
    }

    loop {
        let message = match socket.recv().await {
            None => break,
            Some(Ok(message)) => message,
            Some(Err(AppError::ConnectionClosed)) => {
                debug!("WebSocket closed");
                break;
            }
            Some(Err(e)) => return Err(e),
        };

        // 空消息表示服务端结束推送
        if message.is_empty() {
            break;
        }

        let event: ProgressEvent = serde_json::from_str(&message)?;
        analysis.apply_progress(&event);

        if on_event(&event).is_break() {
            debug!("调用方提前结束订阅");
            break;
        }
    }

    Ok(())
}
