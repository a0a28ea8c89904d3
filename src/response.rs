use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use crate::error::{AppError, AppResult};

/// 成功响应解码后的载荷
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// 可解析为JSON的响应体
    Json(JsonValue),
    /// 非JSON但非空的响应体
    Text(String),
    /// 空响应体
    Empty,
}

impl Payload {
    pub fn as_json(&self) -> Option<&JsonValue> {
        match self {
            Payload::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_json(self) -> Option<JsonValue> {
        match self {
            Payload::Json(value) => Some(value),
            _ => None,
        }
    }

    /// 取出JSON对象，其他形态返回 None
    pub fn into_object(self) -> Option<Map<String, JsonValue>> {
        match self {
            Payload::Json(JsonValue::Object(map)) => Some(map),
            _ => None,
        }
    }
}

/// 服务端使用的HTTP状态码
pub struct ResponseCode;

impl ResponseCode {
    /// 请求参数校验失败，响应体为 字段 -> 错误列表
    pub const VALIDATION_FAILED: u16 = 400;
}

/// 解码HTTP响应
///
/// 成功时依次尝试 JSON、非空文本、空；失败时优先取 `error` 字段，
/// 其次 `message` 字段，400 时汇总各字段的校验错误，否则为 "Unknown error"。
pub fn decode_response(status: u16, body: &[u8]) -> AppResult<Payload> {
    let json_body: Option<JsonValue> = serde_json::from_slice(body).ok();
    let text = String::from_utf8_lossy(body).into_owned();

    if (200..300).contains(&status) {
        debug!(status, len = body.len(), "响应成功");
        return Ok(match json_body {
            Some(value) => Payload::Json(value),
            None if !text.is_empty() => Payload::Text(text),
            None => Payload::Empty,
        });
    }

    debug!(status, "响应失败");
    let message = failure_message(status, json_body.as_ref());
    let raw_body = match json_body {
        Some(value) if !is_falsy(&value) => Some(value),
        _ if !text.is_empty() => Some(JsonValue::String(text)),
        _ => None,
    };

    Err(AppError::service(message, status, raw_body))
}

fn failure_message(status: u16, body: Option<&JsonValue>) -> String {
    let Some(JsonValue::Object(fields)) = body else {
        debug!("未知的错误响应格式: {:?}", body);
        return "Unknown error".to_string();
    };

    if let Some(error) = fields.get("error") {
        return value_to_string(error);
    }
    if let Some(message) = fields.get("message") {
        return value_to_string(message);
    }
    if status == ResponseCode::VALIDATION_FAILED && !fields.is_empty() {
        debug!("一个或多个请求参数不正确");
        return fields
            .iter()
            .map(|(field, errors)| {
                let info = match errors {
                    JsonValue::Array(items) => items
                        .iter()
                        .map(value_to_string)
                        .collect::<Vec<_>>()
                        .join("; "),
                    JsonValue::String(s) => s.clone(),
                    _ => "<UNKNOWN>".to_string(),
                };
                format!("[{}] {}", field, info)
            })
            .collect::<Vec<_>>()
            .join("\t");
    }

    "Unknown error".to_string()
}

/// 字符串原样输出，其他JSON值输出其序列化形式
pub(crate) fn value_to_string(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_falsy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => true,
        JsonValue::Bool(b) => !b,
        JsonValue::String(s) => s.is_empty(),
        JsonValue::Array(items) => items.is_empty(),
        JsonValue::Object(map) => map.is_empty(),
        JsonValue::Number(_) => false,
    }
}
