//! 分页遍历
//!
//! 以固定的每页数量连续请求，偏移量每次增加请求的数量；返回空页或
//! 不足一页时即认为已到末尾。

use futures_util::{
    StreamExt, TryStreamExt,
    stream::{self, BoxStream},
};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::future::Future;
use tracing::debug;

use crate::{
    error::{AppError, AppResult},
    response::Payload,
};

/// 单次分页请求
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageRequest {
    pub count: usize,
    pub offset: usize,
}

/// 惰性遍历所有页面中的条目
pub fn iterate<'a, T, F, Fut>(
    fetch: F,
    count_per_request: usize,
    offset: usize,
) -> BoxStream<'a, AppResult<T>>
where
    T: Send + 'a,
    F: FnMut(PageRequest) -> Fut + Send + 'a,
    Fut: Future<Output = AppResult<Vec<T>>> + Send + 'a,
{
    let pages = stream::try_unfold(
        (fetch, offset, false),
        move |(mut fetch, offset, exhausted)| async move {
            if exhausted {
                return Ok::<_, AppError>(None);
            }
            if count_per_request == 0 {
                return Err(AppError::validation("每页数量必须大于0"));
            }

            let page = fetch(PageRequest {
                count: count_per_request,
                offset,
            })
            .await?;
            debug!(offset, count = count_per_request, received = page.len(), "获取分页");

            if page.is_empty() {
                return Ok(None);
            }
            let exhausted = page.len() < count_per_request;
            Ok(Some((page, (fetch, offset + count_per_request, exhausted))))
        },
    );

    pages
        .map_ok(|page| stream::iter(page.into_iter().map(Ok::<T, AppError>)))
        .try_flatten()
        .boxed()
}

/// 一次性取回所有页面中的条目
pub async fn all_items<T, F, Fut>(
    fetch: F,
    count_per_request: usize,
    offset: usize,
) -> AppResult<Vec<T>>
where
    T: Send,
    F: FnMut(PageRequest) -> Fut + Send,
    Fut: Future<Output = AppResult<Vec<T>>> + Send,
{
    iterate(fetch, count_per_request, offset).try_collect().await
}

/// 取出一页中的条目，`item_key` 指定包裹条目列表的字段
pub fn page_items(payload: Payload, item_key: Option<&str>) -> AppResult<Vec<JsonValue>> {
    let value = match payload {
        Payload::Json(value) => value,
        _ => return Ok(Vec::new()),
    };

    let value = match (item_key, value) {
        (Some(key), JsonValue::Object(mut fields)) => fields.remove(key).ok_or_else(|| {
            AppError::unexpected_response(format!("分页响应缺少字段 {}", key))
        })?,
        (_, value) => value,
    };

    match value {
        JsonValue::Array(items) => Ok(items),
        JsonValue::Null => Ok(Vec::new()),
        other => Err(AppError::unexpected_response(format!(
            "分页响应不是列表: {}",
            other
        ))),
    }
}
