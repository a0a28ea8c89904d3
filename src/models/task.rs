use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::{fmt, path::Path};
use tracing::{debug, info};

use super::{
    CureIt, FromPayload,
    fields::{double_option, lenient_time},
};
use crate::{
    error::{AppError, AppResult},
    services::{
        pagination::{self, PageRequest, page_items},
        progress::ProgressEvent,
        raw_api::{Endpoint, RawApi},
    },
};

/// 任务状态
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskStatus {
    /// 排队中
    #[default]
    InQueue,
    /// 分析中
    Processing,
    /// 成功完成
    Successful,
    /// 失败
    Failed,
    /// 已删除
    Deleted,
    /// 服务端新增的未知状态
    Other(String),
}

impl TaskStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TaskStatus::InQueue => "in queue",
            TaskStatus::Processing => "processing",
            TaskStatus::Successful => "successful",
            TaskStatus::Failed => "failed",
            TaskStatus::Deleted => "deleted",
            TaskStatus::Other(status) => status,
        }
    }

    /// 排队与分析中以外的状态都视为已结束
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::InQueue | TaskStatus::Processing)
    }
}

impl From<&str> for TaskStatus {
    fn from(value: &str) -> Self {
        match value {
            "in queue" => TaskStatus::InQueue,
            "processing" => TaskStatus::Processing,
            "successful" => TaskStatus::Successful,
            "failed" => TaskStatus::Failed,
            "deleted" => TaskStatus::Deleted,
            other => TaskStatus::Other(other.to_string()),
        }
    }
}

impl From<String> for TaskStatus {
    fn from(value: String) -> Self {
        TaskStatus::from(value.as_str())
    }
}

impl From<TaskStatus> for String {
    fn from(value: TaskStatus) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 分析中单个平台上的执行任务
///
/// `message`、`progress` 仅在分析中有意义，`verdict`、`rules` 仅在结束后有意义；
/// 状态变化时未随同提供的这四个字段会被清空。
#[derive(Debug, Clone, Default)]
pub struct Task {
    api: Option<RawApi>,
    pub id: i64,
    pub status: TaskStatus,
    pub platform_code: String,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub maliciousness: Option<i64>,
    pub message: Option<String>,
    pub progress: Option<f64>,
    pub verdict: Option<String>,
    pub rules: Option<JsonValue>,
}

#[derive(Debug, Default, Deserialize)]
struct TaskPatch {
    id: Option<i64>,
    status: Option<TaskStatus>,
    platform_code: Option<String>,
    #[serde(default, deserialize_with = "lenient_time")]
    start_date: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "lenient_time")]
    end_date: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "double_option")]
    maliciousness: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option")]
    message: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    progress: Option<Option<f64>>,
    #[serde(default, deserialize_with = "double_option")]
    verdict: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    rules: Option<Option<JsonValue>>,
}

/// 任务明细列表的查询条件
#[derive(Debug, Clone, Default, Serialize)]
struct ListingQuery<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    search: Option<&'a str>,
}

impl Task {
    pub fn is_bound(&self) -> bool {
        self.api.is_some()
    }

    pub fn bound_api(&self) -> AppResult<&RawApi> {
        self.api.as_ref().ok_or_else(|| AppError::not_bound(Self::NAME))
    }

    fn endpoint(&self) -> AppResult<Endpoint> {
        Ok(self.bound_api()?.endpoint("tasks").join(self.id))
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Successful
    }

    pub fn is_failed(&self) -> bool {
        self.status == TaskStatus::Failed
    }

    pub fn is_deleted(&self) -> bool {
        self.status == TaskStatus::Deleted
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_processing(&self) -> bool {
        !self.is_finished()
    }

    pub fn is_android(&self) -> bool {
        self.platform_code.starts_with("android")
    }

    /// 用服务端载荷中出现的字段覆盖当前值
    pub fn update(&mut self, value: JsonValue) -> AppResult<()> {
        let patch: TaskPatch = serde_json::from_value(value)?;
        self.apply(patch);
        Ok(())
    }

    fn apply(&mut self, mut patch: TaskPatch) {
        if let Some(status) = patch.status.take() {
            if status != self.status {
                debug!("任务 {} 状态变化: {} -> {}", self.id, self.status, status);
                patch.message.get_or_insert(None);
                patch.progress.get_or_insert(None);
                patch.verdict.get_or_insert(None);
                patch.rules.get_or_insert(None);
            }
            self.status = status;
        }

        if let Some(id) = patch.id {
            self.id = id;
        }
        if let Some(platform_code) = patch.platform_code {
            self.platform_code = platform_code;
        }
        if let Some(start_date) = patch.start_date {
            self.start_date = start_date;
        }
        if let Some(end_date) = patch.end_date {
            self.end_date = end_date;
        }
        if let Some(maliciousness) = patch.maliciousness {
            self.maliciousness = maliciousness;
        }
        if let Some(message) = patch.message {
            self.message = message;
        }
        if let Some(progress) = patch.progress {
            self.progress = progress;
        }
        if let Some(verdict) = patch.verdict {
            self.verdict = verdict;
        }
        if let Some(rules) = patch.rules {
            self.rules = rules;
        }
    }

    /// 合并一条进度事件，状态保持不变
    pub fn apply_progress(&mut self, event: &ProgressEvent) {
        self.progress = Some(event.progress);
        self.message = event.message.clone();
    }

    /// 获取任务的 CureIt!，安卓平台不生成
    pub async fn cureit(&self) -> AppResult<Option<CureIt>> {
        if self.is_android() {
            return Ok(None);
        }

        debug!("获取任务 {} 的 CureIt!", self.id);
        match self.endpoint()?.join("cureit").get().await?.into_json() {
            Some(value @ JsonValue::Object(_)) => Ok(Some(CureIt::for_task(
                self.id,
                value,
                self.api.as_ref(),
            )?)),
            _ => {
                info!("未知的响应格式");
                Ok(None)
            }
        }
    }

    async fn listing(
        &self,
        resource: &str,
        count: Option<usize>,
        offset: Option<usize>,
        search: Option<&str>,
    ) -> AppResult<Vec<JsonValue>> {
        debug!("获取任务 {} 的 {}", self.id, resource);
        let query = ListingQuery {
            count,
            offset,
            search,
        };
        let payload = self
            .endpoint()?
            .join(resource)
            .get_with(serde_json::to_value(query)?)
            .await?;
        page_items(payload, Some("items"))
    }

    fn listing_iter(
        &self,
        resource: &'static str,
        count_per_request: usize,
        search: Option<String>,
    ) -> BoxStream<'_, AppResult<JsonValue>> {
        debug!("遍历任务 {} 的 {}", self.id, resource);
        pagination::iterate(
            move |page: PageRequest| {
                let search = search.clone();
                async move {
                    self.listing(resource, Some(page.count), Some(page.offset), search.as_deref())
                        .await
                }
            },
            count_per_request,
            0,
        )
    }

    /// 内存转储列表
    pub async fn dumps(
        &self,
        count: Option<usize>,
        offset: Option<usize>,
        search: Option<&str>,
    ) -> AppResult<Vec<JsonValue>> {
        self.listing("dumps", count, offset, search).await
    }

    pub fn dumps_iter(
        &self,
        count_per_request: usize,
        search: Option<String>,
    ) -> BoxStream<'_, AppResult<JsonValue>> {
        self.listing_iter("dumps", count_per_request, search)
    }

    /// 释放的文件列表
    pub async fn drops(
        &self,
        count: Option<usize>,
        offset: Option<usize>,
        search: Option<&str>,
    ) -> AppResult<Vec<JsonValue>> {
        self.listing("drops", count, offset, search).await
    }

    pub fn drops_iter(
        &self,
        count_per_request: usize,
        search: Option<String>,
    ) -> BoxStream<'_, AppResult<JsonValue>> {
        self.listing_iter("drops", count_per_request, search)
    }

    /// 网络活动
    pub async fn networks(
        &self,
        count: Option<usize>,
        offset: Option<usize>,
        search: Option<&str>,
    ) -> AppResult<Vec<JsonValue>> {
        self.listing("networks", count, offset, search).await
    }

    pub fn networks_iter(
        &self,
        count_per_request: usize,
        search: Option<String>,
    ) -> BoxStream<'_, AppResult<JsonValue>> {
        self.listing_iter("networks", count_per_request, search)
    }

    /// API 调用日志
    pub async fn api_log(
        &self,
        count: Option<usize>,
        offset: Option<usize>,
        search: Option<&str>,
    ) -> AppResult<Vec<JsonValue>> {
        self.listing("api_log", count, offset, search).await
    }

    pub fn api_log_iter(
        &self,
        count_per_request: usize,
        search: Option<String>,
    ) -> BoxStream<'_, AppResult<JsonValue>> {
        self.listing_iter("api_log", count_per_request, search)
    }

    /// 安卓 intent 列表
    pub async fn intents(
        &self,
        count: Option<usize>,
        offset: Option<usize>,
        search: Option<&str>,
    ) -> AppResult<Vec<JsonValue>> {
        self.listing("intents", count, offset, search).await
    }

    pub fn intents_iter(
        &self,
        count_per_request: usize,
        search: Option<String>,
    ) -> BoxStream<'_, AppResult<JsonValue>> {
        self.listing_iter("intents", count_per_request, search)
    }

    pub async fn phone_actions(
        &self,
        count: Option<usize>,
        offset: Option<usize>,
        search: Option<&str>,
    ) -> AppResult<Vec<JsonValue>> {
        self.listing("phone_actions", count, offset, search).await
    }

    pub fn phone_actions_iter(
        &self,
        count_per_request: usize,
        search: Option<String>,
    ) -> BoxStream<'_, AppResult<JsonValue>> {
        self.listing_iter("phone_actions", count_per_request, search)
    }

    /// 归档中的文件与目录
    pub async fn storage_list(&self) -> AppResult<JsonValue> {
        debug!("获取任务 {} 的归档文件列表", self.id);
        let payload = self.endpoint()?.join("archive_storage").get().await?;
        Ok(payload.into_json().unwrap_or(JsonValue::Null))
    }

    /// 从归档中下载单个文件
    pub async fn download_storage_file(&self, path: &str, output: &Path) -> AppResult<()> {
        debug!("从归档下载文件 {}", path);
        self.endpoint()?
            .join("archive_storage")
            .download_with(json!({ "path": path }), output)
            .await
    }

    /// 重新执行任务，仅失败或已删除的任务可以重启
    pub async fn restart(&mut self) -> AppResult<bool> {
        if !self.is_failed() && !self.is_deleted() {
            info!("任务 {} 当前状态为 {}，不能重启", self.id, self.status);
            return Ok(false);
        }

        debug!("重启任务 {}", self.id);
        let payload = self.endpoint()?.join("restart").post_empty().await?;
        if let Some(value @ JsonValue::Object(_)) = payload.into_json() {
            self.update(value)?;
        }
        Ok(true)
    }

    pub async fn download_archive(&self, output: &Path) -> AppResult<()> {
        debug!("下载任务 {} 的归档", self.id);
        self.endpoint()?.join("archive").download(output).await
    }

    pub async fn download_report(&self, output: &Path) -> AppResult<()> {
        debug!("下载任务 {} 的报告", self.id);
        self.endpoint()?.join("report").download(output).await
    }

    pub async fn download_sample(&self, output: &Path) -> AppResult<()> {
        debug!("下载任务 {} 的样本", self.id);
        self.endpoint()?.join("sample").download(output).await
    }

    pub async fn refresh(&mut self) -> AppResult<()> {
        debug!("刷新任务 {}", self.id);
        match self.endpoint()?.get().await?.into_json() {
            Some(value @ JsonValue::Object(_)) => self.update(value),
            _ => Err(AppError::unexpected_response("任务信息不是对象")),
        }
    }
}

impl FromPayload for Task {
    const NAME: &'static str = "Task";

    fn from_value(value: JsonValue, api: Option<&RawApi>) -> AppResult<Self> {
        let mut task = Task {
            api: api.cloned(),
            ..Default::default()
        };
        task.update(value)?;
        Ok(task)
    }
}
