use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::{ops::ControlFlow, path::Path};
use tracing::{debug, info};

use super::{
    CureIt, FromPayload, ObjectId, Task,
    fields::{double_option, lenient_time},
};
use crate::{
    error::{AppError, AppResult},
    services::{
        progress::{self, ProgressEvent},
        raw_api::{Endpoint, RawApi},
    },
};

/// 一次分析，包含各平台上的任务
///
/// 任务按首次获取时的顺序保存，ID 在同一分析内唯一。
#[derive(Debug, Clone, Default)]
pub struct Analysis {
    api: Option<RawApi>,
    pub id: ObjectId,
    pub sha1: Option<String>,
    pub sample_id: Option<i64>,
    pub size: Option<u64>,
    pub format_name: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub user_name: Option<String>,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Default, Deserialize)]
struct AnalysisPatch {
    id: Option<ObjectId>,
    #[serde(default, deserialize_with = "double_option")]
    sha1: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    sample_id: Option<Option<i64>>,
    #[serde(default, deserialize_with = "double_option")]
    size: Option<Option<u64>>,
    #[serde(default, deserialize_with = "double_option")]
    format_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "lenient_time")]
    start_date: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "double_option")]
    user_name: Option<Option<String>>,
    #[serde(default)]
    tasks: Option<Vec<JsonValue>>,
}

impl Analysis {
    pub fn is_bound(&self) -> bool {
        self.api.is_some()
    }

    pub fn bound_api(&self) -> AppResult<&RawApi> {
        self.api.as_ref().ok_or_else(|| AppError::not_bound(Self::NAME))
    }

    fn endpoint(&self) -> AppResult<Endpoint> {
        Ok(self.bound_api()?.endpoint("analyses").join(&self.id))
    }

    /// 所有任务都已结束
    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(Task::is_finished)
    }

    pub fn is_processing(&self) -> bool {
        !self.is_finished()
    }

    /// 总进度：已结束的任务按 100 计，其余取各自进度，按任务数取平均
    pub fn total_progress(&self) -> f64 {
        if self.tasks.is_empty() {
            return 0.0;
        }

        let total: f64 = self
            .tasks
            .iter()
            .map(|task| {
                if task.is_processing() {
                    task.progress.unwrap_or(0.0)
                } else {
                    100.0
                }
            })
            .sum();
        total / self.tasks.len() as f64
    }

    pub fn task(&self, task_id: i64) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == task_id)
    }

    pub fn task_mut(&mut self, task_id: i64) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|task| task.id == task_id)
    }

    /// 完整更新：覆盖标量字段，任务按ID合并，未知任务追加到末尾
    pub fn update(&mut self, value: JsonValue) -> AppResult<()> {
        let patch: AnalysisPatch = serde_json::from_value(value)?;

        if let Some(id) = patch.id {
            self.id = id;
        }
        if let Some(sha1) = patch.sha1 {
            self.sha1 = sha1;
        }
        if let Some(sample_id) = patch.sample_id {
            self.sample_id = sample_id;
        }
        if let Some(size) = patch.size {
            self.size = size;
        }
        if let Some(format_name) = patch.format_name {
            self.format_name = format_name;
        }
        if let Some(start_date) = patch.start_date {
            self.start_date = start_date;
        }
        if let Some(user_name) = patch.user_name {
            self.user_name = user_name;
        }

        for task in patch.tasks.unwrap_or_default() {
            self.merge_task(task)?;
        }
        Ok(())
    }

    fn merge_task(&mut self, value: JsonValue) -> AppResult<()> {
        let task_id = value.get("id").and_then(JsonValue::as_i64);
        let existing = task_id.and_then(|id| self.tasks.iter_mut().find(|task| task.id == id));
        if let Some(task) = existing {
            debug!("更新分析 {} 的任务 {}", self.id, task.id);
            return task.update(value);
        }

        let task = Task::from_value(value, self.api.as_ref())?;
        debug!("分析 {} 新增任务 {}", self.id, task.id);
        self.tasks.push(task);
        Ok(())
    }

    /// 合并一条进度事件，未知任务忽略
    pub fn apply_progress(&mut self, event: &ProgressEvent) {
        match self.task_mut(event.task_id) {
            Some(task) => task.apply_progress(event),
            None => debug!("进度事件引用了未知任务 {}", event.task_id),
        }
    }

    /// 重新执行分析
    pub async fn restart(&mut self) -> AppResult<()> {
        debug!("重启分析 {}", self.id);
        match self.endpoint()?.join("restart").post_empty().await?.into_json() {
            Some(value @ JsonValue::Object(_)) => self.update(value),
            _ => Err(AppError::unexpected_response("重启分析的响应不是对象")),
        }
    }

    /// 删除分析，本地对象随之成为过期快照
    pub async fn delete(&self) -> AppResult<()> {
        debug!("删除分析 {}", self.id);
        self.endpoint()?.delete().await?;
        Ok(())
    }

    pub async fn download_archive(&self, output: &Path) -> AppResult<()> {
        debug!("下载分析 {} 的归档", self.id);
        self.endpoint()?.join("archive").download(output).await
    }

    pub async fn download_sample(&self, output: &Path) -> AppResult<()> {
        debug!("下载分析 {} 的样本", self.id);
        self.endpoint()?.join("sample").download(output).await
    }

    pub async fn cureit(&self) -> AppResult<Option<CureIt>> {
        debug!("获取分析 {} 的 CureIt!", self.id);
        match self.endpoint()?.join("cureit").get().await?.into_json() {
            Some(value @ JsonValue::Object(_)) => Ok(Some(CureIt::for_analysis(
                self.id.clone(),
                value,
                self.api.as_ref(),
            )?)),
            _ => {
                info!("未知的响应格式");
                Ok(None)
            }
        }
    }

    /// 拉取完整状态并合并
    pub async fn refresh(&mut self) -> AppResult<()> {
        debug!("刷新分析 {}", self.id);
        match self.endpoint()?.get().await?.into_json() {
            Some(value @ JsonValue::Object(_)) => self.update(value),
            _ => Err(AppError::unexpected_response("分析信息不是对象")),
        }
    }

    /// 订阅实时进度
    ///
    /// `on_event` 对每条进度事件调用一次，返回 `ControlFlow::Break` 提前结束。
    /// 已全部完成的分析直接返回验证错误，不建立连接。无论以何种方式结束，
    /// 返回前都会关闭连接并刷新分析。future 被中途丢弃时连接在后台关闭，
    /// `self` 保持订阅前的状态。
    pub async fn subscribe_progress<F>(&mut self, on_event: F) -> AppResult<()>
    where
        F: FnMut(&ProgressEvent) -> ControlFlow<()> + Send,
    {
        progress::subscribe(self, on_event).await
    }
}

impl FromPayload for Analysis {
    const NAME: &'static str = "Analysis";

    fn from_value(value: JsonValue, api: Option<&RawApi>) -> AppResult<Self> {
        let mut analysis = Analysis {
            api: api.cloned(),
            ..Default::default()
        };
        analysis.update(value)?;
        Ok(analysis)
    }
}
