use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::{fmt, path::Path};
use tracing::{debug, info};

use super::{FromPayload, ObjectId, fields::double_option};
use crate::{
    error::{AppError, AppResult},
    services::raw_api::{Endpoint, RawApi},
};

/// CureIt! 生成状态
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CureItStatus {
    Successful,
    Failed,
    Deleted,
    #[default]
    Processing,
    /// 样本过小，不生成
    SmallFile,
    Other(String),
}

impl CureItStatus {
    pub fn as_str(&self) -> &str {
        match self {
            CureItStatus::Successful => "successful",
            CureItStatus::Failed => "failed",
            CureItStatus::Deleted => "deleted",
            CureItStatus::Processing => "processing",
            CureItStatus::SmallFile => "small_file",
            CureItStatus::Other(status) => status,
        }
    }
}

impl From<String> for CureItStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "successful" => CureItStatus::Successful,
            "failed" => CureItStatus::Failed,
            "deleted" => CureItStatus::Deleted,
            "processing" => CureItStatus::Processing,
            "small_file" => CureItStatus::SmallFile,
            _ => CureItStatus::Other(value),
        }
    }
}

impl From<CureItStatus> for String {
    fn from(value: CureItStatus) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for CureItStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CureIt! 所属的对象，分析与任务二选一
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CureItOwner {
    Analysis(ObjectId),
    Task(i64),
}

impl CureItOwner {
    /// 由两个可选ID构造，必须恰好提供一个
    pub fn from_ids(analysis_id: Option<ObjectId>, task_id: Option<i64>) -> AppResult<Self> {
        match (analysis_id.filter(|id| !id.is_empty()), task_id) {
            (Some(analysis_id), None) => Ok(CureItOwner::Analysis(analysis_id)),
            (None, Some(task_id)) => Ok(CureItOwner::Task(task_id)),
            (None, None) => Err(AppError::validation(
                "CureIt is not bound to Analysis or Task",
            )),
            (Some(_), Some(_)) => Err(AppError::validation(
                "CureIt cannot be bound to both Analysis and Task",
            )),
        }
    }
}

/// 为分析或任务生成的 CureIt! 清除工具
#[derive(Debug, Clone)]
pub struct CureIt {
    api: Option<RawApi>,
    owner: CureItOwner,
    pub status: CureItStatus,
    /// 重试信息，包含 `after` 表示需等待到该时间后才能重试
    pub retries: Option<JsonValue>,
}

#[derive(Debug, Default, Deserialize)]
struct CureItPatch {
    analysis_id: Option<ObjectId>,
    task_id: Option<i64>,
    status: Option<CureItStatus>,
    #[serde(default, deserialize_with = "double_option")]
    retries: Option<Option<JsonValue>>,
}

impl CureIt {
    pub fn new(owner: CureItOwner, value: JsonValue, api: Option<&RawApi>) -> AppResult<Self> {
        let mut cureit = CureIt {
            api: api.cloned(),
            owner,
            status: CureItStatus::default(),
            retries: None,
        };
        cureit.update(value)?;
        Ok(cureit)
    }

    pub fn for_analysis(
        analysis_id: ObjectId,
        value: JsonValue,
        api: Option<&RawApi>,
    ) -> AppResult<Self> {
        Self::new(CureItOwner::Analysis(analysis_id), value, api)
    }

    pub fn for_task(task_id: i64, value: JsonValue, api: Option<&RawApi>) -> AppResult<Self> {
        Self::new(CureItOwner::Task(task_id), value, api)
    }

    pub fn owner(&self) -> &CureItOwner {
        &self.owner
    }

    /// 更新状态与重试信息，所属对象不会改变
    pub fn update(&mut self, value: JsonValue) -> AppResult<()> {
        let patch: CureItPatch = serde_json::from_value(value)?;
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(retries) = patch.retries {
            self.retries = retries;
        }
        Ok(())
    }

    fn endpoint(&self) -> AppResult<Endpoint> {
        let api = self
            .api
            .as_ref()
            .ok_or_else(|| AppError::not_bound(Self::NAME))?;
        Ok(match &self.owner {
            CureItOwner::Analysis(id) => api.endpoint("analyses").join(id),
            CureItOwner::Task(id) => api.endpoint("tasks").join(id),
        })
    }

    pub fn is_success(&self) -> bool {
        self.status == CureItStatus::Successful
    }

    pub fn is_failed(&self) -> bool {
        self.status == CureItStatus::Failed
    }

    pub fn is_deleted(&self) -> bool {
        self.status == CureItStatus::Deleted
    }

    pub fn is_finished(&self) -> bool {
        self.status != CureItStatus::Processing
    }

    pub fn is_processing(&self) -> bool {
        !self.is_finished()
    }

    pub fn is_small_file(&self) -> bool {
        self.status == CureItStatus::SmallFile
    }

    /// 已删除，或失败且没有记录下一次重试时间时可以重试
    pub fn can_retry(&self) -> bool {
        let retry_scheduled = matches!(
            &self.retries,
            Some(JsonValue::Object(retries)) if retries.contains_key("after")
        );
        self.is_deleted() || (self.is_failed() && !retry_scheduled)
    }

    pub async fn download(&self, output: &Path) -> AppResult<()> {
        debug!("下载 {}", self);
        self.endpoint()?.join("cureit.exe").download(output).await
    }

    /// 请求重新生成，响应不是对象时返回 false
    pub async fn retry(&mut self) -> AppResult<bool> {
        debug!("重新生成 {}", self);
        match self.endpoint()?.join("cureit").put_empty().await?.into_json() {
            Some(value @ JsonValue::Object(_)) => {
                self.update(value)?;
                Ok(true)
            }
            _ => {
                info!("未知的响应格式");
                Ok(false)
            }
        }
    }
}

impl fmt::Display for CureIt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.owner {
            CureItOwner::Analysis(id) => {
                write!(f, "CureIt (Analysis[{}]) status: {}", id, self.status)
            }
            CureItOwner::Task(id) => write!(f, "CureIt (Task[{}]) status: {}", id, self.status),
        }
    }
}

impl FromPayload for CureIt {
    const NAME: &'static str = "CureIt";

    /// 所属对象取自载荷中的 `analysis_id` / `task_id`
    fn from_value(value: JsonValue, api: Option<&RawApi>) -> AppResult<Self> {
        let patch: CureItPatch = serde_json::from_value(value.clone())?;
        let owner = CureItOwner::from_ids(patch.analysis_id, patch.task_id)?;
        Self::new(owner, value, api)
    }
}
