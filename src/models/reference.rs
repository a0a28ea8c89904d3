//! 只读的参考数据，不需要发起后续请求

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::{FromPayload, fields::optional_time};
use crate::{error::AppResult, services::raw_api::RawApi};

/// 支持的样本格式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Format {
    pub name: String,
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub platforms: Vec<String>,
}

/// 分析平台
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Platform {
    pub code: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub os_code: Option<String>,
}

/// 当前许可证
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct License {
    #[serde(default, deserialize_with = "optional_time")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "optional_time")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub uploads_spent: Option<u64>,
    #[serde(default)]
    pub uploads_total: Option<u64>,
    #[serde(default)]
    pub vnc_allowed: Option<bool>,
    #[serde(default)]
    pub cureit_allowed: Option<bool>,
    /// 单个样本的大小上限（字节）
    #[serde(default)]
    pub upload_max_size: Option<u64>,
    /// 分析时长上限（秒）
    #[serde(default)]
    pub max_run_time: Option<u64>,
}

macro_rules! reference_payload {
    ($($ty:ident),*) => {
        $(
            impl FromPayload for $ty {
                const NAME: &'static str = stringify!($ty);

                fn from_value(value: JsonValue, _api: Option<&RawApi>) -> AppResult<Self> {
                    Ok(serde_json::from_value(value)?)
                }
            }
        )*
    };
}

reference_payload!(Format, Platform, License);
