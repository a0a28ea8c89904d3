pub mod analysis;
pub mod cureit;
pub mod fields;
pub mod reference;
pub mod sample;
pub mod session;
pub mod task;

pub use analysis::*;
pub use cureit::*;
pub use fields::ObjectId;
pub use reference::*;
pub use sample::*;
pub use session::*;
pub use task::*;

use serde_json::Value as JsonValue;
use tracing::debug;

use crate::{error::AppResult, response::Payload, services::raw_api::RawApi};

/// 可由服务端载荷构造的对象
pub trait FromPayload: Sized {
    /// 类型名，用于日志与错误信息
    const NAME: &'static str;

    /// 由单个JSON对象构造；`api` 为后续请求使用的句柄
    fn from_value(value: JsonValue, api: Option<&RawApi>) -> AppResult<Self>;
}

/// 载荷转换结果
#[derive(Debug, Clone, PartialEq)]
pub enum Hydrated<T> {
    One(T),
    Many(Vec<T>),
    Nothing,
}

impl<T> Hydrated<T> {
    /// 取单个对象；列表取第一个
    pub fn into_one(self) -> Option<T> {
        match self {
            Hydrated::One(item) => Some(item),
            Hydrated::Many(items) => items.into_iter().next(),
            Hydrated::Nothing => None,
        }
    }

    pub fn into_vec(self) -> Vec<T> {
        match self {
            Hydrated::One(item) => vec![item],
            Hydrated::Many(items) => items,
            Hydrated::Nothing => Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Hydrated::One(_) => false,
            Hydrated::Many(items) => items.is_empty(),
            Hydrated::Nothing => true,
        }
    }
}

/// 将响应载荷转换为领域对象
///
/// 对象 -> 一个，数组 -> 按顺序每个元素一个，其余 -> 无。
pub fn hydrate<T: FromPayload>(payload: Payload, api: Option<&RawApi>) -> AppResult<Hydrated<T>> {
    match payload {
        Payload::Json(value @ JsonValue::Object(_)) => {
            debug!("创建 {} 对象", T::NAME);
            Ok(Hydrated::One(T::from_value(value, api)?))
        }
        Payload::Json(JsonValue::Array(items)) => {
            debug!("创建 {} 个 {} 对象", items.len(), T::NAME);
            let objects = items
                .into_iter()
                .map(|item| T::from_value(item, api))
                .collect::<AppResult<Vec<_>>>()?;
            Ok(Hydrated::Many(objects))
        }
        _ => Ok(Hydrated::Nothing),
    }
}
