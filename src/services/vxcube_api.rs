use futures_util::stream::BoxStream;
use serde::Serialize;
use serde_json::{Value as JsonValue, json};
use std::{path::Path, time::Duration};
use tracing::{debug, error, info};

use crate::{
    error::{AppError, AppResult},
    models::{
        Analysis, Format, FromPayload, License, ObjectId, Platform, Sample, Session, Task,
        hydrate,
    },
    response::Payload,
    services::{
        pagination::{self, PageRequest},
        raw_api::RawApi,
    },
};

/// 样本列表过滤条件，未设置的字段不发送
#[derive(Debug, Clone, Default, Serialize)]
pub struct SampleFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format_group_name: Option<String>,
}

/// 分析列表过滤条件
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format_group_name: Option<String>,
}

/// 启动分析的参数
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisRequest {
    pub sample_id: i64,
    pub platforms: Vec<String>,
    /// 分析时长（秒）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_time: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_cmd: Option<String>,
    pub generate_cureit: bool,
    /// 释放文件总大小上限（MB）
    pub drop_size_limit: u32,
    /// 代理参数
    pub net: String,
    pub copylog: bool,
    /// Crypto API 缓冲区上限（MB）
    pub crypto_api_limit: u32,
    /// 转储大小上限（MB），范围 0..=512
    pub dump_size_limit: u32,
    pub flex_time: bool,
    /// 转发的端口，格式为 `protocol:port`，协议可省略
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forwards: Option<Vec<String>>,
    pub get_lib: bool,
    pub injects_limit: u32,
    pub monkey_clicker: bool,
    pub dump_browsers: bool,
    pub dump_mapped: bool,
    pub dump_ssdt: bool,
    pub dump_processes: bool,
    pub no_clean: bool,
    /// 可选断点的最大触发次数
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optional_count: Option<u32>,
    /// 进程存活时间，例如 `notepad.exe,35,winword.exe,20`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proc_lifetime: Option<String>,
    /// 系统日期，例如 `17.03.2022`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub userbatch: Option<String>,
    /// WriteFile 缓冲区上限（MB）
    pub write_file_limit: u32,
}

impl AnalysisRequest {
    pub fn new(sample_id: i64, platforms: Vec<String>) -> Self {
        Self {
            sample_id,
            platforms,
            analysis_time: Some(60),
            format_name: None,
            custom_cmd: None,
            generate_cureit: false,
            drop_size_limit: 64,
            net: "vpn://".to_string(),
            copylog: false,
            crypto_api_limit: 64,
            dump_size_limit: 64,
            flex_time: false,
            forwards: None,
            get_lib: false,
            injects_limit: 100,
            monkey_clicker: false,
            dump_browsers: true,
            dump_mapped: true,
            dump_ssdt: true,
            dump_processes: true,
            no_clean: false,
            optional_count: None,
            proc_lifetime: None,
            set_date: None,
            userbatch: None,
            write_file_limit: 512,
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.platforms.is_empty() {
            return Err(AppError::validation("至少需要指定一个平台"));
        }
        if self.dump_size_limit > 512 {
            return Err(AppError::validation("dump_size_limit 必须在 0 到 512 之间"));
        }
        Ok(())
    }
}

/// vxCube 客户端
#[derive(Debug, Clone)]
pub struct VxCubeApi {
    raw: RawApi,
}

impl VxCubeApi {
    /// 使用默认的 HTTP 与 WebSocket 实现创建客户端
    pub fn new(
        api_key: Option<String>,
        base_url: &str,
        version: f64,
        timeout: Option<Duration>,
    ) -> AppResult<Self> {
        Ok(Self {
            raw: RawApi::connect(api_key, base_url, version, timeout)?,
        })
    }

    pub fn with_raw_api(raw: RawApi) -> Self {
        Self { raw }
    }

    pub fn raw_api(&self) -> &RawApi {
        &self.raw
    }

    fn bound<T: FromPayload>(&self, payload: Payload) -> AppResult<Vec<T>> {
        Ok(hydrate::<T>(payload, Some(&self.raw))?.into_vec())
    }

    fn bound_one<T: FromPayload>(&self, payload: Payload) -> AppResult<T> {
        hydrate::<T>(payload, Some(&self.raw))?
            .into_one()
            .ok_or_else(|| AppError::unexpected_response(format!("响应中没有 {} 对象", T::NAME)))
    }

    /// 使用用户名和密码获取API密钥，成功后后续请求都使用该密钥
    pub async fn login(&self, login: &str, password: &str, new_key: bool) -> AppResult<String> {
        debug!("使用 {} 登录", login);
        if self.raw.api_key().is_some() {
            info!("已设置API密钥，仍然使用用户名登录");
        }

        let payload = self
            .raw
            .endpoint("login")
            .post(json!({
                "login": login,
                "password": password,
                "new_key": new_key,
            }))
            .await?;

        let api_key = payload
            .into_object()
            .and_then(|mut fields| fields.remove("api_key"))
            .and_then(|key| key.as_str().map(str::to_string));
        match api_key {
            Some(api_key) => {
                self.raw.set_api_key(Some(api_key.clone()));
                Ok(api_key)
            }
            None => {
                error!("未知的服务器响应");
                Err(AppError::unexpected_response("Incorrect server response"))
            }
        }
    }

    /// 当前打开的会话
    pub async fn sessions(&self) -> AppResult<Vec<Session>> {
        debug!("获取会话列表");
        let payload = self.raw.endpoint("sessions").get().await?;
        self.bound(payload)
    }

    /// 支持的样本格式
    pub async fn formats(&self) -> AppResult<Vec<Format>> {
        debug!("获取格式列表");
        let payload = self.raw.endpoint("formats").get().await?;
        Ok(hydrate::<Format>(payload, None)?.into_vec())
    }

    /// 支持的分析平台
    pub async fn platforms(&self) -> AppResult<Vec<Platform>> {
        debug!("获取平台列表");
        let payload = self.raw.endpoint("platforms").get().await?;
        Ok(hydrate::<Platform>(payload, None)?.into_vec())
    }

    pub async fn license(&self) -> AppResult<License> {
        debug!("获取许可证信息");
        let payload = self.raw.endpoint("license").get().await?;
        hydrate::<License>(payload, None)?
            .into_one()
            .ok_or_else(|| AppError::unexpected_response("响应中没有许可证信息"))
    }

    pub async fn sample(&self, sample_id: i64) -> AppResult<Sample> {
        debug!("获取样本 {}", sample_id);
        let payload = self.raw.endpoint("samples").join(sample_id).get().await?;
        self.bound_one(payload)
    }

    /// 按条件查询样本
    pub async fn samples(&self, filter: &SampleFilter) -> AppResult<Vec<Sample>> {
        debug!("获取样本列表");
        let payload = self
            .raw
            .endpoint("samples")
            .get_with(serde_json::to_value(filter)?)
            .await?;
        self.bound(payload)
    }

    /// 惰性遍历样本，起始偏移取自 `filter.offset`
    pub fn samples_iter(
        &self,
        count_per_request: usize,
        filter: SampleFilter,
    ) -> BoxStream<'_, AppResult<Sample>> {
        debug!("遍历样本");
        let offset = filter.offset.unwrap_or(0);
        pagination::iterate(
            move |page: PageRequest| {
                let filter = SampleFilter {
                    count: Some(page.count),
                    offset: Some(page.offset),
                    ..filter.clone()
                };
                async move { self.samples(&filter).await }
            },
            count_per_request,
            offset,
        )
    }

    pub async fn samples_all(
        &self,
        count_per_request: usize,
        filter: SampleFilter,
    ) -> AppResult<Vec<Sample>> {
        let offset = filter.offset.unwrap_or(0);
        pagination::all_items(
            move |page: PageRequest| {
                let filter = SampleFilter {
                    count: Some(page.count),
                    offset: Some(page.offset),
                    ..filter.clone()
                };
                async move { self.samples(&filter).await }
            },
            count_per_request,
            offset,
        )
        .await
    }

    /// 上传单个样本
    pub async fn upload_sample(&self, path: &Path) -> AppResult<Sample> {
        debug!("上传样本 {:?}", path);
        let payload = self.raw.endpoint("samples").upload(path).await?;
        self.bound_one(payload)
    }

    /// 上传样本，压缩包与邮件会被服务端拆分为多个样本
    pub async fn upload_samples(&self, path: &Path) -> AppResult<Vec<Sample>> {
        debug!("上传样本 {:?}", path);
        let payload = self.raw.endpoint("samples").upload(path).await?;
        let samples = match payload {
            Payload::Json(JsonValue::Object(mut fields)) if fields.contains_key("samples") => {
                fields.remove("samples").unwrap_or(JsonValue::Null)
            }
            Payload::Json(value) => value,
            _ => JsonValue::Null,
        };
        self.bound(Payload::Json(samples))
    }

    pub async fn analysis(&self, analysis_id: impl Into<ObjectId>) -> AppResult<Analysis> {
        let analysis_id = analysis_id.into();
        debug!("获取分析 {}", analysis_id);
        let payload = self.raw.endpoint("analyses").join(&analysis_id).get().await?;
        self.bound_one(payload)
    }

    pub async fn analyses(&self, filter: &AnalysisFilter) -> AppResult<Vec<Analysis>> {
        debug!("获取分析列表");
        let payload = self
            .raw
            .endpoint("analyses")
            .get_with(serde_json::to_value(filter)?)
            .await?;
        self.bound(payload)
    }

    pub fn analyses_iter(
        &self,
        count_per_request: usize,
        filter: AnalysisFilter,
    ) -> BoxStream<'_, AppResult<Analysis>> {
        debug!("遍历分析");
        let offset = filter.offset.unwrap_or(0);
        pagination::iterate(
            move |page: PageRequest| {
                let filter = AnalysisFilter {
                    count: Some(page.count),
                    offset: Some(page.offset),
                    ..filter.clone()
                };
                async move { self.analyses(&filter).await }
            },
            count_per_request,
            offset,
        )
    }

    pub async fn analyses_all(
        &self,
        count_per_request: usize,
        filter: AnalysisFilter,
    ) -> AppResult<Vec<Analysis>> {
        let offset = filter.offset.unwrap_or(0);
        pagination::all_items(
            move |page: PageRequest| {
                let filter = AnalysisFilter {
                    count: Some(page.count),
                    offset: Some(page.offset),
                    ..filter.clone()
                };
                async move { self.analyses(&filter).await }
            },
            count_per_request,
            offset,
        )
        .await
    }

    /// 启动分析
    pub async fn start_analysis(&self, request: &AnalysisRequest) -> AppResult<Analysis> {
        request.validate()?;
        info!(
            "启动分析: 样本 {}, 平台 {}",
            request.sample_id,
            request.platforms.join(", ")
        );
        let payload = self
            .raw
            .endpoint("analyses")
            .post(serde_json::to_value(request)?)
            .await?;
        self.bound_one(payload)
    }

    pub async fn task(&self, task_id: i64) -> AppResult<Task> {
        debug!("获取任务 {}", task_id);
        let payload = self.raw.endpoint("tasks").join(task_id).get().await?;
        self.bound_one(payload)
    }
}
