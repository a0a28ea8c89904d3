use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use super::{Console, display_path};
use crate::{
    cli::{SampleDownloadArgs, UploadArgs},
    error::{AppError, AppResult},
    file_processing::FileHasher,
    models::Sample,
    services::{SampleFilter, VxCubeApi},
};

fn describe(sample: &Sample) -> String {
    format!(
        "\t{} [id: {}]",
        sample.name.as_deref().unwrap_or("-"),
        sample.id
    )
}

/// 上传样本并列出服务端识别出的样本
pub async fn upload<W: Write>(
    api: &VxCubeApi,
    args: UploadArgs,
    console: &mut Console<W>,
) -> AppResult<()> {
    if args.skip_existing {
        let hashes = FileHasher::new().hash_file(&args.path).await?;
        debug!("本地样本 SHA256: {}", hashes.sha256);

        let existing = api
            .samples(&SampleFilter {
                sha256: Some(hashes.sha256.clone()),
                ..Default::default()
            })
            .await?;
        if !existing.is_empty() {
            info!("样本 {} 已存在，跳过上传", hashes.sha256);
            console.line("样本已存在:")?;
            for sample in &existing {
                console.line(describe(sample))?;
            }
            return Ok(());
        }
    }

    let samples = api.upload_samples(&args.path).await?;
    for sample in &samples {
        console.line("样本上传成功:")?;
        console.line(describe(sample))?;
        match &sample.format_name {
            Some(format_name) => {
                console.line(format!("\t - format: {}", format_name))?;
                console.line(format!("\t - platforms: {}", sample.platforms.join(", ")))?;
            }
            None => warn!("无法识别文件格式，启动分析时请指定格式"),
        }
    }
    Ok(())
}

/// 按 ID 或哈希查找唯一样本
///
/// 多个匹配且 SHA256 不同时列出全部候选并返回错误。
async fn find_sample<W: Write>(
    api: &VxCubeApi,
    args: &SampleDownloadArgs,
    console: &mut Console<W>,
) -> AppResult<Sample> {
    if let Some(sample_id) = args.id {
        return api.sample(sample_id).await;
    }

    let mut samples = api
        .samples(&SampleFilter {
            md5: args.md5.clone(),
            sha1: args.sha1.clone(),
            sha256: args.sha256.clone(),
            ..Default::default()
        })
        .await?;

    let Some(first) = samples.first() else {
        return Err(AppError::validation("样本不存在"));
    };
    if samples.iter().all(|sample| sample.sha256 == first.sha256) {
        return Ok(samples.swap_remove(0));
    }

    console.line("找到多个样本:")?;
    let mut seen = HashSet::new();
    for sample in &samples {
        if !seen.insert(sample.sha256.clone()) {
            continue;
        }
        console.line(describe(sample))?;
        console.line(format!("\t - md5: {}", sample.md5.as_deref().unwrap_or("-")))?;
        console.line(format!("\t - sha1: {}", sample.sha1.as_deref().unwrap_or("-")))?;
        console.line(format!(
            "\t - sha256: {}",
            sample.sha256.as_deref().unwrap_or("-")
        ))?;
    }
    Err(AppError::validation("条件匹配到多个不同的样本"))
}

pub async fn download_sample<W: Write>(
    api: &VxCubeApi,
    args: SampleDownloadArgs,
    console: &mut Console<W>,
) -> AppResult<()> {
    let sample = find_sample(api, &args, console).await?;

    let output = match args.output {
        Some(output) => output,
        None => sample
            .sha1
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(sample.id.to_string())),
    };
    sample.download(&output).await?;
    console.line(format!("样本已下载到 {}", display_path(&output)))
}
