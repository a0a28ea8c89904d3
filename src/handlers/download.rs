use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{Console, display_path, sample};
use crate::{
    cli::{DownloadCommand, OwnerDownloadArgs, TaskDownloadArgs},
    error::{AppError, AppResult},
    models::CureIt,
    services::VxCubeApi,
};

/// 任务归档中网络流量文件的路径
const PCAP_STORAGE_PATH: &str = "network.pcap";

pub async fn download<W: Write>(
    api: &VxCubeApi,
    command: DownloadCommand,
    console: &mut Console<W>,
) -> AppResult<()> {
    match command {
        DownloadCommand::Sample(args) => sample::download_sample(api, args, console).await,
        DownloadCommand::Archive(args) => archive(api, args, console).await,
        DownloadCommand::Report(args) => report(api, args, console).await,
        DownloadCommand::Cureit(args) => cureit(api, args, console).await,
        DownloadCommand::Pcap(args) => pcap(api, args, console).await,
    }
}

fn output_or(output: Option<PathBuf>, default: String) -> PathBuf {
    output.unwrap_or_else(|| PathBuf::from(default))
}

fn owner_missing() -> AppError {
    AppError::validation("需要指定 --analysis-id 或 --task-id")
}

fn downloaded<W: Write>(console: &mut Console<W>, what: &str, output: &Path) -> AppResult<()> {
    console.line(format!("{}已下载到 {}", what, display_path(output)))
}

/// 下载分析或任务归档
async fn archive<W: Write>(
    api: &VxCubeApi,
    args: OwnerDownloadArgs,
    console: &mut Console<W>,
) -> AppResult<()> {
    let output = match (args.analysis_id, args.task_id) {
        (Some(analysis_id), _) => {
            let analysis = api.analysis(analysis_id).await?;
            let name = analysis.sha1.clone().unwrap_or_else(|| analysis.id.to_string());
            let output = output_or(args.output, format!("{}_archive.zip", name));
            analysis.download_archive(&output).await?;
            output
        }
        (None, Some(task_id)) => {
            let task = api.task(task_id).await?;
            let output = output_or(args.output, format!("{}_archive.zip", task.platform_code));
            task.download_archive(&output).await?;
            output
        }
        (None, None) => return Err(owner_missing()),
    };
    downloaded(console, "归档", &output)
}

async fn report<W: Write>(
    api: &VxCubeApi,
    args: TaskDownloadArgs,
    console: &mut Console<W>,
) -> AppResult<()> {
    let task = api.task(args.task_id).await?;
    let output = output_or(args.output, format!("{}_report", task.platform_code));
    task.download_report(&output).await?;
    downloaded(console, "报告", &output)
}

/// 下载已生成的 CureIt!，尚未成功生成时返回错误
async fn cureit<W: Write>(
    api: &VxCubeApi,
    args: OwnerDownloadArgs,
    console: &mut Console<W>,
) -> AppResult<()> {
    let (cureit, default_name) = match (args.analysis_id, args.task_id) {
        (Some(analysis_id), _) => {
            let analysis = api.analysis(analysis_id).await?;
            let name = analysis.sha1.clone().unwrap_or_else(|| analysis.id.to_string());
            (analysis.cureit().await?, format!("{}_cureit.exe", name))
        }
        (None, Some(task_id)) => {
            let task = api.task(task_id).await?;
            let name = format!("{}_cureit.exe", task.platform_code);
            (task.cureit().await?, name)
        }
        (None, None) => return Err(owner_missing()),
    };

    let cureit: CureIt = cureit.ok_or_else(|| AppError::validation("没有可用的 CureIt!"))?;
    debug!("{}", cureit);
    if !cureit.is_success() {
        if cureit.can_retry() {
            warn!("CureIt! 生成失败，可以重新生成");
        }
        return Err(AppError::validation(format!("无法下载: {}", cureit)));
    }

    let output = output_or(args.output, default_name);
    cureit.download(&output).await?;
    downloaded(console, "CureIt! ", &output)
}

/// 从任务归档中下载网络流量
async fn pcap<W: Write>(
    api: &VxCubeApi,
    args: TaskDownloadArgs,
    console: &mut Console<W>,
) -> AppResult<()> {
    let task = api.task(args.task_id).await?;
    if !task.is_success() {
        return Err(AppError::validation(format!(
            "任务 {} 状态为 {}，没有网络流量文件",
            task.id, task.status
        )));
    }

    let output = output_or(args.output, format!("task_{}.pcap", task.id));
    task.download_storage_file(PCAP_STORAGE_PATH, &output).await?;
    downloaded(console, "PCAP ", &output)
}
