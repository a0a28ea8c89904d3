use std::collections::HashMap;
use std::io::Write;
use std::ops::ControlFlow;
use tracing::debug;

use super::Console;
use crate::{
    cli::AnalyseArgs,
    error::AppResult,
    services::{AnalysisRequest, VxCubeApi},
};

/// 平台参数中的该值表示使用样本支持的全部平台
const ALL_PLATFORMS: &str = "all";

fn analysis_request(args: AnalyseArgs, platforms: Vec<String>) -> AnalysisRequest {
    AnalysisRequest {
        analysis_time: Some(args.time),
        format_name: args.format,
        custom_cmd: args.cmd,
        generate_cureit: args.generate_cureit,
        drop_size_limit: args.drop_size_limit,
        net: args.net,
        copylog: args.copylog,
        crypto_api_limit: args.crypto_api_limit,
        dump_size_limit: args.dump_size_limit,
        flex_time: args.flex_time,
        forwards: (!args.forwards.is_empty()).then_some(args.forwards),
        get_lib: args.get_lib,
        injects_limit: args.injects_limit,
        monkey_clicker: args.monkey_clicker,
        dump_browsers: args.dump_browsers,
        dump_mapped: args.dump_mapped,
        dump_ssdt: args.dump_ssdt,
        dump_processes: args.dump_processes,
        no_clean: args.no_clean,
        optional_count: args.optional_count,
        proc_lifetime: args.proc_lifetime,
        set_date: args.set_date,
        userbatch: args.userbatch,
        write_file_limit: args.write_file_limit,
        ..AnalysisRequest::new(args.sample_id, platforms)
    }
}

/// 启动分析
pub async fn analyse<W: Write>(
    api: &VxCubeApi,
    args: AnalyseArgs,
    console: &mut Console<W>,
) -> AppResult<()> {
    let platforms = if args.platforms.iter().any(|p| p == ALL_PLATFORMS) {
        let sample = api.sample(args.sample_id).await?;
        debug!("样本 {} 支持的平台: {:?}", sample.id, sample.platforms);
        sample.platforms
    } else {
        args.platforms.clone()
    };

    let request = analysis_request(args, platforms);
    let analysis = api.start_analysis(&request).await?;
    console.line(format!("分析 {} 已启动", analysis.id))
}

/// 输出分析的实时进度，结束后输出各任务结果
pub async fn subscribe<W: Write + Send>(
    api: &VxCubeApi,
    analysis_id: String,
    console: &mut Console<W>,
) -> AppResult<()> {
    let mut analysis = api.analysis(analysis_id).await?;
    let platforms: HashMap<i64, String> = analysis
        .tasks
        .iter()
        .map(|task| (task.id, task.platform_code.clone()))
        .collect();

    if analysis.is_processing() {
        let mut write_error = None;
        analysis
            .subscribe_progress(|event| {
                let platform = platforms
                    .get(&event.task_id)
                    .map(String::as_str)
                    .unwrap_or("?");
                let message = event
                    .message
                    .as_deref()
                    .map(|message| console.compat(message))
                    .unwrap_or_default();
                let line = format!("[{:<13}] [{}%] {}", platform, event.progress, message);
                match console.line(line) {
                    Ok(()) => ControlFlow::Continue(()),
                    Err(e) => {
                        write_error = Some(e);
                        ControlFlow::Break(())
                    }
                }
            })
            .await?;
        if let Some(e) = write_error {
            return Err(e);
        }
    }

    console.line("所有任务已结束:")?;
    for task in &analysis.tasks {
        let maliciousness = task
            .maliciousness
            .map(|m| m.to_string())
            .unwrap_or_else(|| "-".to_string());
        console.line(format!(
            "Task[{}]-{} [{}] maliciousness: {}",
            task.id, task.platform_code, task.status, maliciousness
        ))?;
    }
    Ok(())
}

pub async fn delete<W: Write>(
    api: &VxCubeApi,
    analysis_id: String,
    console: &mut Console<W>,
) -> AppResult<()> {
    let analysis = api.analysis(analysis_id).await?;
    analysis.delete().await?;
    console.line(format!("分析 {} 已删除", analysis.id))
}
