/*
 * SampleFarm - Professional Malware Analysis Platform
 * Copyright (c) 2024 SampleFarm Project
 *
 * This work is licensed under CC BY-NC-SA 4.0
 * https://creativecommons.org/licenses/by-nc-sa/4.0/
 */

use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vxcube_api::{
    cli::{Cli, Command},
    config::ClientConfig,
    error::AppResult,
    handlers::{self, Console},
};

/// Ctrl-C 中断时的退出码
const INTERRUPTED: u8 = 130;

async fn run(cli: Cli) -> AppResult<()> {
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => ClientConfig::default_path()?,
    };

    // config 子命令只处理文件本身，不需要加载其余配置
    let file_config = match cli.command {
        Command::Config(_) => ClientConfig::default(),
        _ => {
            let config = ClientConfig::load(&config_path)?;
            tracing::debug!("已加载配置文件: {:?}", config_path);
            config
        }
    };

    let settings = cli.resolve(file_config);
    settings.validate()?;
    if settings.api_key.is_none() && !matches!(cli.command, Command::Config(_) | Command::Login(_)) {
        tracing::warn!("未设置API密钥，请使用 --api-key 或先执行 login");
    }

    let mut console = Console::stdout();
    handlers::execute(cli.command, &settings, &config_path, &mut console).await
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "vxcube_api=debug,vxcube_client=debug"
    } else {
        "vxcube_api=info,vxcube_client=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tokio::select! {
        result = run(cli) => match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!("{}", e);
                ExitCode::from(handlers::exit_code(&e))
            }
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("用户中断");
            ExitCode::from(INTERRUPTED)
        }
    }
}
