use clap::{ArgGroup, Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::{config::ClientConfig, services::raw_api::parse_version};

/// Dr.Web vxCube 命令行客户端
#[derive(Debug, Parser)]
#[command(name = "vxcube_client")]
#[command(about = "Dr.Web vxCube command line client", long_about = None)]
#[command(disable_version_flag = true)]
pub struct Cli {
    /// API密钥
    #[arg(long, env = "VXCUBE_API_KEY")]
    pub api_key: Option<String>,

    /// 服务地址
    #[arg(long, env = "VXCUBE_BASE_URL")]
    pub base_url: Option<String>,

    /// API版本，例如 2.0
    #[arg(long, env = "VXCUBE_API_VERSION", value_parser = version_arg)]
    pub version: Option<f64>,

    /// 配置文件路径
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// 输出调试日志
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// 命令行与环境变量覆盖配置文件中的值
    pub fn resolve(&self, mut file_config: ClientConfig) -> ClientConfig {
        if let Some(api_key) = &self.api_key {
            file_config.api_key = Some(api_key.clone());
        }
        if let Some(base_url) = &self.base_url {
            file_config.base_url = base_url.clone();
        }
        if let Some(version) = self.version {
            file_config.version = version;
        }
        file_config
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// 保存或删除默认配置（API密钥、服务地址、版本）
    Config(ConfigArgs),
    /// 使用用户名和密码获取API密钥
    Login(LoginArgs),
    /// 上传样本
    Upload(UploadArgs),
    /// 按样本ID启动分析
    Analyse(AnalyseArgs),
    /// 实时查看分析进度
    SubscribeAnalysis {
        analysis_id: String,
    },
    /// 删除分析
    Delete {
        analysis_id: String,
    },
    /// 下载文件
    Download {
        #[command(subcommand)]
        command: DownloadCommand,
    },
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// 删除配置文件
    #[arg(long, conflicts_with_all = ["api_key", "base_url", "version", "timeout"])]
    pub delete: bool,

    #[arg(long)]
    pub api_key: Option<String>,

    #[arg(long)]
    pub base_url: Option<String>,

    #[arg(long, value_parser = version_arg)]
    pub version: Option<f64>,

    /// HTTP请求超时（秒）
    #[arg(long)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Args)]
pub struct LoginArgs {
    /// 登录名，未指定时交互输入
    #[arg(long)]
    pub login: Option<String>,

    /// 密码，未指定时以不回显的方式交互输入
    #[arg(long, env = "VXCUBE_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// 总是生成新的密钥
    #[arg(long)]
    pub new_key: bool,
}

#[derive(Debug, Args)]
pub struct UploadArgs {
    pub path: PathBuf,

    /// 服务端已有相同 SHA256 的样本时不再上传
    #[arg(long)]
    pub skip_existing: bool,
}

#[derive(Debug, Args)]
pub struct AnalyseArgs {
    pub sample_id: i64,

    /// 分析平台，使用 'all' 表示样本支持的全部平台
    #[arg(short, long = "platform", required = true)]
    pub platforms: Vec<String>,

    /// 分析时长（秒）
    #[arg(short, long, default_value_t = 60)]
    pub time: u32,

    /// 样本格式
    #[arg(short, long)]
    pub format: Option<String>,

    /// 自定义启动命令
    #[arg(short, long)]
    pub cmd: Option<String>,

    /// 生成 CureIt!
    #[arg(short, long, default_value_t = false, action = clap::ArgAction::Set)]
    pub generate_cureit: bool,

    /// 释放文件总大小限制（MB）
    #[arg(short, long, default_value_t = 64)]
    pub drop_size_limit: u32,

    /// 网络代理参数
    #[arg(short, long, default_value = "vpn://")]
    pub net: String,

    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    pub copylog: bool,

    /// Crypto API 缓冲区限制（MB）
    #[arg(long, default_value_t = 64)]
    pub crypto_api_limit: u32,

    /// 报告中内存转储大小限制（MB），范围 0..=512
    #[arg(long, default_value_t = 64)]
    pub dump_size_limit: u32,

    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    pub flex_time: bool,

    /// 从虚拟机转发端口，格式 protocol(可选):port
    #[arg(long)]
    pub forwards: Vec<String>,

    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    pub get_lib: bool,

    #[arg(long, default_value_t = 100)]
    pub injects_limit: u32,

    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    pub monkey_clicker: bool,

    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub dump_browsers: bool,

    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub dump_mapped: bool,

    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub dump_ssdt: bool,

    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub dump_processes: bool,

    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    pub no_clean: bool,

    /// 可选断点触发次数上限
    #[arg(long)]
    pub optional_count: Option<u32>,

    /// 进程存活时间，例如 notepad.exe,35,winword.exe,20
    #[arg(long)]
    pub proc_lifetime: Option<String>,

    /// 系统日期，例如 17.03.2022
    #[arg(long)]
    pub set_date: Option<String>,

    /// 在加载器之前执行的批处理文件
    #[arg(long)]
    pub userbatch: Option<String>,

    /// WriteFile 缓冲区限制（MB）
    #[arg(long, default_value_t = 512)]
    pub write_file_limit: u32,
}

#[derive(Debug, Subcommand)]
pub enum DownloadCommand {
    /// 按 ID、MD5、SHA1 或 SHA256 下载样本
    Sample(SampleDownloadArgs),
    /// 下载分析或任务的归档
    Archive(OwnerDownloadArgs),
    /// 下载任务报告
    Report(TaskDownloadArgs),
    /// 下载分析或任务生成的 CureIt!
    Cureit(OwnerDownloadArgs),
    /// 下载任务的网络流量
    Pcap(TaskDownloadArgs),
}

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("selector").required(true).args(["id", "md5", "sha1", "sha256"])))]
pub struct SampleDownloadArgs {
    #[arg(long)]
    pub id: Option<i64>,

    #[arg(long)]
    pub md5: Option<String>,

    #[arg(long)]
    pub sha1: Option<String>,

    #[arg(long)]
    pub sha256: Option<String>,

    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("owner").required(true).args(["analysis_id", "task_id"])))]
pub struct OwnerDownloadArgs {
    #[arg(long)]
    pub analysis_id: Option<String>,

    #[arg(long)]
    pub task_id: Option<i64>,

    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct TaskDownloadArgs {
    #[arg(long)]
    pub task_id: i64,

    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

fn version_arg(value: &str) -> Result<f64, String> {
    parse_version(value).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("vxcube_client").chain(args.iter().copied()))
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_options() {
        let cli = parse(&[
            "--base-url",
            "http://test.url",
            "--version",
            "42",
            "--api-key",
            "test-api-key",
            "delete",
            "some uuid",
        ])
        .unwrap();

        assert_eq!(cli.version, Some(42.0));
        let config = cli.resolve(ClientConfig::default());
        assert_eq!(config.api_key.as_deref(), Some("test-api-key"));
        assert_eq!(config.base_url, "http://test.url");
        assert!(matches!(cli.command, Command::Delete { ref analysis_id } if analysis_id == "some uuid"));
    }

    #[test]
    fn test_resolve_keeps_file_values() {
        let cli = parse(&["delete", "1"]).unwrap();
        let file_config = ClientConfig {
            api_key: Some("from-file".to_string()),
            version: 2.1,
            ..Default::default()
        };
        if std::env::var_os("VXCUBE_API_KEY").is_none() {
            assert_eq!(cli.resolve(file_config).api_key.as_deref(), Some("from-file"));
        }
    }

    #[test]
    fn test_bad_version_rejected() {
        assert!(parse(&["--version", "two", "delete", "1"]).is_err());
    }

    #[test]
    fn test_config_delete_conflicts() {
        assert!(parse(&["config", "--delete"]).is_ok());
        let err = parse(&["config", "--delete", "--api-key", "key"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn test_analyse_defaults() {
        let cli = parse(&["analyse", "12", "-p", "winxpx86", "-p", "win7x64"]).unwrap();
        let Command::Analyse(args) = cli.command else {
            panic!("unexpected command");
        };
        assert_eq!(args.sample_id, 12);
        assert_eq!(args.platforms, vec!["winxpx86", "win7x64"]);
        assert_eq!(args.time, 60);
        assert_eq!(args.net, "vpn://");
        assert_eq!(args.write_file_limit, 512);
        assert!(args.dump_browsers);
        assert!(!args.generate_cureit);
        assert!(args.forwards.is_empty());
    }

    #[test]
    fn test_analyse_requires_platform() {
        assert!(parse(&["analyse", "12"]).is_err());
    }

    #[test]
    fn test_download_sample_selector() {
        assert!(parse(&["download", "sample", "--sha1", "abc"]).is_ok());
        assert!(parse(&["download", "sample"]).is_err());
        let err = parse(&["download", "sample", "--id", "1", "--md5", "abc"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn test_login_credentials_optional() {
        let cli = parse(&["login", "--new-key"]).unwrap();
        let Command::Login(args) = cli.command else {
            panic!("unexpected command");
        };
        assert!(args.login.is_none());
        assert!(args.new_key);
    }

    #[test]
    fn test_download_archive_owner() {
        assert!(parse(&["download", "archive"]).is_err());
        let cli = parse(&["download", "archive", "--task-id", "7", "-o", "out.zip"]).unwrap();
        let Command::Download {
            command: DownloadCommand::Archive(args),
        } = cli.command
        else {
            panic!("unexpected command");
        };
        assert_eq!(args.task_id, Some(7));
        assert_eq!(args.output, Some(PathBuf::from("out.zip")));
    }
}
