pub mod analysis;
pub mod config;
pub mod download;
pub mod sample;
pub mod session;

use std::io::{self, Stdout, Write};
use std::path::Path;

use crate::{
    cli::Command,
    config::ClientConfig,
    error::{AppError, AppResult},
    services::VxCubeApi,
};

/// 命令输出目标
///
/// 服务端返回的文本在非 UTF-8 控制台上会经过 [`message_compat`] 转换。
pub struct Console<W> {
    out: W,
    utf8: bool,
}

impl Console<Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout(), console_is_utf8())
    }
}

impl<W: Write> Console<W> {
    pub fn new(out: W, utf8: bool) -> Self {
        Self { out, utf8 }
    }

    pub fn line(&mut self, text: impl AsRef<str>) -> AppResult<()> {
        writeln!(self.out, "{}", text.as_ref())?;
        Ok(())
    }

    pub fn compat(&self, message: &str) -> String {
        message_compat(message, self.utf8)
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// 非 UTF-8 控制台上把结尾的 "…" 换成 "..."，其余非 ASCII 字符换成 "?"
pub fn message_compat(message: &str, utf8: bool) -> String {
    if utf8 {
        return message.to_string();
    }

    let message = match message.strip_suffix('\u{2026}') {
        Some(head) => format!("{}...", head),
        None => message.to_string(),
    };
    message
        .chars()
        .map(|c| if c.is_ascii() { c } else { '?' })
        .collect()
}

/// 根据区域设置判断控制台编码
pub fn console_is_utf8() -> bool {
    let locale = ["LC_ALL", "LC_CTYPE", "LANG"]
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|value| !value.is_empty());

    match locale {
        Some(value) => {
            let value = value.to_ascii_lowercase();
            value.contains("utf-8") || value.contains("utf8")
        }
        None => !cfg!(windows),
    }
}

/// 错误对应的进程退出码
pub fn exit_code(err: &AppError) -> u8 {
    match err {
        AppError::Service { .. }
        | AppError::Validation(_)
        | AppError::NotBound { .. }
        | AppError::UnexpectedResponse(_)
        | AppError::WebSocket(_)
        | AppError::ConnectionClosed => 1,
        _ => 3,
    }
}

/// 执行子命令
///
/// `settings` 是合并了命令行、环境变量和配置文件后的结果，`config_path` 仅供 `config` 子命令使用。
pub async fn execute<W: Write + Send>(
    command: Command,
    settings: &ClientConfig,
    config_path: &Path,
    console: &mut Console<W>,
) -> AppResult<()> {
    match command {
        Command::Config(args) => config::save_config(config_path, args, console),
        Command::Login(args) => {
            let api = VxCubeApi::new(
                None,
                &settings.base_url,
                settings.version,
                settings.timeout(),
            )?;
            session::login(&api, args, &mut session::TerminalPrompt, console).await
        }
        command => {
            let api = VxCubeApi::new(
                settings.api_key.clone(),
                &settings.base_url,
                settings.version,
                settings.timeout(),
            )?;
            dispatch(&api, command, console).await
        }
    }
}

/// 执行需要已认证客户端的子命令
pub async fn dispatch<W: Write + Send>(
    api: &VxCubeApi,
    command: Command,
    console: &mut Console<W>,
) -> AppResult<()> {
    match command {
        Command::Upload(args) => sample::upload(api, args, console).await,
        Command::Analyse(args) => analysis::analyse(api, args, console).await,
        Command::SubscribeAnalysis { analysis_id } => {
            analysis::subscribe(api, analysis_id, console).await
        }
        Command::Delete { analysis_id } => analysis::delete(api, analysis_id, console).await,
        Command::Download { command } => download::download(api, command, console).await,
        Command::Login(args) => {
            session::login(api, args, &mut session::TerminalPrompt, console).await
        }
        Command::Config(_) => Err(AppError::validation("config 命令不需要连接服务端")),
    }
}

/// 相对路径按当前目录展开，用于提示下载位置
pub(crate) fn display_path(path: &Path) -> String {
    if path.is_absolute() {
        return path.display().to_string();
    }
    match std::env::current_dir() {
        Ok(dir) => dir.join(path).display().to_string(),
        Err(_) => path.display().to_string(),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::{
        services::RawApi,
        testing::{MockConnector, MockTransport},
    };
    use std::sync::Arc;

    pub fn api(transport: Arc<MockTransport>, connector: MockConnector) -> VxCubeApi {
        let raw = RawApi::new(
            Some("test-api-key".to_string()),
            "http://test.url",
            2.0,
            transport,
            Arc::new(connector),
        )
        .unwrap();
        VxCubeApi::with_raw_api(raw)
    }

    pub fn console() -> Console<Vec<u8>> {
        Console::new(Vec::new(), true)
    }

    pub fn output(console: Console<Vec<u8>>) -> String {
        String::from_utf8(console.into_inner()).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_compat_utf8_console() {
        assert_eq!(message_compat("Legen\u{2026}", true), "Legen\u{2026}");
    }

    #[test]
    fn test_message_compat_ascii_console() {
        assert_eq!(message_compat("Legen\u{2026}", false), "Legen...");
        assert_eq!(message_compat("wait\u{2026} for it", false), "wait? for it");
        assert_eq!(message_compat("Анализ", false), "??????");
        assert_eq!(message_compat("dary", false), "dary");
    }

    #[test]
    fn test_console_applies_compat() {
        let mut console = Console::new(Vec::new(), false);
        let message = console.compat("done\u{2026}");
        console.line(message).unwrap();
        assert_eq!(String::from_utf8(console.into_inner()).unwrap(), "done...\n");
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(&AppError::validation("bad")), 1);
        assert_eq!(exit_code(&AppError::service("Not found", 404, None)), 1);
        assert_eq!(exit_code(&AppError::config("bad")), 3);
        assert_eq!(
            exit_code(&AppError::Io(std::io::Error::other("disk"))),
            3
        );
    }

    #[test]
    fn test_display_path() {
        assert!(display_path(Path::new("sample.bin")).ends_with("sample.bin"));
        assert_eq!(display_path(Path::new("/tmp/a.zip")), "/tmp/a.zip");
    }
}
