use std::io::{self, BufRead, Write};
use tracing::info;

use super::Console;
use crate::{
    cli::LoginArgs,
    error::{AppError, AppResult},
    services::VxCubeApi,
};

/// 命令行未给出的登录信息从这里读取
pub trait CredentialPrompt {
    fn login(&mut self) -> AppResult<String>;

    fn password(&mut self) -> AppResult<String>;
}

/// 在终端上提示输入，密码不回显
pub struct TerminalPrompt;

impl CredentialPrompt for TerminalPrompt {
    fn login(&mut self) -> AppResult<String> {
        let mut stderr = io::stderr();
        write!(stderr, "Login: ")?;
        stderr.flush()?;

        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    fn password(&mut self) -> AppResult<String> {
        Ok(rpassword::prompt_password("Password: ")?)
    }
}

/// 登录并输出新的API密钥
pub async fn login<W: Write>(
    api: &VxCubeApi,
    args: LoginArgs,
    prompt: &mut impl CredentialPrompt,
    console: &mut Console<W>,
) -> AppResult<()> {
    let login = match args.login {
        Some(login) => login,
        None => prompt.login()?,
    };
    if login.is_empty() {
        return Err(AppError::validation("登录名不能为空"));
    }
    let password = match args.password {
        Some(password) => password,
        None => prompt.password()?,
    };

    let api_key = api.login(&login, &password, args.new_key).await?;
    info!("用户 {} 登录成功", login);
    console.line(format!("会话已开启，API密钥: {}", api_key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        handlers::test_support::{api, console, output},
        services::transport::RequestBody,
        testing::{MockConnector, MockTransport},
    };
    use serde_json::json;
    use std::sync::Arc;

    /// 预设答案并记录被询问的次数
    #[derive(Default)]
    struct ScriptedPrompt {
        login: String,
        password: String,
        asked: Vec<&'static str>,
    }

    impl CredentialPrompt for ScriptedPrompt {
        fn login(&mut self) -> AppResult<String> {
            self.asked.push("login");
            Ok(self.login.clone())
        }

        fn password(&mut self) -> AppResult<String> {
            self.asked.push("password");
            Ok(self.password.clone())
        }
    }

    #[tokio::test]
    async fn test_login_prints_key() {
        let transport = Arc::new(MockTransport::default());
        transport.push_json(200, json!({"api_key": "new-api-key"}));
        let api = api(transport.clone(), MockConnector::default());

        let mut prompt = ScriptedPrompt::default();
        let mut out = console();
        login(
            &api,
            LoginArgs {
                login: Some("user".to_string()),
                password: Some("secret".to_string()),
                new_key: true,
            },
            &mut prompt,
            &mut out,
        )
        .await
        .unwrap();

        assert!(output(out).contains("new-api-key"));
        assert!(prompt.asked.is_empty());
        assert_eq!(api.raw_api().api_key().as_deref(), Some("new-api-key"));
        let request = transport.last_request().unwrap();
        assert!(request.url.ends_with("/login"));
    }

    #[tokio::test]
    async fn test_login_prompts_for_missing_credentials() {
        let transport = Arc::new(MockTransport::default());
        transport.push_json(200, json!({"api_key": "new-api-key"}));
        let api = api(transport.clone(), MockConnector::default());

        let mut prompt = ScriptedPrompt {
            login: "user".to_string(),
            password: "typed-secret".to_string(),
            ..Default::default()
        };
        login(
            &api,
            LoginArgs {
                login: None,
                password: None,
                new_key: false,
            },
            &mut prompt,
            &mut console(),
        )
        .await
        .unwrap();

        assert_eq!(prompt.asked, vec!["login", "password"]);
        let request = transport.last_request().unwrap();
        let RequestBody::Json(body) = request.body else {
            panic!("expected json body");
        };
        assert_eq!(body["login"], json!("user"));
        assert_eq!(body["password"], json!("typed-secret"));
    }

    #[tokio::test]
    async fn test_login_rejects_empty_name() {
        let transport = Arc::new(MockTransport::default());
        let api = api(transport.clone(), MockConnector::default());

        let mut prompt = ScriptedPrompt::default();
        let err = login(
            &api,
            LoginArgs {
                login: None,
                password: Some("secret".to_string()),
                new_key: false,
            },
            &mut prompt,
            &mut console(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(prompt.asked, vec!["login"]);
        assert!(transport.requests().is_empty());
    }
}
