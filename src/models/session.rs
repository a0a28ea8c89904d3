use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::debug;

use super::{FromPayload, fields::optional_time};
use crate::{
    error::{AppError, AppResult},
    services::raw_api::RawApi,
};

/// 登录会话
#[derive(Debug, Clone)]
pub struct Session {
    api: Option<RawApi>,
    pub api_key: String,
    pub start_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct SessionFields {
    #[serde(default)]
    api_key: String,
    #[serde(default, deserialize_with = "optional_time")]
    start_date: Option<DateTime<Utc>>,
}

impl Session {
    /// 结束会话，对应的API密钥随之失效
    pub async fn delete(&self) -> AppResult<()> {
        let api = self
            .api
            .as_ref()
            .ok_or_else(|| AppError::not_bound(Self::NAME))?;
        debug!("删除会话");
        api.endpoint("sessions").join(&self.api_key).delete().await?;
        Ok(())
    }
}

impl FromPayload for Session {
    const NAME: &'static str = "Session";

    fn from_value(value: JsonValue, api: Option<&RawApi>) -> AppResult<Self> {
        let fields: SessionFields = serde_json::from_value(value)?;
        Ok(Session {
            api: api.cloned(),
            api_key: fields.api_key,
            start_date: fields.start_date,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockConnector, MockTransport};
    use reqwest::Method;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_delete_session() {
        let transport = Arc::new(MockTransport::default());
        transport.push_bytes(204, b"");
        let api = RawApi::new(
            Some("current".into()),
            "http://test",
            2.0,
            transport.clone(),
            Arc::new(MockConnector::default()),
        )
        .unwrap();

        let session = Session::from_value(
            json!({"api_key": "old", "start_date": "2019-01-01T00:00:00Z"}),
            Some(&api),
        )
        .unwrap();
        assert!(session.start_date.is_some());

        session.delete().await.unwrap();
        let request = transport.last_request().unwrap();
        assert_eq!(request.method, Method::DELETE);
        assert_eq!(request.url, "http://test/api-2.0/sessions/old");
    }
}
