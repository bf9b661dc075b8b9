use futures::future::BoxFuture;

use weft_core::config::CredentialConfig;
use weft_core::error::Result;
use weft_core::traits::CredentialResolver;
use weft_core::types::Credential;

/// Credential resolver backed by the `[[credentials]]` config section.
pub struct ConfigCredentials {
    entries: Vec<CredentialConfig>,
}

impl ConfigCredentials {
    pub fn new(entries: Vec<CredentialConfig>) -> Self {
        Self { entries }
    }
}

impl CredentialResolver for ConfigCredentials {
    fn resolve<'a>(&'a self, user_id: &'a str, integration_type: &'a str) -> BoxFuture<'a, Result<Option<Credential>>> {
        let found = self
            .entries
            .iter()
            .find(|c| c.user_id == user_id && c.integration_type == integration_type)
            .map(|c| Credential {
                integration_type: c.integration_type.clone(),
                name: c.name.clone(),
                data: c.data.clone(),
            });
        Box::pin(async move { Ok(found) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::AppConfig;

    #[tokio::test]
    async fn resolves_by_user_and_integration() {
        let config = AppConfig::parse(
            r#"
[model]
model_id = "gpt-4o"

[[credentials]]
user_id = "u1"
integration_type = "slack"
name = "team slack"
data = { bot_token = "xoxb-1" }

[[credentials]]
user_id = "u2"
integration_type = "slack"
data = { bot_token = "xoxb-2" }
"#,
        )
        .unwrap();
        let resolver = ConfigCredentials::new(config.credentials);

        let cred = resolver.resolve("u2", "slack").await.unwrap().unwrap();
        assert_eq!(cred.get_str("bot_token"), Some("xoxb-2"));
        assert!(resolver.resolve("u1", "github").await.unwrap().is_none());
        assert!(resolver.resolve("u3", "slack").await.unwrap().is_none());
    }
}
