use weft_core::config::GatewayConfig;

/// Caller identity resolved from an API key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Name of the matching key, `anonymous` when auth is off.
    pub key_name: String,
    /// User every run started by this caller executes as.
    pub user_id: String,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self {
            key_name: "anonymous".into(),
            user_id: "anonymous".into(),
        }
    }
}

/// Bearer header, then `?token=`; with no keys configured everyone is anonymous.
///
/// Returns `None` on auth failure.
pub fn validate_auth(config: &GatewayConfig, bearer: Option<&str>, query_token: Option<&str>) -> Option<Identity> {
    if config.api_keys.is_empty() {
        return Some(Identity::anonymous());
    }

    let presented = bearer.or(query_token)?;
    config
        .api_keys
        .iter()
        .find(|k| k.key == presented)
        .map(|k| Identity {
            key_name: k.name.clone(),
            user_id: k.user_id.clone(),
        })
}

/// Extract token from the query string (?token=...).
pub fn extract_token_from_query(query: &str) -> Option<&str> {
    for pair in query.split('&') {
        if let Some(val) = pair.strip_prefix("token=") {
            return Some(val);
        }
    }
    None
}
