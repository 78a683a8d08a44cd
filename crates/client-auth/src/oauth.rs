//! Third-party authorization redirects.
//!
//! Parses what the identity provider sends back and builds the URL that sends
//! the user to it.

use crate::settings::IdentityProvider;
use crate::{AuthError, AuthResult};
use url::form_urlencoded;
use url::Url;
use uuid::Uuid;

/// Base used to resolve bare paths such as `/login?code=...`.
const RELATIVE_BASE: &str = "http://localhost";

/// Query parameters of a provider redirect. Empty values read as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

impl CallbackParams {
    /// Parse an absolute URL, an application path, or a bare query string.
    pub fn parse(input: &str) -> AuthResult<Self> {
        let input = input.trim();
        let query = if input.contains("://") {
            Url::parse(input)?.query().unwrap_or_default().to_string()
        } else if input.starts_with('/') {
            Url::parse(RELATIVE_BASE)?
                .join(input)?
                .query()
                .unwrap_or_default()
                .to_string()
        } else {
            input.trim_start_matches('?').to_string()
        };
        Ok(Self::from_query(&query))
    }

    pub fn from_query(query: &str) -> Self {
        let mut params = Self::default();
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match key.as_ref() {
                "code" => params.code = Some(value.to_string()),
                "state" => params.state = Some(value.to_string()),
                "error" => params.error = Some(value.to_string()),
                _ => {}
            }
        }
        params
    }

    pub fn with_code(code: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            ..Self::default()
        }
    }
}

/// Callback route carrying a code (and state) forwarded from elsewhere.
pub fn callback_target(callback_path: &str, code: &str, state: Option<&str>) -> String {
    let mut query = form_urlencoded::Serializer::new(String::new());
    query.append_pair("code", code);
    if let Some(state) = state {
        query.append_pair("state", state);
    }
    format!("{}?{}", callback_path, query.finish())
}

/// Provider authorization request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub url: Url,
    /// Random value the provider echoes back in `state`.
    pub state: String,
}

/// Build the provider's authorize URL with a fresh random `state`.
pub fn authorization_request(
    provider: &IdentityProvider,
    redirect_uri: &str,
) -> AuthResult<AuthorizationRequest> {
    if provider.client_id.trim().is_empty() {
        return Err(AuthError::Config(
            "identity provider client_id is empty".to_string(),
        ));
    }
    let state = Uuid::new_v4().simple().to_string();

    let mut url = provider.authorize_url.clone();
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("response_type", "code")
            .append_pair("client_id", &provider.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("state", &state);
        if let Some(scope) = &provider.scope {
            query.append_pair("scope", scope);
        }
    }

    Ok(AuthorizationRequest { url, state })
}
