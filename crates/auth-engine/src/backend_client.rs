//! HTTP client for the community backend.
//!
//! Two surfaces are used:
//! - The LIFF login endpoint, which trades a LIFF access token for an
//!   identity-provider custom token
//! - The GraphQL API, for the `currentUser` query and the `userSignUp` mutation

use crate::sdk::{AuthBackend, CreateUserInput, CurrentUser};
use crate::{AuthError, AuthResult};
use async_trait::async_trait;
use auth_config_and_utils::{Config, TenantConfig};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use url::Url;

const COMMUNITY_HEADER: &str = "X-Community-Id";

const CURRENT_USER_QUERY: &str = "query currentUser { currentUser { user { id name slug image } } }";
const USER_SIGN_UP_MUTATION: &str = "mutation userSignUp($input: UserSignUpInput!) { userSignUp(input: $input) { user { id name slug image } } }";

fn summarize_response_body(body: &str) -> String {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    format!("len={},digest={:016x}", body.len(), hasher.finish())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LiffLoginRequest<'a> {
    access_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tenant_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiffLoginResponse {
    custom_token: String,
}

#[derive(Debug, Serialize)]
struct GraphqlRequest<'a, V: Serialize> {
    query: &'a str,
    variables: V,
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrentUserData {
    current_user: Option<UserPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserSignUpData {
    user_sign_up: Option<UserPayload>,
}

#[derive(Debug, Deserialize)]
struct UserPayload {
    user: Option<CurrentUser>,
}

#[derive(Debug, Serialize)]
struct SignUpVariables<'a> {
    input: &'a CreateUserInput,
}

/// `reqwest` implementation of [`AuthBackend`] for one community.
#[derive(Clone)]
pub struct BackendClient {
    http_client: reqwest::Client,
    api_url: Url,
    liff_login_endpoint: Url,
    community_id: String,
}

impl BackendClient {
    pub fn new(api_url: Url, liff_login_endpoint: Url, community_id: impl Into<String>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            api_url,
            liff_login_endpoint,
            community_id: community_id.into(),
        }
    }

    /// Build from runtime configuration for the given tenant.
    pub fn from_config(config: &Config, tenant: &TenantConfig) -> AuthResult<Self> {
        Ok(Self::new(
            config.api_url()?,
            Url::parse(&config.liff_login_endpoint)?,
            tenant.community_id.clone(),
        ))
    }

    async fn graphql<V, T>(&self, operation: &str, query: &str, variables: V, id_token: &str) -> AuthResult<T>
    where
        V: Serialize + Send,
        T: DeserializeOwned,
    {
        tracing::debug!(operation, community_id = %self.community_id, "Sending GraphQL request");

        let response = self
            .http_client
            .post(self.api_url.clone())
            .bearer_auth(id_token)
            .header(COMMUNITY_HEADER, &self.community_id)
            .json(&GraphqlRequest { query, variables })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let body_summary = summarize_response_body(&body);
            tracing::error!(operation, status = %status, body_summary = %body_summary, "GraphQL request failed");
            return Err(AuthError::Backend(format!(
                "{} failed: {} ({})",
                operation, status, body_summary
            )));
        }

        parse_graphql(operation, &body)
    }
}

fn parse_graphql<T: DeserializeOwned>(operation: &str, body: &str) -> AuthResult<T> {
    let parsed: GraphqlResponse<T> = serde_json::from_str(body)?;
    if !parsed.errors.is_empty() {
        let messages: Vec<&str> = parsed.errors.iter().map(|e| e.message.as_str()).collect();
        return Err(AuthError::Backend(format!(
            "{} returned errors: {}",
            operation,
            messages.join("; ")
        )));
    }
    parsed
        .data
        .ok_or_else(|| AuthError::Backend(format!("{} returned no data", operation)))
}

#[async_trait]
impl AuthBackend for BackendClient {
    async fn exchange_liff_token(
        &self,
        access_token: &str,
        tenant_id: Option<&str>,
    ) -> AuthResult<String> {
        let response = self
            .http_client
            .post(self.liff_login_endpoint.clone())
            .header(COMMUNITY_HEADER, &self.community_id)
            .json(&LiffLoginRequest {
                access_token,
                tenant_id,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let body_summary = summarize_response_body(&body);
            tracing::error!(status = %status, body_summary = %body_summary, "LIFF token exchange rejected");
            return Err(AuthError::TokenExchange(format!(
                "LIFF login endpoint returned {} ({})",
                status, body_summary
            )));
        }

        let payload: LiffLoginResponse = response.json().await?;
        if payload.custom_token.is_empty() {
            return Err(AuthError::TokenExchange(
                "LIFF login endpoint returned an empty custom token".to_string(),
            ));
        }
        Ok(payload.custom_token)
    }

    async fn fetch_current_user(&self, id_token: &str) -> AuthResult<Option<CurrentUser>> {
        let data: CurrentUserData = self
            .graphql("currentUser", CURRENT_USER_QUERY, serde_json::json!({}), id_token)
            .await?;
        Ok(data.current_user.and_then(|payload| payload.user))
    }

    async fn create_user(&self, id_token: &str, input: &CreateUserInput) -> AuthResult<CurrentUser> {
        let data: UserSignUpData = self
            .graphql(
                "userSignUp",
                USER_SIGN_UP_MUTATION,
                SignUpVariables { input },
                id_token,
            )
            .await?;
        data.user_sign_up
            .and_then(|payload| payload.user)
            .ok_or_else(|| AuthError::Backend("userSignUp returned no user".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn liff_login_request_shape() {
        let body = serde_json::to_value(LiffLoginRequest {
            access_token: "liff-access",
            tenant_id: Some("tenant-a"),
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"accessToken": "liff-access", "tenantId": "tenant-a"}));

        let body = serde_json::to_value(LiffLoginRequest {
            access_token: "liff-access",
            tenant_id: None,
        })
        .unwrap();
        assert!(body.get("tenantId").is_none());
    }

    #[test]
    fn parses_current_user() {
        let body = r#"{"data":{"currentUser":{"user":{"id":"u1","name":"Hanako","slug":"hanako","image":null}}}}"#;
        let data: CurrentUserData = parse_graphql("currentUser", body).unwrap();
        let user = data.current_user.and_then(|p| p.user).unwrap();
        assert_eq!(user.id, "u1");
        assert_eq!(user.slug.as_deref(), Some("hanako"));
    }

    #[test]
    fn missing_user_is_none() {
        let body = r#"{"data":{"currentUser":null}}"#;
        let data: CurrentUserData = parse_graphql("currentUser", body).unwrap();
        assert!(data.current_user.is_none());
    }

    #[test]
    fn graphql_errors_become_backend_errors() {
        let body = r#"{"data":null,"errors":[{"message":"unauthenticated"},{"message":"try again"}]}"#;
        let err = parse_graphql::<CurrentUserData>("currentUser", body).unwrap_err();
        assert!(matches!(err, AuthError::Backend(ref m) if m.contains("unauthenticated; try again")));
    }

    #[test]
    fn from_config_resolves_urls() {
        let config = Config::default();
        let tenant = TenantConfig {
            community_id: "kibotcha".into(),
            firebase_tenant_id: None,
            liff_id: "1650000000-abcd".into(),
        };
        let client = BackendClient::from_config(&config, &tenant).unwrap();
        assert_eq!(client.api_url.as_str(), "http://localhost:3000/graphql");
        assert_eq!(client.community_id, "kibotcha");
    }

    #[test]
    fn summary_hides_body() {
        let summary = summarize_response_body("secret token");
        assert!(summary.starts_with("len=12,digest="));
        assert!(!summary.contains("secret"));
    }
}
