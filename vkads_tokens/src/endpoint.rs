//! The platform's OAuth2 token endpoints

use std::sync::Arc;

use reqwest::{header, StatusCode, Url};

use crate::{config::ProviderConfig, error::TokenError, RefreshTokenRef};

pub mod dto;

use dto::{ClientCredentials, ClientCredentialsGrant, RefreshTokenGrant, TokenResponse};

/// A stateless client for the token and revocation endpoints
///
/// Each method performs exactly one HTTP exchange. Deciding when to call which
/// is left to the [`TokenLifecycleManager`](crate::TokenLifecycleManager).
/// Timeouts and connection policy come from the supplied [`reqwest::Client`].
#[derive(Clone, Debug)]
pub struct TokenEndpoint {
    client: reqwest::Client,
    config: ProviderConfig,
    credentials: Arc<ClientCredentials>,
}

impl TokenEndpoint {
    /// Constructs a new endpoint client
    pub fn new(
        client: reqwest::Client,
        config: ProviderConfig,
        credentials: impl Into<Arc<ClientCredentials>>,
    ) -> Self {
        Self {
            client,
            config,
            credentials: credentials.into(),
        }
    }

    /// The endpoint configuration in use
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Requests a brand new token with the `client_credentials` grant
    pub async fn mint(&self) -> Result<TokenResponse, TokenError> {
        request_token(
            &self.client,
            self.config.token_url(),
            "client_credentials",
            &self.credentials,
            &ClientCredentialsGrant {
                credentials: &self.credentials,
            },
        )
        .await
    }

    /// Exchanges a refresh token for a new token with the `refresh_token` grant
    pub async fn refresh(
        &self,
        refresh_token: &RefreshTokenRef,
    ) -> Result<TokenResponse, TokenError> {
        request_token(
            &self.client,
            self.config.token_url(),
            "refresh_token",
            &self.credentials,
            &RefreshTokenGrant {
                credentials: &self.credentials,
                refresh_token,
            },
        )
        .await
    }

    /// Asks the platform to invalidate every token issued to this client
    ///
    /// Any 2xx answer counts as success.
    #[tracing::instrument(
        err,
        skip(self),
        fields(
            revoke_url = %self.config.revoke_url(),
            client_id = %self.credentials.client_id(),
        ),
    )]
    pub async fn revoke(&self) -> Result<(), TokenError> {
        tracing::trace!("requesting token revocation");

        let resp = self
            .client
            .post(self.config.revoke_url().clone())
            .header(header::ACCEPT, "application/json")
            .form(&*self.credentials)
            .send()
            .await
            .map_err(TokenError::TransportFailure)?;

        let status = resp.status();
        tracing::debug!(
            response.status = status.as_u16(),
            "received revocation response"
        );

        let body = resp.bytes().await.map_err(TokenError::TransportFailure)?;
        check_status(status, &body)?;

        tracing::info!("all tokens for client revoked");
        Ok(())
    }
}

#[tracing::instrument(
    err,
    skip(client, token_url, credentials, payload),
    fields(
        token_url = %token_url,
        client_id = %credentials.client_id(),
    ),
)]
async fn request_token<P: serde::Serialize>(
    client: &reqwest::Client,
    token_url: &Url,
    grant_type: &'static str,
    credentials: &ClientCredentials,
    payload: &P,
) -> Result<TokenResponse, TokenError> {
    tracing::trace!("requesting token from platform");

    let resp = client
        .post(token_url.clone())
        .header(header::ACCEPT, "application/json")
        .form(payload)
        .send()
        .await
        .map_err(TokenError::TransportFailure)?;

    let status = resp.status();
    tracing::debug!(
        response.status = status.as_u16(),
        "received token response from platform"
    );

    let body = resp.bytes().await.map_err(TokenError::TransportFailure)?;
    check_status(status, &body)?;

    let token: TokenResponse = serde_json::from_slice(&body)?;

    tracing::info!(
        has_refresh_token = token.refresh_token.is_some(),
        lifetime = token.expires_in.0,
        "received new token"
    );

    Ok(token)
}

fn check_status(status: StatusCode, body: &[u8]) -> Result<(), TokenError> {
    if status.is_success() {
        return Ok(());
    }

    let (code, message) = dto::parse_error_body(body);

    if status == StatusCode::FORBIDDEN {
        return Err(TokenError::ProviderInvalidatedTokens { message });
    }

    Err(TokenError::ProviderRejected {
        status: status.as_u16(),
        code,
        message,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{
        matchers::{body_string, header as header_is, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::{ClientId, ClientSecret, RefreshToken};

    async fn endpoint() -> (TokenEndpoint, MockServer) {
        let server = MockServer::start().await;
        let config = ProviderConfig::from_base_url(&format!("{}/oauth2", server.uri())).unwrap();
        let endpoint = TokenEndpoint::new(
            reqwest::Client::new(),
            config,
            ClientCredentials::new(ClientId::from_static("app"), ClientSecret::from_static("pw")),
        );
        (endpoint, server)
    }

    #[tokio::test]
    async fn mint_posts_client_credentials_form() {
        let (endpoint, server) = endpoint().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token.json"))
            .and(header_is("content-type", "application/x-www-form-urlencoded"))
            .and(body_string(
                "grant_type=client_credentials&client_id=app&client_secret=pw",
            ))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"access_token": "A", "expires_in": 3600})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let token = endpoint.mint().await.unwrap();
        assert_eq!(token.access_token.as_str(), "A");
        assert_eq!(token.expires_in.0, 3600);
    }

    #[tokio::test]
    async fn refresh_posts_refresh_token_form() {
        let (endpoint, server) = endpoint().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token.json"))
            .and(body_string(
                "grant_type=refresh_token&refresh_token=R1&client_id=app&client_secret=pw",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"access_token": "B", "refresh_token": "R2", "expires_in": 60}),
            ))
            .expect(1)
            .mount(&server)
            .await;

        let token = endpoint
            .refresh(&RefreshToken::from_static("R1"))
            .await
            .unwrap();
        assert_eq!(token.access_token.as_str(), "B");
        assert_eq!(token.refresh_token.unwrap().as_str(), "R2");
    }

    #[tokio::test]
    async fn forbidden_means_tokens_were_invalidated() {
        let (endpoint, server) = endpoint().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(403)
                    .set_body_json(json!({"code": "token_limit", "message": "too many tokens"})),
            )
            .mount(&server)
            .await;

        match endpoint.mint().await {
            Err(TokenError::ProviderInvalidatedTokens { message }) => {
                assert_eq!(message, "too many tokens")
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn other_failures_carry_status_code_and_message() {
        let (endpoint, server) = endpoint().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"code": "invalid_client", "message": "bad secret"})),
            )
            .mount(&server)
            .await;

        match endpoint.mint().await {
            Err(TokenError::ProviderRejected {
                status,
                code,
                message,
            }) => {
                assert_eq!(status, 401);
                assert_eq!(code, "invalid_client");
                assert_eq!(message, "bad secret");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn success_without_token_is_malformed() {
        let (endpoint, server) = endpoint().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;

        assert!(matches!(
            endpoint.mint().await,
            Err(TokenError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn revoke_posts_credentials_and_accepts_any_success() {
        let (endpoint, server) = endpoint().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token/delete.json"))
            .and(body_string("client_id=app&client_secret=pw"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        endpoint.revoke().await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_platform_is_a_transport_failure() {
        let config = ProviderConfig::from_base_url("http://127.0.0.1:9/").unwrap();
        let endpoint = TokenEndpoint::new(
            reqwest::Client::new(),
            config,
            ClientCredentials::new(ClientId::from_static("app"), ClientSecret::from_static("pw")),
        );

        let err = endpoint.mint().await.unwrap_err();
        assert!(matches!(err, TokenError::TransportFailure(_)));
        assert!(err.is_retryable());
    }
}
