//! The agency client resources of the VK Ads API

use reqwest::{header, Method, StatusCode, Url};
use reqwest_middleware::{ClientWithMiddleware, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Base URL of the VK Ads API
pub const DEFAULT_API_BASE_URL: &str = "https://ads.vk.com/api/v2/";

const DEFAULT_SEARCH_LIMIT: u32 = 20;

/// An error returned by the VK Ads API or on the way to it
#[derive(Debug, Error)]
pub enum ApiError {
    /// The API answered with a non-success status
    #[error("VK Ads API answered with status {status}: {message} ({code})")]
    Status {
        /// HTTP status code of the response
        status: u16,
        /// The API's error code, or `unknown`
        code: String,
        /// The API's error message
        message: String,
    },

    /// The request could not be sent or no token could be attached to it
    #[error("request to the VK Ads API failed")]
    Request(#[from] reqwest_middleware::Error),

    /// The response body could not be decoded
    #[error("undecodable response from the VK Ads API")]
    Decode(#[from] serde_json::Error),

    /// A resource URL could not be built
    #[error("invalid VK Ads API URL")]
    InvalidUrl(#[from] url::ParseError),
}

impl ApiError {
    /// The HTTP status the API answered with, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorDetail>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    code: Option<Value>,
    message: Option<String>,
}

/// A client for the agency's advertiser clients
///
/// Requests go through the supplied [`ClientWithMiddleware`], which is expected
/// to carry an [`AccessTokenMiddleware`](crate::AccessTokenMiddleware).
/// Resources are passed through as JSON without interpretation.
#[derive(Clone, Debug)]
pub struct AgencyClients {
    client: ClientWithMiddleware,
    collection_url: Url,
    api_base: Url,
}

impl AgencyClients {
    /// Constructs a client for the production API
    pub fn new(client: ClientWithMiddleware) -> Self {
        Self::with_base_url(client, DEFAULT_API_BASE_URL).expect("default API base URL is valid")
    }

    /// Constructs a client for the API rooted at `api_base`
    pub fn with_base_url(client: ClientWithMiddleware, api_base: &str) -> Result<Self, ApiError> {
        let mut api_base = Url::parse(api_base)?;
        if !api_base.path().ends_with('/') {
            let path = format!("{}/", api_base.path());
            api_base.set_path(&path);
        }

        Ok(Self {
            client,
            collection_url: api_base.join("agency/clients.json")?,
            api_base,
        })
    }

    fn client_url(&self, client_id: u64) -> Result<Url, ApiError> {
        Ok(self
            .api_base
            .join(&format!("agency/clients/{}.json", client_id))?)
    }

    /// Lists the agency's clients, passing `params` as query parameters
    pub async fn list_clients<Q>(&self, params: &Q) -> Result<Value, ApiError>
    where
        Q: Serialize + ?Sized,
    {
        let req = self
            .request(Method::GET, self.collection_url.clone())
            .query(params);
        send(req).await
    }

    /// Searches the agency's clients by name
    ///
    /// A `limit` of `None` returns up to 20 clients.
    pub async fn search_clients(&self, query: &str, limit: Option<u32>) -> Result<Value, ApiError> {
        let limit = limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
        self.list_clients(&[("_q", query.to_owned()), ("limit", limit.to_string())])
            .await
    }

    /// Looks up a single client by its user ID
    pub async fn get_client(&self, client_id: u64) -> Result<Option<Value>, ApiError> {
        let mut page = self.list_clients(&[("_user__id", client_id)]).await?;
        let first = page
            .get_mut("items")
            .and_then(Value::as_array_mut)
            .filter(|items| !items.is_empty())
            .map(|items| items.swap_remove(0));
        Ok(first)
    }

    /// Creates a new client, or adds an existing advertiser to the agency
    pub async fn create_client<T>(&self, data: &T) -> Result<Value, ApiError>
    where
        T: Serialize + ?Sized,
    {
        let req = self
            .request(Method::POST, self.collection_url.clone())
            .json(data);
        send(req).await
    }

    /// Updates a client's details
    pub async fn update_client<T>(&self, client_id: u64, data: &T) -> Result<Value, ApiError>
    where
        T: Serialize + ?Sized,
    {
        let req = self
            .request(Method::POST, self.client_url(client_id)?)
            .json(data);
        send(req).await
    }

    /// Removes a client from the agency
    pub async fn delete_client(&self, client_id: u64) -> Result<Value, ApiError> {
        let req = self.request(Method::DELETE, self.client_url(client_id)?);
        send(req).await
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .header(header::ACCEPT, "application/json")
    }
}

#[tracing::instrument(level = "debug", skip(req), err(Display))]
async fn send(req: RequestBuilder) -> Result<Value, ApiError> {
    let resp = req.send().await?;
    let status = resp.status();
    let url = resp.url().clone();
    let body = resp.bytes().await.map_err(reqwest_middleware::Error::from)?;

    if status == StatusCode::NO_CONTENT {
        return Ok(json!({"success": true}));
    }

    if status.is_success() {
        tracing::debug!(%url, status = status.as_u16(), "VK Ads API call succeeded");
        return Ok(serde_json::from_slice(&body)?);
    }

    let detail = serde_json::from_slice::<ErrorEnvelope>(&body)
        .ok()
        .and_then(|e| e.error);
    let code = match detail.as_ref().and_then(|d| d.code.as_ref()) {
        Some(Value::String(code)) => code.clone(),
        Some(code) => code.to_string(),
        None => "unknown".to_owned(),
    };
    let message = detail
        .and_then(|d| d.message)
        .unwrap_or_else(|| "Unknown error".to_owned());

    tracing::error!(
        %url,
        status = status.as_u16(),
        error.code = %code,
        error.message = %message,
        "VK Ads API error"
    );

    Err(ApiError::Status {
        status: status.as_u16(),
        code,
        message,
    })
}
