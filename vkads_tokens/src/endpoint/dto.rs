//! Request and response bodies exchanged with the token endpoint

use serde::{Deserialize, Serialize, Serializer};
use vkads_clock::DurationSecs;

use crate::{AccessToken, ClientId, ClientIdRef, ClientSecret, RefreshToken, RefreshTokenRef};

/// The client's identity with the platform
///
/// Serializes as `client_id` and `client_secret`, which is also the complete
/// body of a revocation request.
#[derive(Clone, Debug, Serialize)]
pub struct ClientCredentials {
    /// The client ID
    pub client_id: ClientId,

    /// The client secret
    pub client_secret: ClientSecret,
}

impl ClientCredentials {
    /// Bundles a client ID with its secret
    pub fn new(client_id: ClientId, client_secret: ClientSecret) -> Self {
        Self {
            client_id,
            client_secret,
        }
    }

    /// The client ID
    pub fn client_id(&self) -> &ClientIdRef {
        &self.client_id
    }
}

/// The form body of a `client_credentials` grant
#[derive(Debug)]
pub(crate) struct ClientCredentialsGrant<'a> {
    pub credentials: &'a ClientCredentials,
}

impl Serialize for ClientCredentialsGrant<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut ser = serializer.serialize_struct("ClientCredentialsGrant", 3)?;
        ser.serialize_field("grant_type", "client_credentials")?;
        ser.serialize_field("client_id", &self.credentials.client_id)?;
        ser.serialize_field("client_secret", &self.credentials.client_secret)?;
        ser.end()
    }
}

/// The form body of a `refresh_token` grant
#[derive(Debug)]
pub(crate) struct RefreshTokenGrant<'a> {
    pub credentials: &'a ClientCredentials,
    pub refresh_token: &'a RefreshTokenRef,
}

impl Serialize for RefreshTokenGrant<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut ser = serializer.serialize_struct("RefreshTokenGrant", 4)?;
        ser.serialize_field("grant_type", "refresh_token")?;
        ser.serialize_field("refresh_token", self.refresh_token)?;
        ser.serialize_field("client_id", &self.credentials.client_id)?;
        ser.serialize_field("client_secret", &self.credentials.client_secret)?;
        ser.end()
    }
}

/// A successful token endpoint response
#[derive(Clone, Debug, Deserialize)]
pub struct TokenResponse {
    /// The newly issued access token
    pub access_token: AccessToken,

    /// A new refresh token, when the platform rotates it
    #[serde(default)]
    pub refresh_token: Option<RefreshToken>,

    /// Lifetime of the access token
    pub expires_in: DurationSecs,
}

/// Extracts `(code, message)` from an error response body
///
/// The platform reports `{"code": …, "message": …}`, sometimes nested under
/// `error`, and standard OAuth2 servers report `error` / `error_description`.
/// Anything else keeps the raw body as the message.
pub(crate) fn parse_error_body(body: &[u8]) -> (String, String) {
    use serde_json::Value;

    fn text(v: Option<&Value>) -> Option<String> {
        match v? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    let raw = || String::from_utf8_lossy(body).trim().to_owned();

    let value: Value = match serde_json::from_slice(body) {
        Ok(v @ Value::Object(_)) => v,
        _ => return ("unknown".to_owned(), raw()),
    };

    let object = match value.get("error") {
        Some(nested @ Value::Object(_)) => nested,
        _ => &value,
    };

    let code = text(object.get("code"))
        .or_else(|| text(value.get("error")))
        .unwrap_or_else(|| "unknown".to_owned());
    let message = text(object.get("message"))
        .or_else(|| text(value.get("error_description")))
        .unwrap_or_else(raw);

    (code, message)
}
