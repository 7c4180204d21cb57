use super::AuthorizationBackend;
use crate::{
    config::{Credentials, FgaClientConfig},
    error::{FgaError, Result},
    models::*,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

const READ_PAGE_SIZE: u32 = 100;

/// Refresh tokens this long before the issuer says they expire
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Write kinds whose key conflicts get their own error variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteOp {
    Write,
    Delete,
}

/// OpenFGA HTTP API client
pub struct HttpBackend {
    client: reqwest::Client,
    api_url: String,
    store_id: String,
    authorization_model_id: Option<String>,
    credentials: Credentials,
    token: Mutex<Option<CachedToken>>,
}

struct CachedToken {
    value: SecretString,
    refresh_at: Instant,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireTupleKey {
    user: String,
    relation: String,
    object: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    condition: Option<Condition>,
}

impl From<TupleKey> for WireTupleKey {
    fn from(key: TupleKey) -> Self {
        Self {
            user: key.user,
            relation: key.relation,
            object: key.object,
            condition: None,
        }
    }
}

impl From<TupleWrite> for WireTupleKey {
    fn from(write: TupleWrite) -> Self {
        Self {
            condition: write.condition,
            ..Self::from(write.key)
        }
    }
}

#[derive(Debug, Serialize)]
struct TupleKeys {
    tuple_keys: Vec<WireTupleKey>,
}

#[derive(Debug, Serialize)]
struct WriteBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    writes: Option<TupleKeys>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deletes: Option<TupleKeys>,
    #[serde(skip_serializing_if = "Option::is_none")]
    authorization_model_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct CheckBody<'a> {
    tuple_key: WireTupleKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<Context>,
    #[serde(skip_serializing_if = "Option::is_none")]
    authorization_model_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    #[serde(default)]
    allowed: bool,
}

#[derive(Debug, Serialize)]
struct ListObjectsBody<'a> {
    #[serde(rename = "type")]
    object_type: &'a str,
    relation: String,
    user: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<Context>,
    #[serde(skip_serializing_if = "Option::is_none")]
    authorization_model_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ListObjectsResponse {
    #[serde(default)]
    objects: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireObject {
    #[serde(rename = "type")]
    object_type: String,
    id: String,
}

#[derive(Debug, Serialize)]
struct UserTypeFilter<'a> {
    #[serde(rename = "type")]
    user_type: &'a str,
}

#[derive(Debug, Serialize)]
struct ListUsersBody<'a> {
    object: WireObject,
    relation: String,
    user_filters: Vec<UserTypeFilter<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<Context>,
    #[serde(skip_serializing_if = "Option::is_none")]
    authorization_model_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ListUsersResponse {
    #[serde(default)]
    users: Vec<WireUser>,
}

/// Usersets and wildcards are skipped, only concrete objects are returned
#[derive(Debug, Deserialize)]
struct WireUser {
    #[serde(default)]
    object: Option<WireObject>,
}

#[derive(Debug, Serialize)]
struct ReadBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    tuple_key: Option<ReadTupleKey<'a>>,
    page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    continuation_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct ReadTupleKey<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    relation: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    object: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ReadResponse {
    #[serde(default)]
    tuples: Vec<WireTuple>,
    #[serde(default)]
    continuation_token: String,
}

#[derive(Debug, Deserialize)]
struct WireTuple {
    key: WireTupleKey,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    audience: &'a str,
    grant_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

impl HttpBackend {
    /// Create a client for the store described by `config`
    pub fn new(config: &FgaClientConfig) -> Result<Self> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| FgaError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            store_id: config.store_id.clone(),
            authorization_model_id: config.authorization_model_id.clone(),
            credentials: config.credentials.clone(),
            token: Mutex::new(None),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/stores/{}/{}", self.api_url, self.store_id, endpoint)
    }

    fn model_id(&self) -> Option<&str> {
        self.authorization_model_id.as_deref()
    }

    async fn bearer_token(&self) -> Result<Option<String>> {
        match &self.credentials {
            Credentials::None => Ok(None),
            Credentials::ApiToken { token } => Ok(Some(token.expose_secret().clone())),
            Credentials::ClientCredentials {
                api_token_issuer,
                api_audience,
                client_id,
                client_secret,
            } => {
                let cached = self
                    .token
                    .lock()
                    .as_ref()
                    .filter(|cached| Instant::now() < cached.refresh_at)
                    .map(|cached| cached.value.expose_secret().clone());
                if cached.is_some() {
                    return Ok(cached);
                }

                let issuer = if api_token_issuer.starts_with("http://")
                    || api_token_issuer.starts_with("https://")
                {
                    api_token_issuer.trim_end_matches('/').to_string()
                } else {
                    format!("https://{}", api_token_issuer.trim_end_matches('/'))
                };
                debug!(issuer = %issuer, "Requesting engine access token");

                let response = self
                    .client
                    .post(format!("{}/oauth/token", issuer))
                    .json(&TokenRequest {
                        client_id,
                        client_secret: client_secret.expose_secret(),
                        audience: api_audience,
                        grant_type: "client_credentials",
                    })
                    .send()
                    .await
                    .map_err(transport_error)?;

                if !response.status().is_success() {
                    return Err(FgaError::Authentication(format!(
                        "token endpoint returned {}",
                        response.status()
                    )));
                }
                let token: TokenResponse = response.json().await.map_err(|e| {
                    FgaError::Authentication(format!("invalid token response: {}", e))
                })?;

                let lifetime = Duration::from_secs(token.expires_in.unwrap_or(0));
                let refresh_at = Instant::now() + lifetime.saturating_sub(TOKEN_EXPIRY_MARGIN);
                *self.token.lock() = Some(CachedToken {
                    value: SecretString::new(token.access_token.clone()),
                    refresh_at,
                });
                Ok(Some(token.access_token))
            }
        }
    }

    async fn post<B, R>(&self, endpoint: &str, body: &B, op: Option<(WriteOp, &str)>) -> Result<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let mut request = self.client.post(self.url(endpoint)).json(body);
        if let Some(token) = self.bearer_token().await? {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| {
                    FgaError::EngineUnavailable(format!("malformed {} response: {}", endpoint, e))
                });
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status, &body, op))
    }
}

fn transport_error(err: reqwest::Error) -> FgaError {
    FgaError::EngineUnavailable(err.to_string())
}

/// Turns an error response into a typed error
///
/// The engine reports key conflicts with the generic
/// `write_failed_due_to_invalid_input` code for both writes and deletes.
/// Combined with the operation that was sent, the message still tells the
/// two apart; this is the only place that reads it.
fn classify_failure(
    status: reqwest::StatusCode,
    body: &str,
    op: Option<(WriteOp, &str)>,
) -> FgaError {
    let api_error: ApiError = serde_json::from_str(body).unwrap_or(ApiError {
        code: String::new(),
        message: body.to_string(),
    });
    let message = api_error.message.to_ascii_lowercase();

    match (status.as_u16(), op) {
        (400 | 409, Some((WriteOp::Write, keys))) if message.contains("already exist") => {
            FgaError::DuplicateGrant {
                key: keys.to_string(),
            }
        }
        (400 | 404, Some((WriteOp::Delete, keys)))
            if message.contains("does not exist") || message.contains("did not exist") =>
        {
            FgaError::NotFound {
                key: keys.to_string(),
            }
        }
        (400 | 404, None) if is_undefined_relation(&api_error.code, &message) => {
            FgaError::UndefinedRelation {
                message: api_error.message,
            }
        }
        (401 | 403, _) => FgaError::Authentication(api_error.message),
        (429 | 500..=599, _) => {
            FgaError::EngineUnavailable(format!("{}: {}", status, api_error.message))
        }
        _ => FgaError::Validation {
            code: if api_error.code.is_empty() {
                status.to_string()
            } else {
                api_error.code
            },
            message: api_error.message,
        },
    }
}

/// Queries naming a relation the model lacks on that type, e.g.
/// `relation 'Workspace#writer' not found`
fn is_undefined_relation(code: &str, message: &str) -> bool {
    code == "relation_not_found"
        || (message.contains("relation '") && message.contains("not found"))
}

fn describe_keys<'a>(keys: impl Iterator<Item = &'a TupleKey>) -> String {
    keys.map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

#[async_trait]
impl AuthorizationBackend for HttpBackend {
    async fn write(&self, writes: Vec<TupleWrite>) -> Result<()> {
        let keys = describe_keys(writes.iter().map(|write| &write.key));
        let body = WriteBody {
            writes: Some(TupleKeys {
                tuple_keys: writes.into_iter().map(WireTupleKey::from).collect(),
            }),
            deletes: None,
            authorization_model_id: self.model_id(),
        };
        let _: serde_json::Value = self
            .post("write", &body, Some((WriteOp::Write, keys.as_str())))
            .await?;
        Ok(())
    }

    async fn delete(&self, deletes: Vec<TupleKey>) -> Result<()> {
        let keys = describe_keys(deletes.iter());
        let body = WriteBody {
            writes: None,
            deletes: Some(TupleKeys {
                tuple_keys: deletes.into_iter().map(WireTupleKey::from).collect(),
            }),
            authorization_model_id: self.model_id(),
        };
        let _: serde_json::Value = self
            .post("write", &body, Some((WriteOp::Delete, keys.as_str())))
            .await?;
        Ok(())
    }

    async fn check(&self, key: TupleKey, context: Option<Context>) -> Result<bool> {
        let body = CheckBody {
            tuple_key: key.into(),
            context,
            authorization_model_id: self.model_id(),
        };
        let response: CheckResponse = self.post("check", &body, None).await?;
        Ok(response.allowed)
    }

    async fn list_objects(
        &self,
        user: ObjectRef,
        relation: String,
        object_type: ObjectType,
        context: Option<Context>,
    ) -> Result<Vec<ObjectRef>> {
        let body = ListObjectsBody {
            object_type: object_type.as_str(),
            relation,
            user: user.to_string(),
            context,
            authorization_model_id: self.model_id(),
        };
        let response: ListObjectsResponse = self.post("list-objects", &body, None).await?;
        response
            .objects
            .iter()
            .map(|object| object.parse::<ObjectRef>())
            .collect()
    }

    async fn list_users(
        &self,
        object: ObjectRef,
        relation: String,
        user_type: ObjectType,
        context: Option<Context>,
    ) -> Result<Vec<ObjectRef>> {
        let body = ListUsersBody {
            object: WireObject {
                object_type: object.object_type.as_str().to_string(),
                id: object.id,
            },
            relation,
            user_filters: vec![UserTypeFilter {
                user_type: user_type.as_str(),
            }],
            context,
            authorization_model_id: self.model_id(),
        };
        let response: ListUsersResponse = self.post("list-users", &body, None).await?;
        response
            .users
            .into_iter()
            .filter_map(|user| user.object)
            .map(|object| -> Result<ObjectRef> {
                Ok(ObjectRef::new(object.object_type.parse()?, &object.id))
            })
            .collect()
    }

    async fn read(&self, filter: ReadFilter) -> Result<Vec<StoredTuple>> {
        let mut tuples = Vec::new();
        let mut continuation_token = None;
        loop {
            let body = ReadBody {
                tuple_key: (filter != ReadFilter::default()).then(|| ReadTupleKey {
                    user: filter.user.as_deref(),
                    relation: filter.relation.as_deref(),
                    object: filter.object.as_deref(),
                }),
                page_size: READ_PAGE_SIZE,
                continuation_token: continuation_token.take(),
            };
            let page: ReadResponse = self.post("read", &body, None).await?;

            tuples.extend(page.tuples.into_iter().map(|tuple| StoredTuple {
                key: TupleKey {
                    user: tuple.key.user,
                    relation: tuple.key.relation,
                    object: tuple.key.object,
                },
                condition: tuple.key.condition,
                timestamp: tuple.timestamp,
            }));

            if page.continuation_token.is_empty() {
                break;
            }
            continuation_token = Some(page.continuation_token);
        }
        Ok(tuples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CONFLICT_SUFFIX: &str =
        "tuple to be written already existed or the tuple to be deleted did not exist";

    fn error_body(code: &str, message: &str) -> String {
        json!({ "code": code, "message": message }).to_string()
    }

    #[test]
    fn test_classify_duplicate_write() {
        let body = error_body(
            "write_failed_due_to_invalid_input",
            &format!(
                "cannot write a tuple which already exists: user: 'User:Bob', \
                 relation: 'editor', object: 'Account:2': {CONFLICT_SUFFIX}"
            ),
        );
        let err = classify_failure(
            reqwest::StatusCode::BAD_REQUEST,
            &body,
            Some((WriteOp::Write, "User:Bob editor Account:2")),
        );
        match err {
            FgaError::DuplicateGrant { key } => assert_eq!(key, "User:Bob editor Account:2"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_classify_missing_delete() {
        let body = error_body(
            "write_failed_due_to_invalid_input",
            &format!(
                "cannot delete a tuple which does not exist: user: 'User:Bob': {CONFLICT_SUFFIX}"
            ),
        );
        let err = classify_failure(
            reqwest::StatusCode::BAD_REQUEST,
            &body,
            Some((WriteOp::Delete, "User:Bob editor Account:2")),
        );
        assert!(err.is_not_found());
    }

    #[test]
    fn test_classify_undefined_relation() {
        let body = error_body("validation_error", "relation 'Account#writer' not found");
        match classify_failure(reqwest::StatusCode::BAD_REQUEST, &body, None) {
            FgaError::UndefinedRelation { message } => assert!(message.contains("Account#writer")),
            other => panic!("unexpected error: {other:?}"),
        }

        let body = error_body("relation_not_found", "unknown relation");
        let err = classify_failure(reqwest::StatusCode::BAD_REQUEST, &body, None);
        assert!(err.is_undefined_relation());
    }

    #[test]
    fn test_classify_other_failures() {
        let body = error_body("validation_error", "invalid object 'Account:'");
        match classify_failure(reqwest::StatusCode::BAD_REQUEST, &body, None) {
            FgaError::Validation { code, .. } => assert_eq!(code, "validation_error"),
            other => panic!("unexpected error: {other:?}"),
        }

        assert!(matches!(
            classify_failure(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down", None),
            FgaError::EngineUnavailable(_)
        ));
        assert!(matches!(
            classify_failure(reqwest::StatusCode::UNAUTHORIZED, "{}", None),
            FgaError::Authentication(_)
        ));
    }
}
