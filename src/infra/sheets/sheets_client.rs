// =============================================================================
// GOOGLE SHEETS CLIENT WITH SERVICE ACCOUNT AUTHENTICATION
// =============================================================================
//
// HTTP implementation of the SpreadsheetApi port against the Sheets v4
// values endpoints.
//
// **Authentication:**
// A service account is the only supported credential: create one in Google
// Cloud Console, enable the Sheets API, share the target spreadsheet (or a
// Drive folder) with the service account email, and point the engine at the
// JSON key.
//
// **Environment Variables:**
// - `GSHEET_SERVICE_ACCOUNT_KEY` - Path to the service account JSON key file
// - `GSHEET_SERVICE_ACCOUNT_JSON` - The JSON content directly (for deployment)
//
// **Batching:**
// The engine hands over an ordered operation list. Consecutive operations of
// the same kind collapse into a single `values:batchUpdate` /
// `values:batchClear` call, which preserves submission order while keeping
// the call count minimal (one call for the common all-writes sync).

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::core::sheet::{ApiError, CellValue, OpKind, OpOutcome, SpreadsheetApi, WriteOp};

const SHEETS_BASE_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const SHEETS_SCOPE: &str =
    "https://www.googleapis.com/auth/spreadsheets https://www.googleapis.com/auth/drive";

// =============================================================================
// SERVICE ACCOUNT AUTHENTICATION
// =============================================================================

/// Service account credentials from the JSON key file.
#[derive(Debug, Clone, Deserialize)]
struct ServiceAccountCredentials {
    /// The service account email (used as issuer in JWT).
    client_email: String,

    /// The private key in PEM format.
    private_key: String,

    /// The token URI (where to exchange JWT for an access token).
    token_uri: String,
}

/// JWT claims for Google OAuth2.
#[derive(Debug, Serialize)]
struct JwtClaims {
    /// Issuer (service account email).
    iss: String,

    /// Scope (what APIs we want access to).
    scope: String,

    /// Audience (token endpoint).
    aud: String,

    /// Issued at (Unix timestamp).
    iat: u64,

    /// Expiration (Unix timestamp, max 1 hour from iat).
    exp: u64,
}

/// Response from Google's token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[allow(dead_code)]
    expires_in: u64,
    #[allow(dead_code)]
    token_type: String,
}

/// Cached access token with expiration.
struct CachedToken {
    token: String,
    expires_at: SystemTime,
}

/// Authenticator that handles OAuth2 with service account credentials.
pub struct ServiceAccountAuth {
    credentials: ServiceAccountCredentials,
    client: Client,
    cached_token: Arc<RwLock<Option<CachedToken>>>,
}

impl ServiceAccountAuth {
    /// Creates a new authenticator from a JSON key file path.
    pub async fn from_file(path: &str) -> Result<Self, ApiError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ApiError::Auth(format!("cannot read key file {}: {}", path, e)))?;
        Self::from_json(&content)
    }

    /// Creates a new authenticator from JSON content.
    pub fn from_json(json: &str) -> Result<Self, ApiError> {
        let credentials: ServiceAccountCredentials = serde_json::from_str(json)
            .map_err(|e| ApiError::Auth(format!("invalid service account JSON: {}", e)))?;
        Ok(Self {
            credentials,
            client: Client::new(),
            cached_token: Arc::new(RwLock::new(None)),
        })
    }

    /// Creates from environment variables.
    pub async fn from_env() -> Result<Self, ApiError> {
        if let Ok(path) = std::env::var("GSHEET_SERVICE_ACCOUNT_KEY") {
            return Self::from_file(&path).await;
        }

        if let Ok(json) = std::env::var("GSHEET_SERVICE_ACCOUNT_JSON") {
            return Self::from_json(&json);
        }

        Err(ApiError::Auth(
            "Neither GSHEET_SERVICE_ACCOUNT_KEY nor GSHEET_SERVICE_ACCOUNT_JSON is set".to_string(),
        ))
    }

    /// Gets a valid access token, refreshing if necessary.
    pub async fn get_access_token(&self) -> Result<String, ApiError> {
        // Check if we have a valid cached token
        {
            let cached = self.cached_token.read().await;
            if let Some(token) = cached.as_ref() {
                if token.expires_at > SystemTime::now() + Duration::from_secs(60) {
                    return Ok(token.token.clone());
                }
            }
        }

        // Need to refresh the token
        let new_token = self.fetch_new_token().await?;

        // Cache it
        {
            let mut cached = self.cached_token.write().await;
            *cached = Some(CachedToken {
                token: new_token.clone(),
                expires_at: SystemTime::now() + Duration::from_secs(55 * 60),
            });
        }

        Ok(new_token)
    }

    /// Fetches a new access token from Google.
    async fn fetch_new_token(&self) -> Result<String, ApiError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| ApiError::Auth(e.to_string()))?
            .as_secs();

        let claims = JwtClaims {
            iss: self.credentials.client_email.clone(),
            scope: SHEETS_SCOPE.to_string(),
            aud: self.credentials.token_uri.clone(),
            iat: now,
            exp: now + 3600,
        };

        let header = Header::new(Algorithm::RS256);
        let key = EncodingKey::from_rsa_pem(self.credentials.private_key.as_bytes())
            .map_err(|e| ApiError::Auth(format!("invalid private key: {}", e)))?;
        let jwt = encode(&header, &claims, &key)
            .map_err(|e| ApiError::Auth(format!("failed to sign JWT: {}", e)))?;

        let response = self
            .client
            .post(&self.credentials.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", &jwt),
            ])
            .send()
            .await
            .map_err(|e| ApiError::Auth(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::Auth(format!(
                "token exchange failed ({}): {}",
                status, text
            )));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Auth(e.to_string()))?;
        Ok(token_response.access_token)
    }
}

// =============================================================================
// SHEETS API RESPONSE STRUCTURES
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSpreadsheetResponse {
    spreadsheet_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ValueRange {
    range: String,
    values: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchUpdateRequest {
    value_input_option: &'static str,
    data: Vec<ValueRange>,
}

#[derive(Debug, Serialize)]
struct BatchClearRequest {
    ranges: Vec<String>,
}

// =============================================================================
// SHEETS CLIENT
// =============================================================================

/// HTTP client for the Sheets v4 values endpoints.
pub struct SheetsApiClient {
    client: Client,
    auth: ServiceAccountAuth,
    base_url: String,
}

impl SheetsApiClient {
    pub fn new(auth: ServiceAccountAuth) -> Self {
        Self {
            client: Client::new(),
            auth,
            base_url: SHEETS_BASE_URL.to_string(),
        }
    }

    /// Creates a client with service account credentials from the
    /// environment.
    pub async fn from_env() -> Result<Self, ApiError> {
        let auth = ServiceAccountAuth::from_env().await?;
        Ok(Self::new(auth))
    }

    async fn post_json(
        &self,
        url: &str,
        token: &str,
        body: &impl Serialize,
    ) -> Result<reqwest::Response, ApiError> {
        self.client
            .post(url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::Http(e.to_string()))
    }

    /// One batched call for a run of same-kind operations. Returns an error
    /// string on failure so the caller can fan it out positionally.
    async fn apply_run(
        &self,
        token: &str,
        spreadsheet_id: &str,
        worksheet: &str,
        run: &[WriteOp],
    ) -> Result<(), String> {
        let kind = run[0].kind;
        let response = match kind {
            OpKind::Write => {
                let request = BatchUpdateRequest {
                    value_input_option: "USER_ENTERED",
                    data: run
                        .iter()
                        .map(|op| ValueRange {
                            range: sheet_range(worksheet, op),
                            values: op
                                .rows
                                .iter()
                                .map(|row| row.iter().map(cell_to_json).collect())
                                .collect(),
                        })
                        .collect(),
                };
                let url = format!("{}/{}/values:batchUpdate", self.base_url, spreadsheet_id);
                tracing::debug!(ranges = run.len(), "values:batchUpdate");
                self.post_json(&url, token, &request).await
            }
            OpKind::Clear => {
                let request = BatchClearRequest {
                    ranges: run.iter().map(|op| sheet_range(worksheet, op)).collect(),
                };
                let url = format!("{}/{}/values:batchClear", self.base_url, spreadsheet_id);
                tracing::debug!(ranges = run.len(), "values:batchClear");
                self.post_json(&url, token, &request).await
            }
        };

        let response = response.map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(format!("batch call failed ({}): {}", status, text));
        }
        Ok(())
    }
}

#[async_trait]
impl SpreadsheetApi for SheetsApiClient {
    async fn create_spreadsheet(&self, title: &str) -> Result<String, ApiError> {
        let token = self.auth.get_access_token().await?;

        let body = serde_json::json!({ "properties": { "title": title } });
        let response = self.post_json(&self.base_url, &token, &body).await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::Http(format!(
                "spreadsheet creation failed ({}): {}",
                status, text
            )));
        }

        let created: CreateSpreadsheetResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Http(e.to_string()))?;
        tracing::info!(spreadsheet_id = %created.spreadsheet_id, "spreadsheet created");
        Ok(created.spreadsheet_id)
    }

    async fn apply(
        &self,
        spreadsheet_id: &str,
        worksheet: &str,
        ops: &[WriteOp],
    ) -> Result<Vec<OpOutcome>, ApiError> {
        let token = self.auth.get_access_token().await?;

        let mut outcomes = Vec::with_capacity(ops.len());
        let mut failed = false;
        for run in group_runs(ops) {
            if failed {
                outcomes.extend(std::iter::repeat(OpOutcome::Skipped).take(run.len()));
                continue;
            }
            match self
                .apply_run(&token, spreadsheet_id, worksheet, run)
                .await
            {
                Ok(()) => {
                    outcomes.extend(std::iter::repeat(OpOutcome::Confirmed).take(run.len()));
                }
                Err(message) => {
                    tracing::warn!(error = %message, "batch call failed");
                    // A rejected batch applies none of its operations.
                    outcomes.extend(
                        std::iter::repeat(OpOutcome::Failed(message)).take(run.len()),
                    );
                    failed = true;
                }
            }
        }
        Ok(outcomes)
    }
}

/// Split an ordered op list into maximal runs of the same kind, preserving
/// order.
fn group_runs(ops: &[WriteOp]) -> Vec<&[WriteOp]> {
    let mut runs = Vec::new();
    let mut start = 0;
    for i in 1..=ops.len() {
        if i == ops.len() || ops[i].kind != ops[start].kind {
            runs.push(&ops[start..i]);
            start = i;
        }
    }
    runs
}

/// A1 range with the worksheet prefix, e.g. `'Sheet1'!A2:C5`.
fn sheet_range(worksheet: &str, op: &WriteOp) -> String {
    format!("'{}'!{}", worksheet, op.range.a1())
}

fn cell_to_json(value: &CellValue) -> serde_json::Value {
    match value {
        CellValue::Empty => serde_json::Value::String(String::new()),
        CellValue::Text(t) => serde_json::Value::String(t.clone()),
        CellValue::Int(i) => serde_json::json!(i),
        CellValue::Number(f) => serde_json::json!(f),
        CellValue::Bool(b) => serde_json::json!(b),
    }
}
