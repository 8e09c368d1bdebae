//! One-time seeding of the field catalog from a remote spreadsheet.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use myinfo_core::{display_value, CatalogError, NewFieldDefinition};
use myinfo_store_sqlite::SqliteCatalog;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";
/// A range without a sheet name addresses the first sheet.
const FIRST_SHEET_RANGE: &str = "A:Z";
const SHEETS_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets.readonly";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
/// Google rejects assertions that live longer than an hour.
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// One spreadsheet row keyed by the header row.
pub type SheetRecord = BTreeMap<String, String>;

/// Anything that can hand over spreadsheet-shaped rows.
pub trait FieldRowSource {
    fn describe(&self) -> String;

    /// # Errors
    /// Returns an error when the rows cannot be fetched or decoded.
    fn fetch_records(&self) -> Result<Vec<SheetRecord>>;
}

/// The credential file: a Google service-account key, or one of the
/// shortcuts `access_token` / `api_key`.
#[derive(Deserialize)]
struct SheetsCredentials {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    client_email: Option<String>,
    #[serde(default)]
    private_key: Option<String>,
    #[serde(default)]
    private_key_id: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    api_key: Option<String>,
}

impl SheetsCredentials {
    fn is_service_account(&self) -> bool {
        self.kind.as_deref() == Some("service_account")
            || (self.client_email.is_some() && self.private_key.is_some())
    }
}

#[derive(Clone, PartialEq, Eq)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    private_key_id: Option<String>,
    token_uri: String,
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key", &"<redacted>")
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl ServiceAccountKey {
    fn from_credentials(credentials: SheetsCredentials, path: &Path) -> Result<Self> {
        let non_blank = |value: Option<String>| value.filter(|value| !value.trim().is_empty());
        let (Some(client_email), Some(private_key)) =
            (non_blank(credentials.client_email), non_blank(credentials.private_key))
        else {
            return Err(anyhow!(
                "service account key {} is missing client_email or private_key",
                path.display()
            ));
        };
        Ok(Self {
            client_email,
            private_key,
            private_key_id: non_blank(credentials.private_key_id),
            token_uri: non_blank(credentials.token_uri)
                .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
        })
    }

    fn claims(&self, issued_at: i64) -> AssertionClaims<'_> {
        AssertionClaims {
            iss: &self.client_email,
            scope: SHEETS_READONLY_SCOPE,
            aud: &self.token_uri,
            iat: issued_at,
            exp: issued_at + ASSERTION_LIFETIME_SECS,
        }
    }

    /// RS256-signed JWT for the OAuth 2.0 JWT bearer grant.
    fn signed_assertion(&self, issued_at: i64) -> Result<String> {
        let key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .context("service account private_key is not an RSA PEM key")?;
        let mut header = Header::new(Algorithm::RS256);
        header.kid.clone_from(&self.private_key_id);
        jsonwebtoken::encode(&header, &self.claims(issued_at), &key)
            .context("failed to sign service account assertion")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SheetsAuth {
    ServiceAccount(ServiceAccountKey),
    Bearer(String),
    ApiKey(String),
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

/// Google Sheets v4 `values` reader.
pub struct SheetsSource {
    agent: ureq::Agent,
    spreadsheet_id: String,
    auth: SheetsAuth,
}

impl SheetsSource {
    /// Build an authenticated source from a credential file.
    ///
    /// Returns `Ok(None)` when the credential file does not exist, which means
    /// no import should happen at all. A service-account key is only parsed
    /// here; the token exchange happens on [`FieldRowSource::fetch_records`].
    ///
    /// # Errors
    /// Returns an error when the file exists but is unreadable, carries no
    /// usable credential, or `sheet_url` names no spreadsheet.
    pub fn from_credentials_file(path: &Path, sheet_url: &str) -> Result<Option<Self>> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("failed to read credential file {}", path.display())))
            }
        };
        let credentials: SheetsCredentials = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse credential file {}", path.display()))?;

        let auth = if credentials.is_service_account() {
            SheetsAuth::ServiceAccount(ServiceAccountKey::from_credentials(credentials, path)?)
        } else {
            match (credentials.access_token, credentials.api_key) {
                (Some(token), _) if !token.trim().is_empty() => SheetsAuth::Bearer(token),
                (_, Some(key)) if !key.trim().is_empty() => SheetsAuth::ApiKey(key),
                _ => {
                    return Err(anyhow!(
                        "credential file {} holds no service account key, access_token or api_key",
                        path.display()
                    ))
                }
            }
        };

        let agent = ureq::AgentBuilder::new().timeout(Duration::from_secs(30)).build();
        Ok(Some(Self { agent, spreadsheet_id: spreadsheet_id_from_url(sheet_url)?, auth }))
    }

    fn exchange_assertion(&self, key: &ServiceAccountKey) -> Result<String> {
        let assertion = key.signed_assertion(OffsetDateTime::now_utc().unix_timestamp())?;
        let token: TokenResponse = self
            .agent
            .post(&key.token_uri)
            .send_form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", &assertion)])
            .with_context(|| {
                format!("failed to obtain an access token for {}", key.client_email)
            })?
            .into_json()
            .context("failed to decode access token response")?;
        tracing::debug!(client_email = %key.client_email, "service account token obtained");
        Ok(token.access_token)
    }
}

impl FieldRowSource for SheetsSource {
    fn describe(&self) -> String {
        format!("spreadsheet {}", self.spreadsheet_id)
    }

    fn fetch_records(&self) -> Result<Vec<SheetRecord>> {
        let url = format!("{SHEETS_API_BASE}/{}/values/{FIRST_SHEET_RANGE}", self.spreadsheet_id);
        let request = self.agent.get(&url);
        let request = match &self.auth {
            SheetsAuth::ServiceAccount(key) => {
                let token = self.exchange_assertion(key)?;
                request.set("Authorization", &format!("Bearer {token}"))
            }
            SheetsAuth::Bearer(token) => request.set("Authorization", &format!("Bearer {token}")),
            SheetsAuth::ApiKey(key) => request.query("key", key),
        };
        let range: ValueRange = request
            .call()
            .with_context(|| format!("failed to fetch {}", self.describe()))?
            .into_json()
            .context("failed to decode spreadsheet values")?;

        let rows = range
            .values
            .into_iter()
            .map(|row| row.iter().map(display_value).collect::<Vec<_>>())
            .collect::<Vec<_>>();
        Ok(records_from_rows(rows))
    }
}

/// Extract the spreadsheet id from a `.../spreadsheets/d/{id}/...` URL.
///
/// # Errors
/// Returns an error when the URL does not carry an id.
pub fn spreadsheet_id_from_url(url: &str) -> Result<String> {
    let (_, rest) = url
        .split_once("/spreadsheets/d/")
        .ok_or_else(|| anyhow!("not a spreadsheet URL: {url}"))?;
    let id = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if id.is_empty() {
        return Err(anyhow!("spreadsheet URL has an empty id: {url}"));
    }
    Ok(id.to_string())
}

/// Turn a header row plus data rows into keyed records.
///
/// Short rows are padded with empty cells; rows with no content are dropped.
#[must_use]
pub fn records_from_rows(rows: Vec<Vec<String>>) -> Vec<SheetRecord> {
    let mut rows = rows.into_iter();
    let Some(headers) = rows.next() else {
        return Vec::new();
    };
    let headers = headers.into_iter().map(|header| header.trim().to_string()).collect::<Vec<_>>();

    rows.filter(|row| row.iter().any(|cell| !cell.trim().is_empty()))
        .map(|row| {
            headers
                .iter()
                .enumerate()
                .filter(|(_, header)| !header.is_empty())
                .map(|(index, header)| (header.clone(), row.get(index).cloned().unwrap_or_default()))
                .collect()
        })
        .collect()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportSummary {
    pub source: String,
    pub imported: usize,
    pub skipped_duplicates: usize,
    pub rejected: usize,
}

/// Insert every record as a field definition, continuing past bad rows.
#[must_use]
pub fn import_records(
    catalog: &mut SqliteCatalog,
    source: &str,
    records: &[SheetRecord],
) -> ImportSummary {
    let mut summary = ImportSummary { source: source.to_string(), ..ImportSummary::default() };

    for (index, record) in records.iter().enumerate() {
        let row = index + 2;
        let definition = match NewFieldDefinition::from_sheet_record(record) {
            Ok(definition) => definition,
            Err(err) => {
                tracing::warn!(row, error = %err, "rejected spreadsheet row");
                summary.rejected += 1;
                continue;
            }
        };

        match catalog.add_field(&definition) {
            Ok(_) => summary.imported += 1,
            Err(err) => match err.downcast_ref::<CatalogError>() {
                Some(CatalogError::DuplicateDefinition { .. }) => {
                    tracing::debug!(row, name = %definition.name, "duplicate spreadsheet row skipped");
                    summary.skipped_duplicates += 1;
                }
                _ => {
                    tracing::warn!(row, error = %err, "failed to import spreadsheet row");
                    summary.rejected += 1;
                }
            },
        }
    }

    tracing::info!(
        source,
        imported = summary.imported,
        skipped_duplicates = summary.skipped_duplicates,
        rejected = summary.rejected,
        "spreadsheet import finished"
    );
    summary
}
