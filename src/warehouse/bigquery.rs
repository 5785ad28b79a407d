use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, instrument};

use super::{Dialect, Warehouse};
use crate::error::{RelayError, Result};
use crate::types::{CellValue, QueryResult, ResultRow, TableSchema};

const API_BASE: &str = "https://bigquery.googleapis.com/bigquery/v2";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const POLL_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    job_reference: Option<JobReference>,
    schema: Option<Schema>,
    #[serde(default)]
    rows: Vec<Row>,
    page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Schema {
    #[serde(default)]
    fields: Vec<Field>,
}

#[derive(Debug, Clone, Deserialize)]
struct Field {
    name: String,
    #[serde(rename = "type", default)]
    field_type: String,
    mode: Option<String>,
    #[serde(default)]
    fields: Vec<Field>,
}

impl Field {
    fn is_repeated(&self) -> bool {
        self.mode.as_deref() == Some("REPEATED")
    }

    fn is_record(&self) -> bool {
        matches!(self.field_type.as_str(), "RECORD" | "STRUCT")
    }
}

#[derive(Debug, Deserialize)]
struct Row {
    #[serde(default)]
    f: Vec<Cell>,
}

#[derive(Debug, Deserialize)]
struct Cell {
    #[serde(default)]
    v: Value,
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
}

/// BigQuery over its REST API. Credentials are either a static OAuth access
/// token or whatever the GCE metadata server hands out for the default
/// service account.
pub struct BigQueryWarehouse {
    http: reqwest::Client,
    project: String,
    access_token: Option<String>,
    api_base: String,
    metadata_token_url: String,
}

impl BigQueryWarehouse {
    pub fn new(http: reqwest::Client, project: String, access_token: Option<String>) -> Self {
        Self {
            http,
            project,
            access_token,
            api_base: API_BASE.to_string(),
            metadata_token_url: METADATA_TOKEN_URL.to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_metadata_token_url(mut self, url: impl Into<String>) -> Self {
        self.metadata_token_url = url.into();
        self
    }

    async fn token(&self) -> Result<String> {
        if let Some(token) = &self.access_token {
            return Ok(token.clone());
        }
        let resp = self
            .http
            .get(&self.metadata_token_url)
            .header("Metadata-Flavor", "Google")
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| RelayError::SourceQuery(format!("metadata token request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(RelayError::SourceQuery(format!(
                "metadata token request failed status={}",
                resp.status()
            )));
        }
        let token: MetadataToken = resp
            .json()
            .await
            .map_err(|e| RelayError::SourceQuery(format!("metadata token parse failed: {e}")))?;
        Ok(token.access_token)
    }

    fn auth_headers(&self, token: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| RelayError::SourceQuery(format!("invalid access token: {e}")))?;
        headers.insert(AUTHORIZATION, value);
        Ok(headers)
    }

    async fn read_response(resp: reqwest::Response) -> Result<QueryResponse> {
        let status = resp.status();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| RelayError::SourceQuery(format!("read body failed: {e}")))?;
        if !status.is_success() {
            return Err(RelayError::SourceQuery(api_error_message(status.as_u16(), &bytes)));
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| RelayError::SourceQuery(format!("query response parse failed: {e}")))
    }

    async fn get_results(
        &self,
        headers: &HeaderMap,
        job: &JobReference,
        page_token: Option<&str>,
    ) -> Result<QueryResponse> {
        let url = format!(
            "{}/projects/{}/queries/{}",
            self.api_base, self.project, job.job_id
        );
        let mut params: Vec<(&str, String)> = vec![("timeoutMs", POLL_TIMEOUT_MS.to_string())];
        if let Some(location) = &job.location {
            params.push(("location", location.clone()));
        }
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }
        let resp = self
            .http
            .get(url)
            .headers(headers.clone())
            .query(&params)
            .send()
            .await
            .map_err(|e| RelayError::SourceQuery(format!("getQueryResults failed: {e}")))?;
        Self::read_response(resp).await
    }
}

#[async_trait]
impl Warehouse for BigQueryWarehouse {
    fn dialect(&self) -> Dialect {
        Dialect::BigQuery
    }

    #[instrument(name = "bigquery_query", skip(self, sql), fields(project = %self.project))]
    async fn query(&self, sql: &str) -> Result<QueryResult> {
        let token = self.token().await?;
        let headers = self.auth_headers(&token)?;
        let url = format!("{}/projects/{}/queries", self.api_base, self.project);
        let body = json!({
            "query": sql,
            "useLegacySql": false,
            "timeoutMs": POLL_TIMEOUT_MS,
        });
        let resp = self
            .http
            .post(url)
            .headers(headers.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| RelayError::SourceQuery(format!("jobs.query failed: {e}")))?;
        let mut page = Self::read_response(resp).await?;

        let job = page.job_reference.clone();
        while !page.job_complete {
            let job = job.as_ref().ok_or_else(|| {
                RelayError::SourceQuery("incomplete query without job reference".to_string())
            })?;
            debug!(job_id = %job.job_id, "query still running");
            page = self.get_results(&headers, job, None).await?;
        }

        let fields = page.schema.clone().map(|s| s.fields).unwrap_or_default();
        let mut result = QueryResult {
            schema: TableSchema::new(fields.iter().map(|f| f.name.clone())),
            rows: Vec::new(),
        };
        loop {
            result.rows.extend(decode_rows(&fields, &page.rows)?);
            let Some(next) = page.page_token.take() else {
                break;
            };
            let job = job.as_ref().ok_or_else(|| {
                RelayError::SourceQuery("paged result without job reference".to_string())
            })?;
            page = self.get_results(&headers, job, Some(&next)).await?;
        }
        Ok(result)
    }
}

fn api_error_message(status: u16, body: &[u8]) -> String {
    let message = serde_json::from_slice::<Value>(body).ok().and_then(|v| {
        v.pointer("/error/message")
            .and_then(Value::as_str)
            .map(ToString::to_string)
    });
    match message {
        Some(m) => format!("{status}: {m}"),
        None => format!("{status}: {}", String::from_utf8_lossy(body)),
    }
}

fn decode_rows(fields: &[Field], rows: &[Row]) -> Result<Vec<ResultRow>> {
    rows.iter()
        .map(|row| {
            let mut out = ResultRow::new();
            for (field, cell) in fields.iter().zip(&row.f) {
                out.insert(field.name.clone(), decode_cell(field, &cell.v)?);
            }
            Ok(out)
        })
        .collect()
}

fn invalid(field: &Field, e: impl std::fmt::Display) -> RelayError {
    RelayError::SourceQuery(format!("column {}: {e}", field.name))
}

/// Strips the `{"v": ...}` and `{"f": [...]}` wire envelopes from repeated and
/// record values, keying record members by their subfield names.
fn plain_json(field: &Field, v: &Value) -> Value {
    match v {
        Value::Array(items) if field.is_repeated() => Value::Array(
            items
                .iter()
                .map(|item| match item.get("v") {
                    Some(inner) => plain_member(field, inner),
                    None => Value::Null,
                })
                .collect(),
        ),
        _ => plain_member(field, v),
    }
}

fn plain_member(field: &Field, v: &Value) -> Value {
    let cells = match v.get("f") {
        Some(Value::Array(cells)) if field.is_record() => cells,
        _ => return v.clone(),
    };
    Value::Object(
        field
            .fields
            .iter()
            .zip(cells)
            .map(|(sub, cell)| {
                let value = match cell.get("v") {
                    Some(inner) => plain_json(sub, inner),
                    None => Value::Null,
                };
                (sub.name.clone(), value)
            })
            .collect(),
    )
}

fn decode_cell(field: &Field, v: &Value) -> Result<CellValue> {
    if v.is_null() {
        return Ok(CellValue::Null);
    }
    if field.is_repeated() || field.is_record() {
        return Ok(CellValue::Text(plain_json(field, v).to_string()));
    }
    let raw = match v {
        Value::String(s) => s.as_str(),
        other => return Ok(CellValue::Text(other.to_string())),
    };
    let cell = match field.field_type.as_str() {
        "INTEGER" | "INT64" => CellValue::Integer(raw.parse().map_err(|e| invalid(field, e))?),
        "FLOAT" | "FLOAT64" => CellValue::Float(raw.parse().map_err(|e| invalid(field, e))?),
        "BOOLEAN" | "BOOL" => CellValue::Bool(raw.eq_ignore_ascii_case("true")),
        "DATE" => CellValue::Date(
            NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| invalid(field, e))?,
        ),
        "TIMESTAMP" => {
            let secs: f64 = raw.parse().map_err(|e| invalid(field, e))?;
            let micros = (secs * 1_000_000.0).round() as i64;
            let ts = DateTime::from_timestamp_micros(micros)
                .ok_or_else(|| invalid(field, "timestamp out of range"))?;
            CellValue::Timestamp(ts)
        }
        // NUMERIC/BIGNUMERIC keep their exact decimal text.
        _ => CellValue::Text(raw.to_string()),
    };
    Ok(cell)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn page(raw: &str) -> QueryResponse {
        serde_json::from_str(raw).expect("fixture json")
    }

    #[test]
    fn decodes_typed_rows() {
        let resp = page(
            r#"{
              "jobComplete": true,
              "jobReference": {"projectId": "p", "jobId": "job_1", "location": "EU"},
              "schema": {"fields": [
                {"name": "order", "type": "INTEGER"},
                {"name": "price", "type": "FLOAT"},
                {"name": "item", "type": "STRING"},
                {"name": "day", "type": "DATE"},
                {"name": "timestamp", "type": "TIMESTAMP"},
                {"name": "paid", "type": "BOOLEAN"},
                {"name": "tags", "type": "STRING", "mode": "REPEATED"}
              ]},
              "rows": [
                {"f": [{"v": "42"}, {"v": "9.5"}, {"v": "poster, A3"}, {"v": "2024-03-09"},
                       {"v": "1.70999E9"}, {"v": "true"}, {"v": [{"v": "x"}]}]},
                {"f": [{"v": null}, {"v": null}, {"v": null}, {"v": null},
                       {"v": null}, {"v": null}, {"v": []}]}
              ]
            }"#,
        );
        let fields = resp.schema.clone().unwrap().fields;
        let rows = decode_rows(&fields, &resp.rows).unwrap();
        assert_eq!(rows.len(), 2);
        let first = &rows[0];
        assert_eq!(first.get("order"), Some(&CellValue::Integer(42)));
        assert_eq!(first.get("price"), Some(&CellValue::Float(9.5)));
        assert_eq!(
            first.get("item"),
            Some(&CellValue::Text("poster, A3".into()))
        );
        assert_eq!(
            first.get("day"),
            Some(&CellValue::Date(NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()))
        );
        assert_eq!(
            first.get("timestamp"),
            Some(&CellValue::Timestamp(
                Utc.timestamp_opt(1_709_990_000, 0).unwrap()
            ))
        );
        assert_eq!(first.get("paid"), Some(&CellValue::Bool(true)));
        assert_eq!(
            first.get("tags"),
            Some(&CellValue::Text(r#"["x"]"#.into()))
        );
        assert_eq!(rows[1].get("order"), Some(&CellValue::Null));
    }

    #[test]
    fn malformed_integer_is_a_query_error() {
        let fields = vec![Field {
            name: "n".into(),
            field_type: "INT64".into(),
            mode: None,
            fields: Vec::new(),
        }];
        let rows: Vec<Row> = serde_json::from_str(r#"[{"f": [{"v": "abc"}]}]"#).unwrap();
        let err = decode_rows(&fields, &rows).unwrap_err();
        assert!(matches!(err, RelayError::SourceQuery(m) if m.contains("column n")));
    }

    #[test]
    fn records_and_repeated_records_lose_the_wire_envelope() {
        let resp = page(
            r#"{
              "jobComplete": true,
              "schema": {"fields": [
                {"name": "address", "type": "RECORD", "fields": [
                  {"name": "city", "type": "STRING"},
                  {"name": "zip", "type": "STRING"}
                ]},
                {"name": "items", "type": "RECORD", "mode": "REPEATED", "fields": [
                  {"name": "sku", "type": "STRING"},
                  {"name": "qty", "type": "INTEGER"},
                  {"name": "labels", "type": "STRING", "mode": "REPEATED"}
                ]}
              ]},
              "rows": [
                {"f": [
                  {"v": {"f": [{"v": "Berlin"}, {"v": "10115"}]}},
                  {"v": [
                    {"v": {"f": [{"v": "A3"}, {"v": "2"}, {"v": [{"v": "matt"}]}]}},
                    {"v": {"f": [{"v": "A4"}, {"v": null}, {"v": []}]}}
                  ]}
                ]},
                {"f": [{"v": null}, {"v": []}]}
              ]
            }"#,
        );
        let fields = resp.schema.clone().unwrap().fields;
        let rows = decode_rows(&fields, &resp.rows).unwrap();
        assert_eq!(
            rows[0].get("address"),
            Some(&CellValue::Text(r#"{"city":"Berlin","zip":"10115"}"#.into()))
        );
        assert_eq!(
            rows[0].get("items"),
            Some(&CellValue::Text(
                r#"[{"sku":"A3","qty":"2","labels":["matt"]},{"sku":"A4","qty":null,"labels":[]}]"#
                    .into()
            ))
        );
        assert_eq!(rows[1].get("address"), Some(&CellValue::Null));
        assert_eq!(rows[1].get("items"), Some(&CellValue::Text("[]".into())));
    }

    #[test]
    fn api_errors_surface_google_message() {
        let body = br#"{"error": {"code": 404, "message": "Not found: Table p:d.t"}}"#;
        assert_eq!(api_error_message(404, body), "404: Not found: Table p:d.t");
        assert_eq!(api_error_message(502, b"bad gateway"), "502: bad gateway");
    }

    #[test]
    fn incomplete_job_deserializes_without_rows() {
        let resp = page(r#"{"jobComplete": false, "jobReference": {"jobId": "j"}}"#);
        assert!(!resp.job_complete);
        assert!(resp.rows.is_empty());
        assert!(resp.schema.is_none());
        assert_eq!(resp.job_reference.unwrap().job_id, "j");
    }
}
