//! PostgREST relation store
//!
//! Join tables are read and written through the REST interface the hosted
//! database exposes:
//!
//! ```text
//! list    GET    /rest/v1/{table}?select={left},{right}&order={left},{right}&limit=N&offset=M
//! insert  POST   /rest/v1/{table}            {"{left}": "..", "{right}": ".."}
//! delete  DELETE /rest/v1/{table}?{left}=eq.{l}&{right}=eq.{r}
//! ```
//!
//! The server caps every response at its `max-rows`, so listing walks the
//! table in pages until the `Content-Range` total is reached.

use crate::config::{ConfigError, PostgrestConfig};
use async_trait::async_trait;
use devdash_mapping::store::parse_id;
use devdash_mapping::{EntityId, Relation, RelationStore, RelationTuple, StoreError};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::{Map, Value};
use std::time::Duration;
use url::Url;

/// Rows requested per page; matches PostgREST's default `max-rows`.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

pub struct PostgrestStore {
    client: Client,
    base: Url,
    api_key: String,
    page_size: usize,
}

impl PostgrestStore {
    pub fn new(config: &PostgrestConfig) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))?;
        Ok(Self {
            client,
            base: config.rest_base()?,
            api_key: config.api_key.clone(),
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn table_url(&self, table: &str) -> Result<Url, StoreError> {
        self.base
            .join(table)
            .map_err(|e| StoreError::Unavailable(format!("bad table url for `{table}`: {e}")))
    }

    /// One page of the table, ordered by both key columns so offsets are stable.
    pub fn list_url<L, R>(&self, relation: &Relation<L, R>, offset: usize) -> Result<Url, StoreError> {
        let columns = format!("{},{}", relation.left_column(), relation.right_column());
        let mut url = self.table_url(relation.name())?;
        url.query_pairs_mut()
            .append_pair("select", &columns)
            .append_pair("order", &columns)
            .append_pair("limit", &self.page_size.to_string())
            .append_pair("offset", &offset.to_string());
        Ok(url)
    }

    pub fn match_url<L: EntityId, R: EntityId>(
        &self,
        relation: &Relation<L, R>,
        left: &L,
        right: &R,
    ) -> Result<Url, StoreError> {
        let mut url = self.table_url(relation.name())?;
        url.query_pairs_mut()
            .append_pair(relation.left_column(), &format!("eq.{left}"))
            .append_pair(relation.right_column(), &format!("eq.{right}"));
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }
}

/// Body of an insert: both key columns as text.
pub fn insert_body<L: EntityId, R: EntityId>(
    relation: &Relation<L, R>,
    left: &L,
    right: &R,
) -> Value {
    let mut row = Map::new();
    row.insert(relation.left_column().to_string(), Value::String(left.to_string()));
    row.insert(relation.right_column().to_string(), Value::String(right.to_string()));
    Value::Object(row)
}

/// Human-readable message from a PostgREST error body.
pub fn error_message(body: &str) -> String {
    if let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(body) {
        let text = |key: &str| fields.get(key).and_then(Value::as_str).filter(|s| !s.is_empty());
        if let Some(message) = text("message") {
            return match text("details") {
                Some(details) => format!("{message} ({details})"),
                None => message.to_string(),
            };
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "empty response".to_string()
    } else {
        trimmed.to_string()
    }
}

fn cell_text(relation: &str, row: &Value, column: &str) -> Result<String, StoreError> {
    match row.get(column) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(StoreError::Decode(format!(
            "`{relation}.{column}` has unsupported value {other}"
        ))),
        None => Err(StoreError::Decode(format!(
            "`{relation}` row is missing column `{column}`"
        ))),
    }
}

/// Turn a PostgREST row array into tuples.
pub fn decode_rows<L: EntityId, R: EntityId>(
    relation: &Relation<L, R>,
    rows: &[Value],
) -> Result<Vec<RelationTuple<L, R>>, StoreError> {
    rows.iter()
        .map(|row| {
            let left = cell_text(relation.name(), row, relation.left_column())?;
            let right = cell_text(relation.name(), row, relation.right_column())?;
            Ok(RelationTuple::new(
                parse_id(relation.name(), relation.left_column(), &left)?,
                parse_id(relation.name(), relation.right_column(), &right)?,
            ))
        })
        .collect()
}

/// Total row count from a `Content-Range` header such as `0-999/1234`.
/// `None` when the server did not count (`*`) or the header is malformed.
pub fn content_range_total(header: &str) -> Option<usize> {
    header.split_once('/')?.1.trim().parse().ok()
}

fn transport(err: reqwest::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

async fn check(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Rejected {
        status: status.as_u16(),
        message: error_message(&body),
    })
}

#[async_trait]
impl<L: EntityId, R: EntityId> RelationStore<L, R> for PostgrestStore {
    async fn list_committed(
        &self,
        relation: &Relation<L, R>,
    ) -> Result<Vec<RelationTuple<L, R>>, StoreError> {
        let mut tuples: Vec<RelationTuple<L, R>> = Vec::new();
        loop {
            let offset = tuples.len();
            let url = self.list_url(relation, offset)?;
            tracing::debug!(table = %relation.name(), offset, "GET");
            let response = self
                .authorized(self.client.get(url))
                .header("Prefer", "count=exact")
                .send()
                .await
                .map_err(transport)?;
            let response = check(response).await?;
            let total = response
                .headers()
                .get("Content-Range")
                .and_then(|value| value.to_str().ok())
                .and_then(content_range_total);
            let rows: Vec<Value> = response
                .json()
                .await
                .map_err(|e| StoreError::Decode(e.to_string()))?;

            let fetched = rows.len();
            tuples.extend(decode_rows(relation, &rows)?);
            let done = match total {
                Some(total) => tuples.len() >= total,
                None => fetched < self.page_size,
            };
            if done || fetched == 0 {
                return Ok(tuples);
            }
        }
    }

    async fn insert(
        &self,
        relation: &Relation<L, R>,
        left: &L,
        right: &R,
    ) -> Result<(), StoreError> {
        let url = self.table_url(relation.name())?;
        tracing::debug!(table = %relation.name(), left = %left, right = %right, "POST");
        let response = self
            .authorized(self.client.post(url))
            .header("Prefer", "return=minimal")
            .json(&insert_body(relation, left, right))
            .send()
            .await
            .map_err(transport)?;
        check(response).await?;
        Ok(())
    }

    async fn delete(
        &self,
        relation: &Relation<L, R>,
        left: &L,
        right: &R,
    ) -> Result<(), StoreError> {
        let url = self.match_url(relation, left, right)?;
        tracing::debug!(table = %relation.name(), left = %left, right = %right, "DELETE");
        let response = self
            .authorized(self.client.delete(url))
            .send()
            .await
            .map_err(transport)?;
        check(response).await?;
        Ok(())
    }
}
