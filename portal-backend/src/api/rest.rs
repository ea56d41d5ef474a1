//! REST endpoints of the hosted backend

use super::{handle_response_error, transport_error, HttpBackend};
use async_trait::async_trait;
use portal_core::{DataBackend, ErrorContext, Filter, FilterOp, PortalError, PortalResult, Query};
use serde_json::Value;
use tracing::debug;

const SINGLE_OBJECT_MEDIA_TYPE: &str = "application/vnd.pgrst.object+json";

/// Render a filter as its `column=op.value` query pair
pub(crate) fn filter_pair(filter: &Filter) -> (String, String) {
    let value = match filter.op {
        FilterOp::In => format!(
            "({})",
            filter
                .values
                .iter()
                .map(|v| format!("\"{}\"", v.replace('"', "\\\"")))
                .collect::<Vec<_>>()
                .join(",")
        ),
        _ => filter.values.first().cloned().unwrap_or_default(),
    };
    (filter.column.clone(), format!("{}.{}", filter.op.as_str(), value))
}

impl HttpBackend {
    fn collection_url(&self, collection: &str, filters: &[Filter]) -> PortalResult<url::Url> {
        let mut url = self.endpoint(&format!("rest/v1/{}", urlencoding::encode(collection)))?;
        {
            let mut pairs = url.query_pairs_mut();
            for filter in filters {
                let (column, value) = filter_pair(filter);
                pairs.append_pair(&column, &value);
            }
        }
        Ok(url)
    }

    pub(crate) fn query_url(&self, query: &Query) -> PortalResult<url::Url> {
        let mut url = self.collection_url(&query.collection, &query.filters)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("select", &query.columns);
            if let Some(order) = &query.order {
                let direction = if order.ascending { "asc" } else { "desc" };
                pairs.append_pair("order", &format!("{}.{}", order.column, direction));
            }
            if let Some(limit) = query.limit {
                pairs.append_pair("limit", &limit.to_string());
            }
        }
        Ok(url)
    }

    async fn send_json(
        &self,
        request: reqwest::RequestBuilder,
        operation: &str,
    ) -> PortalResult<Value> {
        let response = request
            .headers(self.auth_headers().await)
            .send()
            .await
            .map_err(|e| transport_error(e, operation, self.config.timeout_seconds))?;

        if !response.status().is_success() {
            return Err(handle_response_error(response, operation).await);
        }

        let text = response.text().await.map_err(|e| {
            transport_error(e, operation, self.config.timeout_seconds)
        })?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&text).map_err(|e| PortalError::Backend {
            message: format!("Failed to parse response body: {}", e),
            code: None,
            status: None,
            source: Some(Box::new(e)),
            context: ErrorContext::new("http_backend").with_operation(operation),
        })
    }
}

fn into_rows(value: Value) -> Vec<Value> {
    match value {
        Value::Array(rows) => rows,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

#[async_trait]
impl DataBackend for HttpBackend {
    async fn select(&self, query: &Query) -> PortalResult<Vec<Value>> {
        debug!(query = %query.describe(), "REST select");
        let url = self.query_url(query)?;
        let body = self.send_json(self.client.get(url), "select").await?;
        Ok(into_rows(body))
    }

    async fn select_single(&self, query: &Query) -> PortalResult<Value> {
        debug!(query = %query.describe(), "REST select single");
        let url = self.query_url(query)?;
        let request = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, SINGLE_OBJECT_MEDIA_TYPE);
        self.send_json(request, "select_single").await
    }

    async fn insert(&self, collection: &str, rows: Vec<Value>) -> PortalResult<Vec<Value>> {
        debug!(collection = collection, rows = rows.len(), "REST insert");
        let url = self.collection_url(collection, &[])?;
        let request = self
            .client
            .post(url)
            .header("Prefer", "return=representation")
            .json(&rows);
        Ok(into_rows(self.send_json(request, "insert").await?))
    }

    async fn update(
        &self,
        collection: &str,
        filters: &[Filter],
        patch: Value,
    ) -> PortalResult<Vec<Value>> {
        debug!(collection = collection, "REST update");
        let url = self.collection_url(collection, filters)?;
        let request = self
            .client
            .patch(url)
            .header("Prefer", "return=representation")
            .json(&patch);
        Ok(into_rows(self.send_json(request, "update").await?))
    }

    async fn delete(&self, collection: &str, filters: &[Filter]) -> PortalResult<()> {
        debug!(collection = collection, "REST delete");
        let url = self.collection_url(collection, filters)?;
        self.send_json(self.client.delete(url), "delete").await?;
        Ok(())
    }

    async fn rpc(&self, function: &str, args: Value) -> PortalResult<Value> {
        debug!(function = function, "REST rpc");
        let url = self.endpoint(&format!("rest/v1/rpc/{}", urlencoding::encode(function)))?;
        self.send_json(self.client.post(url).json(&args), "rpc").await
    }
}
