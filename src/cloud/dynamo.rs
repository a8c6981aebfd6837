use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::{AttributeValue, DeleteRequest, PutRequest, WriteRequest};
use chrono::{DateTime, SecondsFormat, Utc};

use super::{build_err, classify_sdk, with_retry, BatchOutcome, RoutingTableApi};
use crate::error::CloudError;
use crate::routing::{RoutingEntry, RoutingType};

/// Adapter over the NoSQL routing table
#[derive(Debug, Clone)]
pub struct RoutingTableAdapter {
    client: aws_sdk_dynamodb::Client,
}

impl RoutingTableAdapter {
    pub fn new(sdk: &aws_config::SdkConfig) -> Self {
        Self {
            client: aws_sdk_dynamodb::Client::new(sdk),
        }
    }
}

fn to_item(entry: &RoutingEntry) -> HashMap<String, AttributeValue> {
    let mut item = HashMap::new();
    item.insert(
        "compilerId".to_string(),
        AttributeValue::S(entry.compiler_id.clone()),
    );
    item.insert(
        "environment".to_string(),
        AttributeValue::S(entry.environment.clone()),
    );
    item.insert(
        "routingType".to_string(),
        AttributeValue::S(entry.routing_type.as_str().to_string()),
    );
    let target_attr = match entry.routing_type {
        RoutingType::Queue => "queueName",
        RoutingType::Url => "targetUrl",
    };
    item.insert(
        target_attr.to_string(),
        AttributeValue::S(entry.target.clone()),
    );
    item.insert(
        "lastUpdated".to_string(),
        AttributeValue::S(entry.last_updated.to_rfc3339_opts(SecondsFormat::Secs, true)),
    );
    item
}

fn from_item(item: &HashMap<String, AttributeValue>) -> Option<RoutingEntry> {
    let string_of = |name: &str| {
        item.get(name)
            .and_then(|v| v.as_s().ok())
            .map(|s| s.to_string())
    };

    let compiler_id = string_of("compilerId")?;
    let routing_type = match string_of("routingType")?.as_str() {
        "queue" => RoutingType::Queue,
        "url" => RoutingType::Url,
        _ => return None,
    };
    let target = match routing_type {
        RoutingType::Queue => string_of("queueName")?,
        RoutingType::Url => string_of("targetUrl")?,
    };
    let last_updated = string_of("lastUpdated")
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

    Some(RoutingEntry {
        compiler_id,
        environment: string_of("environment").unwrap_or_default(),
        routing_type,
        target,
        last_updated,
    })
}

fn key_of(request: &WriteRequest) -> Option<String> {
    let value = if let Some(put) = request.put_request() {
        put.item().get("compilerId")
    } else if let Some(delete) = request.delete_request() {
        delete.key().get("compilerId")
    } else {
        None
    };
    value.and_then(|v| v.as_s().ok()).map(|s| s.to_string())
}

#[async_trait]
impl RoutingTableApi for RoutingTableAdapter {
    async fn get(&self, table: &str, key: &str) -> Result<Option<RoutingEntry>, CloudError> {
        const OP: &str = "dynamo.get_item";
        let client = self.client.clone();
        let table = table.to_string();
        let key = key.to_string();
        let resp = with_retry(OP, || {
            let client = client.clone();
            let table = table.clone();
            let key = key.clone();
            async move {
                client
                    .get_item()
                    .table_name(&table)
                    .key("compilerId", AttributeValue::S(key))
                    .send()
                    .await
                    .map_err(|e| classify_sdk(OP, e))
            }
        })
        .await?;

        Ok(resp.item().and_then(from_item))
    }

    async fn put(&self, table: &str, entry: &RoutingEntry) -> Result<(), CloudError> {
        const OP: &str = "dynamo.put_item";
        let client = self.client.clone();
        let table = table.to_string();
        let item = to_item(entry);
        with_retry(OP, || {
            let client = client.clone();
            let table = table.clone();
            let item = item.clone();
            async move {
                client
                    .put_item()
                    .table_name(&table)
                    .set_item(Some(item))
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|e| classify_sdk(OP, e))
            }
        })
        .await
    }

    async fn delete(&self, table: &str, key: &str) -> Result<(), CloudError> {
        const OP: &str = "dynamo.delete_item";
        let client = self.client.clone();
        let table = table.to_string();
        let key = key.to_string();
        with_retry(OP, || {
            let client = client.clone();
            let table = table.clone();
            let key = key.clone();
            async move {
                client
                    .delete_item()
                    .table_name(&table)
                    .key("compilerId", AttributeValue::S(key))
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|e| classify_sdk(OP, e))
            }
        })
        .await
    }

    async fn scan_environment(
        &self,
        table: &str,
        environment: &str,
    ) -> Result<Vec<RoutingEntry>, CloudError> {
        const OP: &str = "dynamo.scan";
        let mut pages = self
            .client
            .scan()
            .table_name(table)
            .filter_expression("#env = :env")
            .expression_attribute_names("#env", "environment")
            .expression_attribute_values(":env", AttributeValue::S(environment.to_string()))
            .into_paginator()
            .items()
            .send();

        let mut entries = Vec::new();
        while let Some(item) = pages.next().await {
            let item = item.map_err(|e| classify_sdk(OP, e))?;
            if let Some(entry) = from_item(&item) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    async fn batch_write(
        &self,
        table: &str,
        puts: &[RoutingEntry],
        delete_keys: &[String],
    ) -> Result<BatchOutcome, CloudError> {
        const OP: &str = "dynamo.batch_write_item";
        if puts.is_empty() && delete_keys.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let mut requests = Vec::with_capacity(puts.len() + delete_keys.len());
        for entry in puts {
            let put = PutRequest::builder()
                .set_item(Some(to_item(entry)))
                .build()
                .map_err(build_err(OP))?;
            requests.push(WriteRequest::builder().put_request(put).build());
        }
        for key in delete_keys {
            let delete = DeleteRequest::builder()
                .key("compilerId", AttributeValue::S(key.clone()))
                .build()
                .map_err(build_err(OP))?;
            requests.push(WriteRequest::builder().delete_request(delete).build());
        }

        let client = self.client.clone();
        let table = table.to_string();
        let resp = with_retry(OP, || {
            let client = client.clone();
            let table = table.clone();
            let requests = requests.clone();
            async move {
                client
                    .batch_write_item()
                    .request_items(&table, requests)
                    .send()
                    .await
                    .map_err(|e| classify_sdk(OP, e))
            }
        })
        .await?;

        let failed_keys = resp
            .unprocessed_items()
            .into_iter()
            .flat_map(|tables| tables.values())
            .flatten()
            .filter_map(key_of)
            .collect();
        Ok(BatchOutcome { failed_keys })
    }
}
