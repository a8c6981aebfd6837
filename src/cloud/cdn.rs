use async_trait::async_trait;
use aws_sdk_cloudfront::types::{InvalidationBatch, Paths};

use super::{build_err, classify_sdk, with_retry, CdnApi};
use crate::error::CloudError;

/// Adapter over the CDN, used to flush cached static content after a switch
#[derive(Debug, Clone)]
pub struct CdnAdapter {
    client: aws_sdk_cloudfront::Client,
}

impl CdnAdapter {
    pub fn new(sdk: &aws_config::SdkConfig) -> Self {
        Self {
            client: aws_sdk_cloudfront::Client::new(sdk),
        }
    }
}

#[async_trait]
impl CdnApi for CdnAdapter {
    async fn invalidate(
        &self,
        distribution_id: &str,
        paths: &[String],
    ) -> Result<String, CloudError> {
        const OP: &str = "cdn.create_invalidation";
        let path_spec = Paths::builder()
            .quantity(paths.len() as i32)
            .set_items(Some(paths.to_vec()))
            .build()
            .map_err(build_err(OP))?;
        let batch = InvalidationBatch::builder()
            .paths(path_spec)
            .caller_reference(uuid::Uuid::new_v4().to_string())
            .build()
            .map_err(build_err(OP))?;

        let client = self.client.clone();
        let distribution_id = distribution_id.to_string();
        let resp = with_retry(OP, || {
            let client = client.clone();
            let distribution_id = distribution_id.clone();
            let batch = batch.clone();
            async move {
                client
                    .create_invalidation()
                    .distribution_id(&distribution_id)
                    .invalidation_batch(batch)
                    .send()
                    .await
                    .map_err(|e| classify_sdk(OP, e))
            }
        })
        .await?;

        Ok(resp
            .invalidation()
            .map(|i| i.id().to_string())
            .unwrap_or_default())
    }
}
