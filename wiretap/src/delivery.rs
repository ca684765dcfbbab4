//! Batch delivery to the tracks endpoint.
//!
//! Delivery is fire-and-forget: a batch is encoded, posted once, and its
//! outcome is reported back to the pipeline. Failed batches are dropped
//! rather than retried, so a record is delivered at most once.

use std::collections::HashMap;

use wiretap_config::Config;

use crate::encoder::{self, EncodeError, SampledRecord};
use crate::upstream::{ConfigClient, UpstreamError};

/// An error posting a batch upstream.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The batch could not be encoded.
    #[error("failed to encode batch")]
    Encode(#[from] EncodeError),
    /// The upstream request failed.
    #[error("failed to post batch")]
    Upstream(#[from] UpstreamError),
}

/// The outcome of a successfully posted batch.
#[derive(Debug)]
pub struct BatchReceipt {
    /// The number of records in the posted batch.
    pub num_sent: usize,
    /// The HTTP status code returned by the tracks endpoint.
    pub status: u16,
}

/// Encodes `records` and posts them as a single batch.
pub(crate) async fn send_batch(
    client: &dyn ConfigClient,
    records: &[SampledRecord],
    session_id: &str,
    config: &Config,
    tags: &HashMap<String, String>,
) -> Result<BatchReceipt, DeliveryError> {
    let payload = encoder::encode_batch(records, session_id, config, tags)?;

    if config.debug {
        wiretap_log::debug!("Batch: {}", String::from_utf8_lossy(&payload));
    }

    let status = client.post_batch(payload).await?;

    Ok(BatchReceipt {
        num_sent: records.len(),
        status,
    })
}
