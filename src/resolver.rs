use crate::network::probe_redirect;
use crate::options::Product;
use crate::storage::LocationRecord;
use chrono::Local;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Format of the first-seen timestamps: local time, ISO-8601, microsecond precision.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

pub fn timestamp_now() -> String {
    Local::now()
        .naive_local()
        .format(TIMESTAMP_FORMAT)
        .to_string()
}

/// Probes every product's redirect link, one after another, and records new targets.
///
/// A product whose probe fails or returns no `Location` header is logged and left
/// untouched. Only the in-memory record is changed; saving it is up to the caller.
///
/// Returns the number of newly recorded targets.
pub async fn resolve_locations(
    products: &[Product],
    record: &mut LocationRecord,
    client: &reqwest::Client,
    timeout: Duration,
) -> usize {
    let mut added = 0;

    for product in products {
        match probe_redirect(&product.url, client, timeout).await {
            Ok(Some(target)) => {
                if record.insert(&product.name, &target, timestamp_now()) {
                    info!("Added new URL for {}: {}", product.name, target);
                    added += 1;
                } else {
                    debug!("{} still redirects to {}", product.name, target);
                }
            }
            Ok(None) => warn!("No Location header found for {}.", product.name),
            Err(e) => warn!("Error fetching {} URL: {}", product.name, e),
        }
    }

    added
}
