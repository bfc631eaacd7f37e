use ambrosus_node_shared::entities::Bundle;
use std::future::Future;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Failed to fetch bundle from {url}: {source:#?}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Shelterer at {url} answered {status}")]
    BadStatus {
        url: String,
        status: reqwest::StatusCode,
    },
}

/// Fetches a bundle from a peer shelterer. Split out as a trait so the
/// challenge flow can be exercised without a network.
pub trait BundleDownloader: Send + Sync {
    fn download_bundle(
        &self,
        shelterer_url: &str,
        bundle_id: &str,
    ) -> impl Future<Output = anyhow::Result<Bundle>> + Send;
}

pub struct ReqwestBundleDownloader {
    client: reqwest::Client,
}

impl Default for ReqwestBundleDownloader {
    fn default() -> Self {
        Self::new()
    }
}

impl ReqwestBundleDownloader {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn bundle_url(shelterer_url: &str, bundle_id: &str) -> String {
        format!("{}/bundles/{}", shelterer_url.trim_end_matches('/'), bundle_id)
    }
}

impl BundleDownloader for ReqwestBundleDownloader {
    async fn download_bundle(&self, shelterer_url: &str, bundle_id: &str) -> anyhow::Result<Bundle> {
        let url = Self::bundle_url(shelterer_url, bundle_id);
        tracing::debug!(url, "Downloading bundle from shelterer");

        let response = self.client.get(&url).send().await.map_err(|e| DownloadError::Fetch {
            url: url.clone(),
            source: e,
        })?;
        if !response.status().is_success() {
            return Err(DownloadError::BadStatus {
                url,
                status: response.status(),
            }
            .into());
        }
        let bundle = response.json::<Bundle>().await.map_err(|e| DownloadError::Fetch {
            url: url.clone(),
            source: e,
        })?;
        Ok(bundle)
    }
}
