//! HTTP client for the discovery host list
//!
//! The resource has no partial-update verb and no version token, so every
//! change is a read-modify-write: GET the list, edit it locally, then POST
//! (resource absent) or PUT (resource present) the whole document back.
//! Concurrent writers can lose each other's updates; last write wins.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;

use super::hosts::{HostEntry, HostList};
use super::{Discovery, DiscoveryError};

/// What a registration call did to the resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// Resource did not exist; created with a single entry
    Created,

    /// Entry appended; the resource now holds `hosts` entries
    Appended { hosts: usize },
}

/// What a deregistration call did to the resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeregisterOutcome {
    /// Entries removed and the list written back
    Removed { removed: usize, remaining: usize },

    /// Resource exists but does not list this address
    NotListed,

    /// Resource does not exist
    Missing,
}

/// Client for the discovery resource
#[derive(Debug, Clone)]
pub struct DiscoveryClient {
    http_client: Client,
    url: String,
    timeout: Duration,
}

impl DiscoveryClient {
    /// Create a client for the resource at `url`
    ///
    /// `timeout` bounds every call, including the mutation requests.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, DiscoveryError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(DiscoveryError::Network)?;

        Ok(Self {
            http_client,
            url: url.into(),
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch the host list; `None` when the resource does not exist
    pub async fn fetch(&self) -> Result<Option<HostList>, DiscoveryError> {
        let response = self
            .http_client
            .get(&self.url)
            .send()
            .await
            .map_err(DiscoveryError::Network)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(DiscoveryError::UnexpectedStatus {
                method: "GET",
                status: status.as_u16(),
            });
        }

        let list = response
            .json::<HostList>()
            .await
            .map_err(DiscoveryError::Decode)?;
        Ok(Some(list))
    }

    /// Create the resource with `list`
    pub async fn create(&self, list: &HostList) -> Result<(), DiscoveryError> {
        let request = self.http_client.post(&self.url);
        self.send_document("POST", request, list).await
    }

    /// Replace the resource with `list`
    pub async fn replace(&self, list: &HostList) -> Result<(), DiscoveryError> {
        let request = self.http_client.put(&self.url);
        self.send_document("PUT", request, list).await
    }

    /// Add `entry` to the resource
    pub async fn register_entry(&self, entry: &HostEntry) -> Result<RegisterOutcome, DiscoveryError> {
        match self.fetch().await? {
            None => {
                let list = HostList::new(vec![entry.clone()]);
                self.create(&list).await?;
                Ok(RegisterOutcome::Created)
            }
            Some(mut list) => {
                list.push(entry.clone());
                self.replace(&list).await?;
                Ok(RegisterOutcome::Appended { hosts: list.len() })
            }
        }
    }

    /// Remove every entry for `ip_address` from the resource
    ///
    /// Nothing is written back when the address is not listed.
    pub async fn deregister_address(
        &self,
        ip_address: &str,
    ) -> Result<DeregisterOutcome, DiscoveryError> {
        let Some(mut list) = self.fetch().await? else {
            return Ok(DeregisterOutcome::Missing);
        };

        let removed = list.remove_address(ip_address);
        if removed == 0 {
            return Ok(DeregisterOutcome::NotListed);
        }

        self.replace(&list).await?;
        Ok(DeregisterOutcome::Removed {
            removed,
            remaining: list.len(),
        })
    }

    async fn send_document(
        &self,
        method: &'static str,
        request: reqwest::RequestBuilder,
        list: &HostList,
    ) -> Result<(), DiscoveryError> {
        let body = serde_json::to_vec(list).map_err(DiscoveryError::Encode)?;

        let response = request
            .timeout(self.timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(DiscoveryError::Network)?;

        let status = response.status();
        if !status.is_success() {
            return Err(DiscoveryError::UnexpectedStatus {
                method,
                status: status.as_u16(),
            });
        }

        tracing::debug!(method, hosts = list.len(), url = %self.url, "Discovery resource written");
        Ok(())
    }
}

#[async_trait]
impl Discovery for DiscoveryClient {
    async fn register(&self, entry: &HostEntry) -> Result<(), DiscoveryError> {
        let outcome = self.register_entry(entry).await?;
        tracing::info!(ip = %entry.ip_address, port = entry.port, ?outcome, "Registered to discovery");
        Ok(())
    }

    async fn deregister(&self, ip_address: &str) -> Result<(), DiscoveryError> {
        let outcome = self.deregister_address(ip_address).await?;
        tracing::info!(ip = %ip_address, ?outcome, "Deregistered from discovery");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = DiscoveryClient::new(
            "http://eds:8080/edsservice/eds-cluster-service",
            Duration::from_secs(5),
        );
        assert!(client.is_ok());
        assert_eq!(
            client.unwrap().url(),
            "http://eds:8080/edsservice/eds-cluster-service"
        );
    }

    #[tokio::test]
    async fn test_unreachable_server_is_network_error() {
        let client =
            DiscoveryClient::new("http://127.0.0.1:9/hosts", Duration::from_millis(500)).unwrap();
        let err = client.fetch().await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Network(_)));
        assert!(err.is_recoverable());
    }
}
