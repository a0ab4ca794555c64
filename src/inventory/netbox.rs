//! NetBox IPAM adapter.
//!
//! Leases map onto `ipam/ip-addresses` objects keyed by a host prefix
//! (`/32` or `/128`). Upsert looks the address up and PATCHes the existing
//! object or POSTs a new one; retire PATCHes the status and clears the tags.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::InventoryClient;
use crate::config::NetBoxConfig;
use crate::error::{Error, Result};
use crate::lease::LeaseRecord;

const IP_ADDRESSES_PATH: &str = "ipam/ip-addresses/";
const ACTIVE_STATUS: &str = "active";
const EXPIRED_DESCRIPTION: &str = "Expired DHCP lease";

#[derive(Debug, Serialize)]
struct Tag<'a> {
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct LeaseFields<'a> {
    mac_address: &'a str,
    lease_expiry: Option<String>,
}

#[derive(Debug, Serialize)]
struct UpsertPayload<'a> {
    address: String,
    status: &'a str,
    dns_name: &'a str,
    description: String,
    tags: Vec<Tag<'a>>,
    custom_fields: LeaseFields<'a>,
}

#[derive(Debug, Serialize)]
struct RetirePayload<'a> {
    status: &'a str,
    tags: Vec<Tag<'a>>,
    description: &'a str,
}

#[derive(Debug, Deserialize)]
struct IpAddressList {
    #[serde(default)]
    results: Vec<IpAddressObject>,
}

#[derive(Debug, Deserialize)]
struct IpAddressObject {
    id: u64,
}

/// Formats an address as the host prefix NetBox stores.
fn host_prefix(address: IpAddr) -> String {
    match address {
        IpAddr::V4(v4) => format!("{}/32", v4),
        IpAddr::V6(v6) => format!("{}/128", v6),
    }
}

/// NetBox REST client implementing [`InventoryClient`].
#[derive(Debug, Clone)]
pub struct NetBoxClient {
    client: Client,
    ip_addresses_url: Url,
    tag: String,
    retired_status: String,
}

impl NetBoxClient {
    /// Builds a client from the NetBox section of the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for an unusable URL or token, and
    /// [`Error::Http`] if the HTTP client cannot be constructed.
    pub fn new(config: &NetBoxConfig) -> Result<Self> {
        let mut base = config.url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base = Url::parse(&base)
            .map_err(|error| Error::InvalidConfig(format!("netbox.url: {}", error)))?;
        let ip_addresses_url = base
            .join(IP_ADDRESSES_PATH)
            .map_err(|error| Error::InvalidConfig(format!("netbox.url: {}", error)))?;

        let mut headers = HeaderMap::new();
        let mut token = HeaderValue::from_str(&format!("Token {}", config.token))
            .map_err(|_| Error::InvalidConfig("netbox.token contains invalid characters".into()))?;
        token.set_sensitive(true);
        headers.insert(AUTHORIZATION, token);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if !config.verify_tls {
            warn!("TLS certificate verification is disabled for {}", base);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()?;

        Ok(Self {
            client,
            ip_addresses_url,
            tag: config.tag.clone(),
            retired_status: config.retired_status.clone(),
        })
    }

    fn object_url(&self, id: u64) -> Result<Url> {
        self.ip_addresses_url
            .join(&format!("{}/", id))
            .map_err(|error| Error::InvalidConfig(error.to_string()))
    }

    fn upsert_payload<'a>(&'a self, record: &'a LeaseRecord) -> UpsertPayload<'a> {
        UpsertPayload {
            address: host_prefix(record.address),
            status: ACTIVE_STATUS,
            dns_name: &record.label,
            description: format!("DHCP lease for {}", record.label),
            tags: vec![Tag { name: &self.tag }],
            custom_fields: LeaseFields {
                mac_address: &record.hardware_id,
                lease_expiry: record.expires_at.map(|expires_at| expires_at.to_rfc3339()),
            },
        }
    }

    fn retire_payload(&self) -> RetirePayload<'_> {
        RetirePayload {
            status: &self.retired_status,
            tags: Vec::new(),
            description: EXPIRED_DESCRIPTION,
        }
    }

    /// Returns the id of the NetBox object holding `address`, if any.
    async fn lookup(&self, address: IpAddr) -> std::result::Result<Option<u64>, String> {
        let response = self
            .client
            .get(self.ip_addresses_url.clone())
            .query(&[("address", host_prefix(address))])
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|error| format!("lookup failed: {}", error))?;

        let list: IpAddressList = response
            .json()
            .await
            .map_err(|error| format!("lookup returned invalid JSON: {}", error))?;

        Ok(list.results.first().map(|object| object.id))
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        request: reqwest::RequestBuilder,
        payload: &T,
        expected: StatusCode,
    ) -> std::result::Result<(), String> {
        let response = request
            .json(payload)
            .send()
            .await
            .map_err(|error| format!("request failed: {}", error))?;

        let status = response.status();
        if status == expected {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(format!("unexpected status {}: {}", status, body))
    }
}

#[async_trait]
impl InventoryClient for NetBoxClient {
    async fn upsert(&self, record: &LeaseRecord) -> Result<()> {
        let address = record.address;
        let to_error = |reason: String| Error::Inventory { address, reason };
        let payload = self.upsert_payload(record);

        match self.lookup(address).await.map_err(to_error)? {
            Some(id) => {
                let url = self.object_url(id)?;
                self.send_json(self.client.patch(url), &payload, StatusCode::OK)
                    .await
                    .map_err(to_error)?;
                debug!("Updated NetBox IP {} (id {})", address, id);
            }
            None => {
                self.send_json(
                    self.client.post(self.ip_addresses_url.clone()),
                    &payload,
                    StatusCode::CREATED,
                )
                .await
                .map_err(to_error)?;
                debug!("Created NetBox IP {}", address);
            }
        }

        Ok(())
    }

    async fn retire(&self, address: IpAddr) -> Result<()> {
        let to_error = |reason: String| Error::Inventory { address, reason };

        let Some(id) = self.lookup(address).await.map_err(to_error)? else {
            warn!("IP {} not found in NetBox, nothing to retire", address);
            return Ok(());
        };

        let url = self.object_url(id)?;
        self.send_json(self.client.patch(url), &self.retire_payload(), StatusCode::OK)
            .await
            .map_err(to_error)?;
        debug!("Marked NetBox IP {} (id {}) as {}", address, id, self.retired_status);
        Ok(())
    }
}
