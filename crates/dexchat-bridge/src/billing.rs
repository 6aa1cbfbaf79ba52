//! Billing backend client used by the control surface.
//!
//! `POST {backend}/charge {tier, walletAddress}` creates a hosted checkout;
//! `GET {backend}/user/{wallet}/subscription` reports what the wallet holds.
//! Pricing is backend policy; the client only names the tier.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dexchat_core::Tier;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::errors::BillingError;

const MAX_ERROR_BODY: usize = 512;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChargeRequest<'a> {
    tier: Tier,
    wallet_address: &'a str,
}

/// Hosted checkout for an upgrade.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Charge {
    /// Checkout page to open.
    pub hosted_url: String,
    /// Backend charge id.
    pub charge_id: String,
}

/// Subscription held by a wallet.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatus {
    /// Whether the wallet has any subscription record.
    pub has_subscription: bool,
    /// Subscribed tier.
    #[serde(default)]
    pub tier: Option<Tier>,
    /// Payment state reported by the processor.
    #[serde(default)]
    pub payment_status: Option<String>,
    /// Last change.
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl SubscriptionStatus {
    /// Tier to use for capacity decisions.
    #[must_use]
    pub fn effective_tier(&self) -> Tier {
        if self.has_subscription {
            self.tier.unwrap_or_default()
        } else {
            Tier::Free
        }
    }
}

/// HTTP client for the billing endpoints.
#[derive(Clone, Debug)]
pub struct BillingClient {
    client: reqwest::Client,
    base_url: String,
}

impl BillingClient {
    /// Client using `client` against `base_url`.
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Client with its own request timeout.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BillingError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::new(client, base_url))
    }

    /// Create a checkout for upgrading `wallet` to `tier`.
    #[instrument(skip(self), fields(tier = %tier))]
    pub async fn create_charge(&self, tier: Tier, wallet: &str) -> Result<Charge, BillingError> {
        if tier == Tier::Free {
            return Err(BillingError::Invalid("free tier needs no charge".into()));
        }
        if wallet.trim().is_empty() {
            return Err(BillingError::Invalid("wallet address is empty".into()));
        }
        let url = format!("{}/charge", self.base_url);
        let body = ChargeRequest {
            tier,
            wallet_address: wallet,
        };
        let response = self.client.post(&url).json(&body).send().await?;
        let charge: Charge = read_json(response).await?;
        debug!(charge_id = %charge.charge_id, "charge created");
        Ok(charge)
    }

    /// Look up the subscription held by `wallet`.
    #[instrument(skip(self))]
    pub async fn subscription(&self, wallet: &str) -> Result<SubscriptionStatus, BillingError> {
        if wallet.trim().is_empty() {
            return Err(BillingError::Invalid("wallet address is empty".into()));
        }
        let url = format!("{}/user/{wallet}/subscription", self.base_url);
        let response = self.client.get(&url).send().await?;
        read_json(response).await
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, BillingError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    let mut body = response.text().await.unwrap_or_default();
    body.truncate(MAX_ERROR_BODY);
    Err(BillingError::Status {
        status: status.as_u16(),
        body,
    })
}
