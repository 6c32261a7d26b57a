//! Process-wide credit balance and billing calls
//!
//! The local balance is optimistic: metering subtracts immediately and reports the
//! deduction without waiting. Metering, refresh and purchase all take the same
//! async lock so a refresh never lands in the middle of a tick.

use crate::error::{Result, SessionError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[async_trait]
pub trait BillingApi: Send + Sync {
    async fn deduct(&self, device_id: &str, credits: u64) -> Result<()>;
    async fn fetch_balance(&self, device_id: &str) -> Result<u64>;
    async fn purchase(&self, device_id: &str, credits: u64) -> Result<u64>;
    async fn release_resources(&self, session_id: &str) -> Result<()>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeductBody<'a> {
    device_id: &'a str,
    credits: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReleaseBody<'a> {
    session_id: &'a str,
}

#[derive(Deserialize)]
struct BalanceBody {
    credits: u64,
}

/// REST billing backend
#[derive(Debug, Clone)]
pub struct HttpBillingApi {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpBillingApi {
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token,
        }
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[async_trait]
impl BillingApi for HttpBillingApi {
    async fn deduct(&self, device_id: &str, credits: u64) -> Result<()> {
        let url = format!("{}/credits/deduct", self.base_url);
        self.authorized(self.client.post(url))
            .json(&DeductBody { device_id, credits })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn fetch_balance(&self, device_id: &str) -> Result<u64> {
        let url = format!("{}/credits/status", self.base_url);
        let body: BalanceBody = self
            .authorized(self.client.get(url))
            .query(&[("deviceId", device_id)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(body.credits)
    }

    async fn purchase(&self, device_id: &str, credits: u64) -> Result<u64> {
        let url = format!("{}/credits/purchase", self.base_url);
        let body: BalanceBody = self
            .authorized(self.client.post(url))
            .json(&DeductBody { device_id, credits })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(body.credits)
    }

    async fn release_resources(&self, session_id: &str) -> Result<()> {
        let url = format!("{}/session/release", self.base_url);
        self.authorized(self.client.post(url))
            .json(&ReleaseBody { session_id })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

struct LedgerInner {
    device_id: String,
    balance: Mutex<u64>,
    api: Arc<dyn BillingApi>,
}

/// Shared handle to the credit balance
#[derive(Clone)]
pub struct CreditLedger {
    inner: Arc<LedgerInner>,
}

impl CreditLedger {
    pub fn new(device_id: impl Into<String>, initial_balance: u64, api: Arc<dyn BillingApi>) -> Self {
        Self {
            inner: Arc::new(LedgerInner {
                device_id: device_id.into(),
                balance: Mutex::new(initial_balance),
                api,
            }),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.inner.device_id
    }

    pub async fn balance(&self) -> u64 {
        *self.inner.balance.lock().await
    }

    /// Charge `cost` locally and report it to the backend without waiting.
    pub async fn meter(&self, cost: u64) -> u64 {
        let mut balance = self.inner.balance.lock().await;
        *balance = balance.saturating_sub(cost);
        let remaining = *balance;

        let inner = self.inner.clone();
        tokio::spawn(async move {
            if let Err(e) = inner.api.deduct(&inner.device_id, cost).await {
                warn!("Credit deduction of {} failed: {}", cost, e);
            }
        });

        debug!("Metered {} credit(s), {} remaining", cost, remaining);
        remaining
    }

    /// Replace the local balance with the backend's. The lock is held across the call.
    pub async fn refresh(&self) -> Result<u64> {
        let mut balance = self.inner.balance.lock().await;
        let fresh = self.inner.api.fetch_balance(&self.inner.device_id).await?;
        if fresh != *balance {
            info!("Credit balance reconciled: {} -> {}", *balance, fresh);
        }
        *balance = fresh;
        Ok(fresh)
    }

    pub async fn purchase(&self, credits: u64) -> Result<u64> {
        let mut balance = self.inner.balance.lock().await;
        let fresh = self.inner.api.purchase(&self.inner.device_id, credits).await?;
        info!("Purchased {} credit(s), balance {}", credits, fresh);
        *balance = fresh;
        Ok(fresh)
    }

    /// Precondition check before opening a mode or sending a request
    pub async fn ensure_covers(&self, required: u64) -> Result<u64> {
        let balance = self.balance().await;
        if balance < required {
            return Err(SessionError::CreditExhaustion { balance, required });
        }
        Ok(balance)
    }

    /// Best-effort release of server resources for a session.
    pub fn release_resources(&self, session_id: &str) {
        let api = self.inner.api.clone();
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            match api.release_resources(&session_id).await {
                Ok(()) => debug!("Released resources for session {}", session_id),
                Err(e) => warn!("Resource release for session {} failed: {}", session_id, e),
            }
        });
    }
}
