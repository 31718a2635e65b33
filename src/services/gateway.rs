//! Paystack transaction initialization client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::config::PaymentGatewayConfig;
use crate::errors::ServiceError;
use crate::services::payment_split::{
    InitializeTransaction, PaymentGateway, SplitPlan, TransactionInit,
};

#[derive(Debug, Serialize)]
struct SplitSubaccount<'a> {
    subaccount: &'a str,
    share: i64,
}

#[derive(Debug, Serialize)]
struct SplitInstruction<'a> {
    #[serde(rename = "type")]
    split_type: &'static str,
    bearer_type: &'static str,
    subaccounts: Vec<SplitSubaccount<'a>>,
}

#[derive(Debug, Serialize)]
struct InitializeBody<'a> {
    email: &'a str,
    amount: i64,
    currency: &'a str,
    reference: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_url: Option<&'a str>,
    metadata: &'a serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    subaccount: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    split: Option<SplitInstruction<'a>>,
}

impl<'a> From<&'a InitializeTransaction> for InitializeBody<'a> {
    fn from(request: &'a InitializeTransaction) -> Self {
        let (subaccount, split) = match &request.split {
            SplitPlan::Platform => (None, None),
            SplitPlan::Single { subaccount } => (Some(subaccount.as_str()), None),
            SplitPlan::Split { shares } => (
                None,
                Some(SplitInstruction {
                    split_type: "flat",
                    bearer_type: "account",
                    subaccounts: shares
                        .iter()
                        .map(|s| SplitSubaccount {
                            subaccount: &s.subaccount,
                            share: s.share,
                        })
                        .collect(),
                }),
            ),
        };
        Self {
            email: &request.email,
            amount: request.amount,
            currency: &request.currency,
            reference: &request.reference,
            callback_url: request.callback_url.as_deref(),
            metadata: &request.metadata,
            subaccount,
            split,
        }
    }
}

#[derive(Debug, Deserialize)]
struct InitializeResponse {
    status: bool,
    message: String,
    data: Option<InitializeData>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    authorization_url: String,
    access_code: Option<String>,
    reference: String,
}

#[derive(Clone)]
pub struct PaystackGateway {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
    provider: String,
}

impl std::fmt::Debug for PaystackGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaystackGateway")
            .field("base_url", &self.base_url)
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

impl PaystackGateway {
    pub fn new(config: &PaymentGatewayConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
            provider: config.provider.clone(),
        })
    }
}

#[async_trait]
impl PaymentGateway for PaystackGateway {
    fn provider(&self) -> String {
        self.provider.clone()
    }

    #[instrument(skip(self, request), fields(reference = %request.reference, amount = request.amount))]
    async fn initialize(
        &self,
        request: &InitializeTransaction,
    ) -> Result<TransactionInit, ServiceError> {
        let url = format!("{}/transaction/initialize", self.base_url);
        let body = InitializeBody::from(request);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.secret_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::GatewayError(format!("gateway unreachable: {}", e)))?;

        let status = response.status();
        let parsed: InitializeResponse = response.json().await.map_err(|e| {
            ServiceError::GatewayError(format!("unreadable gateway response ({}): {}", status, e))
        })?;

        if !status.is_success() || !parsed.status {
            warn!(%status, message = %parsed.message, "gateway refused transaction");
            return Err(ServiceError::GatewayError(parsed.message));
        }

        let data = parsed.data.ok_or_else(|| {
            ServiceError::GatewayError("gateway response carried no data".to_string())
        })?;
        debug!(reference = %data.reference, "gateway transaction initialized");

        Ok(TransactionInit {
            authorization_url: data.authorization_url,
            access_code: data.access_code,
            reference: data.reference,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::payment_split::SplitShare;
    use assert_matches::assert_matches;
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway(server: &MockServer) -> PaystackGateway {
        let mut config = PaymentGatewayConfig::new("sk_test_secret");
        config.base_url = server.uri();
        PaystackGateway::new(&config).unwrap()
    }

    fn request(split: SplitPlan) -> InitializeTransaction {
        InitializeTransaction {
            email: "buyer@example.com".into(),
            amount: 2000,
            currency: "NGN".into(),
            reference: "ORD-1-ABC".into(),
            callback_url: None,
            metadata: json!({"order_number": "ORD-1"}),
            split,
        }
    }

    #[tokio::test]
    async fn sends_flat_split_and_returns_authorization() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/transaction/initialize"))
            .and(header("authorization", "Bearer sk_test_secret"))
            .and(body_partial_json(json!({
                "amount": 2000,
                "split": {
                    "type": "flat",
                    "bearer_type": "account",
                    "subaccounts": [
                        {"subaccount": "ACCT_A", "share": 1000},
                        {"subaccount": "ACCT_B", "share": 1000}
                    ]
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": true,
                "message": "Authorization URL created",
                "data": {
                    "authorization_url": "https://checkout.paystack.com/abc",
                    "access_code": "abc",
                    "reference": "ORD-1-ABC"
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let split = SplitPlan::Split {
            shares: vec![
                SplitShare {
                    store_id: Uuid::new_v4(),
                    subaccount: "ACCT_A".into(),
                    share: 1000,
                },
                SplitShare {
                    store_id: Uuid::new_v4(),
                    subaccount: "ACCT_B".into(),
                    share: 1000,
                },
            ],
        };
        let init = gateway(&server).initialize(&request(split)).await.unwrap();
        assert_eq!(init.authorization_url, "https://checkout.paystack.com/abc");
        assert_eq!(init.reference, "ORD-1-ABC");
    }

    #[tokio::test]
    async fn single_vendor_uses_subaccount_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/transaction/initialize"))
            .and(body_partial_json(json!({"subaccount": "ACCT_A"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": true,
                "message": "ok",
                "data": {"authorization_url": "https://pay/x", "reference": "R1"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let init = gateway(&server)
            .initialize(&request(SplitPlan::Single {
                subaccount: "ACCT_A".into(),
            }))
            .await
            .unwrap();
        assert_eq!(init.reference, "R1");
        assert_eq!(init.access_code, None);
    }

    #[tokio::test]
    async fn refusal_is_a_gateway_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/transaction/initialize"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "status": false,
                "message": "Invalid subaccount"
            })))
            .mount(&server)
            .await;

        let result = gateway(&server).initialize(&request(SplitPlan::Platform)).await;
        assert_matches!(result, Err(ServiceError::GatewayError(msg)) if msg == "Invalid subaccount");
    }

    #[tokio::test]
    async fn unreadable_response_is_a_gateway_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let result = gateway(&server).initialize(&request(SplitPlan::Platform)).await;
        assert_matches!(result, Err(ServiceError::GatewayError(_)));
    }
}
