use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::{Client, RequestBuilder};
use std::time::Duration;
use uuid::Uuid;

use crate::clients::{OffSessionChargeRequest, PaymentProcessor, PaymentProviderError};
use crate::config::settings::StripeConfig;
use crate::stripe_types::{Customer, PaymentIntent, PaymentMethod, SearchResult, StripeErrorResponse};

/// Stripe REST client
#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: String,
    base_url: String,
}

impl StripeClient {
    pub fn new(config: &StripeConfig) -> Result<Self, PaymentProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| PaymentProviderError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            secret_key: config.secret_key.clone(),
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.basic_auth(&self.secret_key, Option::<&str>::None)
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> Result<T, PaymentProviderError> {
        let response = self.authed(builder).send().await.map_err(map_transport_error)?;
        let status = response.status();

        if status.is_success() {
            return response.json::<T>().await.map_err(|e| {
                PaymentProviderError::Serialization(format!("Failed to decode Stripe response: {}", e))
            });
        }

        let body: Result<StripeErrorResponse, _> = response.json().await;
        match body {
            Ok(envelope) => Err(map_api_error(envelope)),
            Err(_) => Err(PaymentProviderError::Api {
                error_type: "unknown".to_string(),
                message: format!("HTTP {}", status),
                code: None,
            }),
        }
    }
}

fn map_transport_error(error: reqwest::Error) -> PaymentProviderError {
    if error.is_timeout() {
        PaymentProviderError::Timeout(error.to_string())
    } else {
        PaymentProviderError::Http(error.to_string())
    }
}

fn map_api_error(envelope: StripeErrorResponse) -> PaymentProviderError {
    let err = envelope.error;
    let message = err
        .message
        .clone()
        .unwrap_or_else(|| err.code.clone().unwrap_or_else(|| err.type_.clone()));

    if err.type_ == "card_error" {
        return PaymentProviderError::CardDeclined {
            message,
            payment_intent_id: err.payment_intent.map(|pi| pi.id),
        };
    }

    let bad_method = err.param.as_deref().is_some_and(|p| p.starts_with("payment_method"))
        || err.code.as_deref() == Some("payment_method_unactivated");
    if err.type_ == "invalid_request_error" && bad_method {
        return PaymentProviderError::InvalidPaymentMethod(message);
    }

    PaymentProviderError::Api {
        error_type: err.type_,
        message,
        code: err.code,
    }
}

#[async_trait]
impl PaymentProcessor for StripeClient {
    async fn create_customer(&self, tenant_id: Uuid) -> Result<Customer, PaymentProviderError> {
        let params = [("metadata[tenant_id]", tenant_id.to_string())];
        let customer: Customer = self
            .send(self.client.post(format!("{}/customers", self.base_url)).form(&params))
            .await?;
        info!("Created Stripe customer {} for tenant {}", customer.id, tenant_id);
        Ok(customer)
    }

    async fn create_off_session_charge(
        &self,
        request: &OffSessionChargeRequest,
    ) -> Result<PaymentIntent, PaymentProviderError> {
        let mut params = vec![
            ("amount".to_string(), request.amount_minor.to_string()),
            ("currency".to_string(), request.currency.to_lowercase()),
            ("customer".to_string(), request.customer_id.clone()),
            ("payment_method".to_string(), request.payment_method_id.clone()),
            ("confirm".to_string(), "true".to_string()),
            ("off_session".to_string(), "true".to_string()),
            ("description".to_string(), request.description.clone()),
        ];
        for (key, value) in &request.metadata {
            params.push((format!("metadata[{}]", key), value.clone()));
        }

        debug!(
            "Creating off-session PaymentIntent for customer {} ({} {})",
            request.customer_id, request.amount_minor, request.currency
        );

        self.send(
            self.client
                .post(format!("{}/payment_intents", self.base_url))
                .header("Idempotency-Key", &request.idempotency_key)
                .form(&params),
        )
        .await
    }

    async fn find_payment_by_attempt(
        &self,
        attempt_id: &str,
    ) -> Result<Option<PaymentIntent>, PaymentProviderError> {
        let query = format!("metadata['attempt_id']:'{}'", attempt_id);
        let url = format!(
            "{}/payment_intents/search?query={}",
            self.base_url,
            urlencoding::encode(&query)
        );
        let result: SearchResult<PaymentIntent> = self.send(self.client.get(url)).await?;
        if result.data.len() > 1 {
            warn!(
                "Found {} payment intents for attempt {}; using the first",
                result.data.len(),
                attempt_id
            );
        }
        Ok(result.data.into_iter().next())
    }

    async fn attach_payment_method(
        &self,
        payment_method_id: &str,
        customer_id: &str,
    ) -> Result<PaymentMethod, PaymentProviderError> {
        self.send(
            self.client
                .post(format!("{}/payment_methods/{}/attach", self.base_url, payment_method_id))
                .form(&[("customer", customer_id)]),
        )
        .await
    }

    async fn detach_payment_method(
        &self,
        payment_method_id: &str,
    ) -> Result<(), PaymentProviderError> {
        let _detached: PaymentMethod = self
            .send(
                self.client
                    .post(format!("{}/payment_methods/{}/detach", self.base_url, payment_method_id)),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn client_for(server: &mockito::ServerGuard) -> StripeClient {
        StripeClient::new(&StripeConfig {
            secret_key: "sk_test_123".to_string(),
            webhook_secret: "whsec_123".to_string(),
            api_base_url: server.url(),
            request_timeout_secs: 5,
            webhook_tolerance_secs: 300,
        })
        .unwrap()
    }

    fn charge_request() -> OffSessionChargeRequest {
        OffSessionChargeRequest {
            customer_id: "cus_1".to_string(),
            payment_method_id: "pm_1".to_string(),
            amount_minor: 1083,
            currency: "USD".to_string(),
            description: "1000 credits".to_string(),
            metadata: HashMap::from([("attempt_id".to_string(), "att_1".to_string())]),
            idempotency_key: "att_1".to_string(),
        }
    }

    #[tokio::test]
    async fn creates_confirmed_off_session_intent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/payment_intents")
            .match_header("idempotency-key", "att_1")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("amount".into(), "1083".into()),
                mockito::Matcher::UrlEncoded("currency".into(), "usd".into()),
                mockito::Matcher::UrlEncoded("off_session".into(), "true".into()),
                mockito::Matcher::UrlEncoded("metadata[attempt_id]".into(), "att_1".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"{"id":"pi_1","amount":1083,"currency":"usd","status":"succeeded","created":1700000000,"metadata":{"attempt_id":"att_1"}}"#,
            )
            .create_async()
            .await;

        let intent = client_for(&server)
            .create_off_session_charge(&charge_request())
            .await
            .unwrap();
        assert_eq!(intent.id, "pi_1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn card_error_maps_to_declined_with_intent_id() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/payment_intents")
            .with_status(402)
            .with_body(
                r#"{"error":{"type":"card_error","code":"card_declined","decline_code":"insufficient_funds","message":"Your card has insufficient funds.","payment_intent":{"id":"pi_declined"}}}"#,
            )
            .create_async()
            .await;

        let err = client_for(&server)
            .create_off_session_charge(&charge_request())
            .await
            .unwrap_err();
        match err {
            PaymentProviderError::CardDeclined { message, payment_intent_id } => {
                assert_eq!(message, "Your card has insufficient funds.");
                assert_eq!(payment_intent_id.as_deref(), Some("pi_declined"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn search_by_attempt_returns_first_match() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/payment_intents/search")
            .match_query(mockito::Matcher::UrlEncoded(
                "query".into(),
                "metadata['attempt_id']:'att_9'".into(),
            ))
            .with_status(200)
            .with_body(
                r#"{"object":"search_result","data":[{"id":"pi_9","amount":500,"currency":"usd","status":"processing","created":1}],"has_more":false,"next_page":null}"#,
            )
            .create_async()
            .await;

        let found = client_for(&server).find_payment_by_attempt("att_9").await.unwrap();
        assert_eq!(found.map(|pi| pi.id), Some("pi_9".to_string()));
    }

    #[tokio::test]
    async fn unparseable_error_body_is_an_api_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/payment_intents/search")
            .match_query(mockito::Matcher::Any)
            .with_status(500)
            .with_body("oops")
            .create_async()
            .await;

        let err = client_for(&server).find_payment_by_attempt("att_x").await.unwrap_err();
        assert!(matches!(err, PaymentProviderError::Api { .. }));
    }
}
