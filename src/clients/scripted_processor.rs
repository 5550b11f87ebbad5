//! Test double for `PaymentProcessor` with programmable outcomes. Used by the
//! service and HTTP tests; the server binary always talks to Stripe.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::clients::{OffSessionChargeRequest, PaymentProcessor, PaymentProviderError};
use crate::stripe_types::{
    Customer, Expandable, LastPaymentError, PaymentIntent, PaymentIntentStatus, PaymentMethod,
    PaymentMethodCard,
};

/// Outcome of the next off-session charge
#[derive(Debug, Clone)]
pub enum ScriptedCharge {
    Succeed,
    Decline(String),
    /// The processor never saw the request
    TimeoutBeforeCreate,
    /// The processor created the charge but the response was lost
    TimeoutAfterCreate,
}

#[derive(Default)]
struct ScriptState {
    script: VecDeque<ScriptedCharge>,
    requests: Vec<OffSessionChargeRequest>,
    intents: HashMap<String, PaymentIntent>,
    by_idempotency_key: HashMap<String, String>,
    customers: Vec<String>,
    attached: Vec<(String, String)>,
    detached: Vec<String>,
}

#[derive(Default)]
pub struct ScriptedProcessor {
    state: Mutex<ScriptState>,
}

impl ScriptedProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue the outcome of the next charge. Unscripted charges succeed.
    pub fn push(&self, outcome: ScriptedCharge) {
        self.state().script.push_back(outcome);
    }

    /// Every charge request received, retries included.
    pub fn charge_requests(&self) -> Vec<OffSessionChargeRequest> {
        self.state().requests.clone()
    }

    /// Distinct charges the processor actually created.
    pub fn created_charges(&self) -> usize {
        self.state().intents.len()
    }

    pub fn intent(&self, id: &str) -> Option<PaymentIntent> {
        self.state().intents.get(id).cloned()
    }

    pub fn attached_methods(&self) -> Vec<(String, String)> {
        self.state().attached.clone()
    }

    pub fn detached_methods(&self) -> Vec<String> {
        self.state().detached.clone()
    }
}

fn build_intent(id: String, request: &OffSessionChargeRequest, status: PaymentIntentStatus) -> PaymentIntent {
    PaymentIntent {
        id,
        amount: request.amount_minor,
        amount_received: (status == PaymentIntentStatus::Succeeded).then_some(request.amount_minor),
        currency: request.currency.clone(),
        customer: Some(request.customer_id.clone()),
        description: Some(request.description.clone()),
        metadata: request.metadata.clone(),
        status,
        created: chrono::Utc::now().timestamp(),
        payment_method: Some(Expandable::Id(request.payment_method_id.clone())),
        last_payment_error: None,
    }
}

fn card_method(payment_method_id: &str, customer_id: Option<String>) -> PaymentMethod {
    PaymentMethod {
        id: payment_method_id.to_string(),
        type_: "card".to_string(),
        card: Some(PaymentMethodCard {
            brand: "visa".to_string(),
            exp_month: 12,
            exp_year: 2030,
            last4: "4242".to_string(),
        }),
        customer: customer_id,
        created: chrono::Utc::now().timestamp(),
    }
}

#[async_trait]
impl PaymentProcessor for ScriptedProcessor {
    async fn create_customer(&self, tenant_id: Uuid) -> Result<Customer, PaymentProviderError> {
        let mut state = self.state();
        let id = format!("cus_scripted_{}", state.customers.len() + 1);
        state.customers.push(id.clone());
        Ok(Customer {
            id,
            email: None,
            name: None,
            metadata: HashMap::from([("tenant_id".to_string(), tenant_id.to_string())]),
            created: chrono::Utc::now().timestamp(),
        })
    }

    async fn create_off_session_charge(
        &self,
        request: &OffSessionChargeRequest,
    ) -> Result<PaymentIntent, PaymentProviderError> {
        let mut state = self.state();
        state.requests.push(request.clone());

        // Replayed idempotency keys return the original charge, as Stripe does
        if let Some(existing) = state
            .by_idempotency_key
            .get(&request.idempotency_key)
            .and_then(|id| state.intents.get(id))
        {
            return Ok(existing.clone());
        }

        let outcome = state.script.pop_front().unwrap_or(ScriptedCharge::Succeed);
        let response_lost = matches!(outcome, ScriptedCharge::TimeoutAfterCreate);
        let id = format!("pi_scripted_{}", state.intents.len() + 1);

        match outcome {
            ScriptedCharge::TimeoutBeforeCreate => {
                Err(PaymentProviderError::Timeout("scripted timeout".to_string()))
            }
            ScriptedCharge::Decline(message) => {
                let mut intent = build_intent(id.clone(), request, PaymentIntentStatus::RequiresPaymentMethod);
                intent.last_payment_error = Some(LastPaymentError {
                    type_: Some("card_error".to_string()),
                    code: Some("card_declined".to_string()),
                    decline_code: Some("generic_decline".to_string()),
                    message: Some(message.clone()),
                });
                state.by_idempotency_key.insert(request.idempotency_key.clone(), id.clone());
                state.intents.insert(id.clone(), intent);
                Err(PaymentProviderError::CardDeclined {
                    message,
                    payment_intent_id: Some(id),
                })
            }
            ScriptedCharge::Succeed | ScriptedCharge::TimeoutAfterCreate => {
                let intent = build_intent(id.clone(), request, PaymentIntentStatus::Succeeded);
                state.by_idempotency_key.insert(request.idempotency_key.clone(), id.clone());
                state.intents.insert(id, intent.clone());
                if response_lost {
                    Err(PaymentProviderError::Timeout("scripted timeout after create".to_string()))
                } else {
                    Ok(intent)
                }
            }
        }
    }

    async fn find_payment_by_attempt(
        &self,
        attempt_id: &str,
    ) -> Result<Option<PaymentIntent>, PaymentProviderError> {
        Ok(self
            .state()
            .intents
            .values()
            .find(|intent| intent.metadata_value("attempt_id") == Some(attempt_id))
            .cloned())
    }

    async fn attach_payment_method(
        &self,
        payment_method_id: &str,
        customer_id: &str,
    ) -> Result<PaymentMethod, PaymentProviderError> {
        if !payment_method_id.starts_with("pm_") {
            return Err(PaymentProviderError::InvalidPaymentMethod(format!(
                "No such PaymentMethod: '{}'",
                payment_method_id
            )));
        }
        self.state()
            .attached
            .push((payment_method_id.to_string(), customer_id.to_string()));
        Ok(card_method(payment_method_id, Some(customer_id.to_string())))
    }

    async fn detach_payment_method(&self, payment_method_id: &str) -> Result<(), PaymentProviderError> {
        self.state().detached.push(payment_method_id.to_string());
        Ok(())
    }
}
