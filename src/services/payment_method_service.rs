use chrono::Utc;
use log::{info, warn};
use std::sync::Arc;
use uuid::Uuid;

use crate::clients::PaymentProcessor;
use crate::db::repositories::PaymentMethodRepository;
use crate::error::{AppError, AppResult};
use crate::models::PaymentMethod;
use crate::stripe_types;

/// Tenant payment methods and the tenant to processor customer mapping.
#[derive(Clone)]
pub struct PaymentMethodService {
    methods: Arc<dyn PaymentMethodRepository>,
    processor: Arc<dyn PaymentProcessor>,
}

impl PaymentMethodService {
    pub fn new(methods: Arc<dyn PaymentMethodRepository>, processor: Arc<dyn PaymentProcessor>) -> Self {
        Self { methods, processor }
    }

    pub async fn list(&self, tenant_id: Uuid) -> AppResult<Vec<PaymentMethod>> {
        self.methods.list_active(tenant_id).await
    }

    /// Processor customer for the tenant, created on first use.
    pub async fn ensure_customer(&self, tenant_id: Uuid) -> AppResult<String> {
        if let Some(existing) = self.methods.get_customer(tenant_id).await? {
            return Ok(existing.customer_id);
        }

        let customer = self.processor.create_customer(tenant_id).await?;
        let saved = self.methods.save_customer(tenant_id, &customer.id).await?;
        if saved.customer_id != customer.id {
            // A concurrent request won the mapping; ours is orphaned at the processor
            warn!(
                "Discarding processor customer {} for tenant {}; {} already mapped",
                customer.id, tenant_id, saved.customer_id
            );
        } else {
            info!("Created processor customer {} for tenant {}", customer.id, tenant_id);
        }
        Ok(saved.customer_id)
    }

    /// Attach a processor payment method to the tenant's customer and store it.
    /// The first method a tenant stores becomes the default.
    pub async fn attach(
        &self,
        tenant_id: Uuid,
        payment_method_id: &str,
        make_default: bool,
    ) -> AppResult<PaymentMethod> {
        if payment_method_id.trim().is_empty() {
            return Err(AppError::Validation("Payment method id is required".to_string()));
        }

        let customer_id = self.ensure_customer(tenant_id).await?;
        let attached = self
            .processor
            .attach_payment_method(payment_method_id, &customer_id)
            .await?;

        let has_methods = !self.methods.list_active(tenant_id).await?.is_empty();
        let method = stored_method(tenant_id, &customer_id, &attached, make_default || !has_methods);
        let saved = self.methods.upsert(&method).await?;
        info!("Attached payment method {} for tenant {}", saved.id, tenant_id);
        Ok(saved)
    }

    pub async fn detach(&self, tenant_id: Uuid, payment_method_id: &str) -> AppResult<()> {
        let method = self
            .methods
            .get(tenant_id, payment_method_id)
            .await?
            .filter(|m| m.is_active)
            .ok_or_else(|| {
                AppError::NotFound(format!("Payment method {} not found", payment_method_id))
            })?;

        self.processor.detach_payment_method(&method.id).await?;
        self.methods.deactivate(tenant_id, &method.id).await?;
        info!("Detached payment method {} for tenant {}", method.id, tenant_id);
        Ok(())
    }

    /// The method a charge should use: the requested one when it is active, else the default.
    pub async fn resolve_for_charge(
        &self,
        tenant_id: Uuid,
        requested: Option<&str>,
    ) -> AppResult<PaymentMethod> {
        match requested {
            Some(id) => self
                .methods
                .get(tenant_id, id)
                .await?
                .filter(|m| m.is_active)
                .ok_or_else(|| {
                    AppError::BadRequest(format!(
                        "Payment method {} is not an active method of this tenant",
                        id
                    ))
                }),
            None => self.methods.get_default(tenant_id).await?.ok_or_else(|| {
                AppError::BadRequest("Tenant has no active payment method".to_string())
            }),
        }
    }

    pub async fn is_active_method(&self, tenant_id: Uuid, payment_method_id: &str) -> AppResult<bool> {
        Ok(self
            .methods
            .get(tenant_id, payment_method_id)
            .await?
            .is_some_and(|m| m.is_active))
    }

    /// Store a method first seen on a successful payment. Known methods are left alone.
    pub async fn remember_from_payment(
        &self,
        tenant_id: Uuid,
        payment_method_id: &str,
        customer_id: Option<&str>,
    ) -> AppResult<Option<PaymentMethod>> {
        if self.methods.get(tenant_id, payment_method_id).await?.is_some() {
            return Ok(None);
        }

        let customer_id = match customer_id {
            Some(id) => {
                self.methods.save_customer(tenant_id, id).await?;
                id.to_string()
            }
            None => self.ensure_customer(tenant_id).await?,
        };

        let attached = self
            .processor
            .attach_payment_method(payment_method_id, &customer_id)
            .await?;
        let has_methods = !self.methods.list_active(tenant_id).await?.is_empty();
        let saved = self
            .methods
            .upsert(&stored_method(tenant_id, &customer_id, &attached, !has_methods))
            .await?;
        info!(
            "Saved payment method {} from a successful payment for tenant {}",
            saved.id, tenant_id
        );
        Ok(Some(saved))
    }
}

fn stored_method(
    tenant_id: Uuid,
    customer_id: &str,
    attached: &stripe_types::PaymentMethod,
    is_default: bool,
) -> PaymentMethod {
    let now = Utc::now();
    let card = attached.card.as_ref();
    PaymentMethod {
        id: attached.id.clone(),
        tenant_id,
        customer_id: customer_id.to_string(),
        card_brand: card.map(|c| c.brand.clone()),
        card_last_four: card.map(|c| c.last4.clone()),
        card_exp_month: card.and_then(|c| i32::try_from(c.exp_month).ok()),
        card_exp_year: card.and_then(|c| i32::try_from(c.exp_year).ok()),
        is_default,
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::ScriptedProcessor;
    use crate::db::memory_store::MemoryStore;

    fn service() -> (Arc<ScriptedProcessor>, PaymentMethodService) {
        let processor = Arc::new(ScriptedProcessor::new());
        let service = PaymentMethodService::new(Arc::new(MemoryStore::new()), processor.clone());
        (processor, service)
    }

    #[tokio::test]
    async fn first_method_becomes_default_and_customer_is_reused() {
        let (processor, service) = service();
        let tenant = Uuid::new_v4();

        let first = service.attach(tenant, "pm_card_a", false).await.unwrap();
        let second = service.attach(tenant, "pm_card_b", false).await.unwrap();

        assert!(first.is_default);
        assert!(!second.is_default);
        assert_eq!(first.customer_id, second.customer_id);
        assert_eq!(first.card_last_four.as_deref(), Some("4242"));
        assert_eq!(processor.attached_methods().len(), 2);

        let resolved = service.resolve_for_charge(tenant, None).await.unwrap();
        assert_eq!(resolved.id, "pm_card_a");
    }

    #[tokio::test]
    async fn detached_method_cannot_be_charged() {
        let (processor, service) = service();
        let tenant = Uuid::new_v4();
        service.attach(tenant, "pm_card_a", true).await.unwrap();

        service.detach(tenant, "pm_card_a").await.unwrap();
        assert_eq!(processor.detached_methods(), vec!["pm_card_a".to_string()]);
        assert!(service.resolve_for_charge(tenant, Some("pm_card_a")).await.is_err());
        assert!(service.resolve_for_charge(tenant, None).await.is_err());
        assert!(matches!(
            service.detach(tenant, "pm_card_a").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn other_tenants_method_is_not_resolvable() {
        let (_, service) = service();
        let owner = Uuid::new_v4();
        service.attach(owner, "pm_card_a", true).await.unwrap();

        let stranger = Uuid::new_v4();
        assert!(!service.is_active_method(stranger, "pm_card_a").await.unwrap());
        assert!(service.resolve_for_charge(stranger, Some("pm_card_a")).await.is_err());
    }

    #[tokio::test]
    async fn payment_method_from_a_payment_is_saved_once() {
        let (processor, service) = service();
        let tenant = Uuid::new_v4();

        let saved = service
            .remember_from_payment(tenant, "pm_from_checkout", Some("cus_checkout"))
            .await
            .unwrap()
            .unwrap();
        assert!(saved.is_default);
        assert_eq!(saved.customer_id, "cus_checkout");

        assert!(service
            .remember_from_payment(tenant, "pm_from_checkout", Some("cus_checkout"))
            .await
            .unwrap()
            .is_none());
        assert_eq!(processor.attached_methods().len(), 1);
    }
}
