//! Stripe wire types used by the payment processor client and webhook handler

pub mod checkout_session;
pub mod customer;
pub mod error;
pub mod event;
pub mod expandable;
pub mod payment_intent;
pub mod payment_method;
pub mod search_result;

pub use checkout_session::{CheckoutSession, CheckoutSessionMode};
pub use customer::Customer;
pub use error::{ErrorPaymentIntent, StripeApiError, StripeErrorResponse};
pub use event::{Event, EventType};
pub use expandable::Expandable;
pub use payment_intent::{LastPaymentError, PaymentIntent, PaymentIntentStatus};
pub use payment_method::{PaymentMethod, PaymentMethodCard};
pub use search_result::SearchResult;
