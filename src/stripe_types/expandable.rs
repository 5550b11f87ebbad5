use serde::{Deserialize, Serialize};

/// Either an object id or the expanded object
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expandable<T> {
    Id(String),
    Object(Box<T>),
}

impl Expandable<crate::stripe_types::PaymentMethod> {
    pub fn id(&self) -> &str {
        match self {
            Expandable::Id(id) => id,
            Expandable::Object(pm) => &pm.id,
        }
    }
}
