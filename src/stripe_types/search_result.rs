use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchResult<T> {
    pub object: String,
    pub data: Vec<T>,
    pub has_more: bool,
    pub next_page: Option<String>,
}
