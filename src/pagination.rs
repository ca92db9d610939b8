use std::collections::HashMap;

use serde::Serialize;

use crate::error::{AppError, AppResult};

pub const DEFAULT_PER_PAGE: i64 = 10;
pub const MAX_PER_PAGE: i64 = 100;

/// 1-based page window requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub per_page: i64,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl PageRequest {
    pub fn new(page: Option<i64>, per_page: Option<i64>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE),
        }
    }

    /// Reads `page` and `perPage` from raw query parameters.
    pub fn from_params(params: &HashMap<String, String>) -> AppResult<Self> {
        let page = parse_opt(params, "page")?;
        let per_page = parse_opt(params, "perPage")?;
        Ok(Self::new(page, per_page))
    }

    pub fn limit(&self) -> i64 {
        self.per_page
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.per_page)
    }
}

fn parse_opt(params: &HashMap<String, String>, key: &str) -> AppResult<Option<i64>> {
    match params.get(key).map(|v| v.trim()) {
        None | Some("") => Ok(None),
        Some(raw) => raw
            .parse::<i64>()
            .map(Some)
            .map_err(|_| AppError::Validation(format!("{key} must be an integer"))),
    }
}

#[derive(Debug, Clone)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub request: PageRequest,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
    pub total_pages: i64,
}

impl<T> Paginated<T> {
    pub fn meta(&self) -> PageMeta {
        let per_page = self.request.per_page.max(1);
        PageMeta {
            page: self.request.page,
            per_page,
            total: self.total,
            total_pages: (self.total + per_page - 1) / per_page,
        }
    }
}
