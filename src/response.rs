use axum::Json;
use serde::Serialize;

use crate::pagination::{PageMeta, Paginated};

/// Success wrapper shared by every endpoint.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub success: bool,
    pub data: Vec<T>,
    pub pagination: PageMeta,
}

pub fn success<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        data,
    })
}

pub fn paginated<T: Serialize>(page: Paginated<T>) -> Json<PaginatedResponse<T>> {
    let pagination = page.meta();
    Json(PaginatedResponse {
        success: true,
        data: page.items,
        pagination,
    })
}
