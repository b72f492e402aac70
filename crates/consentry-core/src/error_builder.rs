use crate::problemdetails;
use axum::http::StatusCode;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

const PROBLEM_BASE_URL: &str = "https://consentry.io/probs";

pub struct ErrorBuilder {
    status: StatusCode,
    type_: String,
    title: String,
    detail: String,
    instance: String,
    values: HashMap<String, serde_json::Value>,
}

impl ErrorBuilder {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            type_: String::new(),
            title: String::new(),
            detail: String::new(),
            instance: String::new(),
            values: HashMap::new(),
        }
    }

    pub fn type_(mut self, type_: impl Into<String>) -> Self {
        self.type_ = type_.into();
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    fn instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = instance.into();
        self
    }

    fn value<T: Serialize>(mut self, key: &str, value: T) -> Self {
        if let Ok(value) = serde_json::to_value(value) {
            self.values.insert(key.to_string(), value);
        }
        self
    }

    pub fn build(self) -> problemdetails::Problem {
        let mut problem = problemdetails::new(self.status)
            .with_type(self.type_)
            .with_title(self.title)
            .with_detail(self.detail)
            .with_instance(self.instance)
            .with_value("timestamp", chrono::Utc::now().to_rfc3339());

        for (key, value) in self.values {
            problem = problem.with_value(&key, value);
        }

        problem
    }
}

fn builder(status: StatusCode, slug: &str, title: &str, code: &str) -> ErrorBuilder {
    ErrorBuilder::new(status)
        .type_(format!("{}/{}", PROBLEM_BASE_URL, slug))
        .title(title)
        .instance(format!("/error/{}", slug))
        .value("error_code", code)
}

// Common error builders
pub fn internal_server_error() -> ErrorBuilder {
    builder(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal-server-error",
        "Internal Server Error",
        "INTERNAL_SERVER_ERROR",
    )
    .detail("An unexpected error occurred while processing your request")
}

pub fn not_found() -> ErrorBuilder {
    builder(
        StatusCode::NOT_FOUND,
        "not-found",
        "Resource Not Found",
        "NOT_FOUND",
    )
}

pub fn unauthorized() -> ErrorBuilder {
    builder(
        StatusCode::UNAUTHORIZED,
        "unauthorized",
        "Unauthorized",
        "UNAUTHORIZED",
    )
    .detail("Authentication is required to access this resource")
}

pub fn bad_request() -> ErrorBuilder {
    builder(
        StatusCode::BAD_REQUEST,
        "bad-request",
        "Bad Request",
        "BAD_REQUEST",
    )
    .detail("The request was malformed or invalid")
}

pub fn too_many_requests(retry_after: Duration) -> ErrorBuilder {
    builder(
        StatusCode::TOO_MANY_REQUESTS,
        "too-many-requests",
        "Too Many Requests",
        "RATE_LIMITED",
    )
    .detail("Request rate limit exceeded")
    .value("retry_after_secs", retry_after.as_secs().max(1))
}
