pub mod accounts;
pub mod transfers;

use serde::{Deserialize, Serialize};

/// Success envelope: `{"data": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataEnvelope<T> {
    pub data: T,
}

impl<T> DataEnvelope<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

/// Failure envelope: `{"error": {"code", "message", "violations"?}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ApiErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violations: Option<Vec<Violation>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub field: String,
    pub message: String,
}

impl ErrorEnvelope {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorBody {
                code: code.into(),
                message: message.into(),
                violations: None,
            },
        }
    }

    pub fn with_violations(
        code: impl Into<String>,
        message: impl Into<String>,
        violations: Vec<Violation>,
    ) -> Self {
        Self {
            error: ApiErrorBody {
                code: code.into(),
                message: message.into(),
                violations: Some(violations),
            },
        }
    }
}

/// Shared pagination query parameters. Page numbering starts at 1.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

pub const MAX_PER_PAGE: u32 = 100;

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    25
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

impl Pagination {
    /// Clamp to sane bounds and convert to an offset/limit pair.
    pub fn clamped(&self) -> (u64, u64) {
        let page = self.page.max(1);
        let per_page = self.per_page.clamp(1, MAX_PER_PAGE);
        (
            (page as u64 - 1) * per_page as u64,
            per_page as u64,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_clamps() {
        let p = Pagination {
            page: 0,
            per_page: 100_000,
        };
        assert_eq!(p.clamped(), (0, MAX_PER_PAGE as u64));

        let p = Pagination {
            page: 3,
            per_page: 10,
        };
        assert_eq!(p.clamped(), (20, 10));
    }

    #[test]
    fn error_envelope_shape() {
        let env = ErrorEnvelope::new("ACCOUNT_NOT_FOUND", "no such account");
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["error"]["code"], "ACCOUNT_NOT_FOUND");
        assert!(json["error"].get("violations").is_none());
    }
}
