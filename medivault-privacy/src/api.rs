//! Wire shapes for the query surface. Field names are camelCase to match the
//! existing dashboard clients.

use serde::{Deserialize, Serialize};

use crate::{
    errors::{ErrorKind, QueryError},
    types::{Condition, Predicate},
};

pub const DP_MESSAGE: &str = "Laplace noise added. DP-protected response.";

fn default_age_min() -> i64 {
    30
}

fn default_age_max() -> i64 {
    40
}

fn default_condition() -> String {
    Condition::Diabetes.as_str().into()
}

fn default_epsilon() -> f64 {
    1.0
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub requester_identity: String,
    #[serde(default = "default_age_min")]
    pub age_min: i64,
    #[serde(default = "default_age_max")]
    pub age_max: i64,
    #[serde(default = "default_condition")]
    pub condition: String,
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
}

impl QueryRequest {
    /// Request with the documented defaults for everything but the requester.
    pub fn for_requester(requester: impl Into<String>) -> Self {
        Self {
            requester_identity: requester.into(),
            age_min: default_age_min(),
            age_max: default_age_max(),
            condition: default_condition(),
            epsilon: default_epsilon(),
        }
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = condition.into();
        self
    }

    pub fn with_ages(mut self, age_min: i64, age_max: i64) -> Self {
        self.age_min = age_min;
        self.age_max = age_max;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryEcho {
    pub age_min: i64,
    pub age_max: i64,
    pub condition: String,
}

impl From<&Predicate> for QueryEcho {
    fn from(predicate: &Predicate) -> Self {
        Self {
            age_min: predicate.age_min,
            age_max: predicate.age_max,
            condition: predicate.condition.as_str().into(),
        }
    }
}

/// Successful answer. Only the noised count ever appears here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub query: QueryEcho,
    pub noisy_count: u64,
    pub budget_remaining: f64,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "errorKind", rename_all = "snake_case")]
pub enum ErrorResponse {
    BudgetExhausted { remaining: f64 },
    ValidationError { message: String },
    InternalFault { message: String },
}

impl ErrorResponse {
    /// Integrity and source details stay server-side; callers get an opaque fault.
    pub fn from_error(err: &QueryError) -> Self {
        if let QueryError::BudgetExhausted { remaining } = err {
            return ErrorResponse::BudgetExhausted {
                remaining: *remaining,
            };
        }
        let message = match err.kind() {
            ErrorKind::Validation => err.to_string(),
            ErrorKind::Concurrency => "budget commit conflicted with a concurrent request".into(),
            ErrorKind::Configuration => "engine misconfigured".into(),
            ErrorKind::BudgetExhausted | ErrorKind::InternalFault => {
                "query could not be completed".into()
            }
        };
        match err.kind() {
            ErrorKind::Validation => ErrorResponse::ValidationError { message },
            _ => ErrorResponse::InternalFault { message },
        }
    }
}

/// Either shape, serialized without a wrapper.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryReply {
    Success(QueryResponse),
    Failure(ErrorResponse),
}

impl QueryReply {
    pub fn is_success(&self) -> bool {
        matches!(self, QueryReply::Success(_))
    }
}

impl From<Result<QueryResponse, QueryError>> for QueryReply {
    fn from(result: Result<QueryResponse, QueryError>) -> Self {
        match result {
            Ok(response) => QueryReply::Success(response),
            Err(err) => QueryReply::Failure(ErrorResponse::from_error(&err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn request_fills_documented_defaults() {
        let request: QueryRequest =
            serde_json::from_value(json!({"requesterIdentity": "lab-7"})).unwrap();
        assert_eq!(request, QueryRequest::for_requester("lab-7"));
        assert_eq!(request.condition, "diabetes");
        assert_eq!(request.epsilon, 1.0);
    }

    #[test]
    fn success_reply_has_no_true_count() {
        let reply = QueryReply::Success(QueryResponse {
            query: QueryEcho::from(&Predicate::new(30, 40, Condition::Diabetes)),
            noisy_count: 5,
            budget_remaining: 9.0,
            message: DP_MESSAGE.into(),
        });
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["query"]["ageMin"], 30);
        assert_eq!(value["noisyCount"], 5);
        assert_eq!(value["budgetRemaining"], 9.0);
        assert!(value.get("trueCount").is_none());
    }

    #[test]
    fn error_replies_are_tagged() {
        let exhausted =
            ErrorResponse::from_error(&QueryError::BudgetExhausted { remaining: 0.0 });
        assert_eq!(
            serde_json::to_value(&exhausted).unwrap(),
            json!({"errorKind": "budget_exhausted", "remaining": 0.0})
        );
        let fault = ErrorResponse::from_error(&QueryError::Internal("disk on fire".into()));
        let value = serde_json::to_value(&fault).unwrap();
        assert_eq!(value["errorKind"], "internal_fault");
        assert!(!value["message"].as_str().unwrap().contains("disk"));
    }
}
