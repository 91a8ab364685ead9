//! Notification records built from finished work orders.
//!
//! These are the only shapes the notification side consumes: a success record
//! (environment, stories, per-service commit lists) or a failure record
//! (per-service errors). Rendering and delivery live in `io::mail`.

use serde::Serialize;

use crate::core::types::CommitInfo;
use crate::order::CompletedWorkOrder;

/// Commits released for one service in one environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceCommits {
    pub service: String,
    pub environment: String,
    pub commit_info: Vec<CommitInfo>,
}

/// Everything the success notification needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuccessRecord {
    pub environment: String,
    pub stories: Vec<String>,
    pub commits: Vec<ServiceCommits>,
}

/// Terminal error for one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceError {
    pub service: String,
    pub environment: String,
    /// Full error chain; `None` renders as "none".
    pub error: Option<String>,
}

/// Everything the failure notification needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub errors: Vec<ServiceError>,
}

/// Final outcome of a batch of work orders for one environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Summary {
    Success(SuccessRecord),
    Failure(FailureRecord),
}

/// Build the notification record for finished orders.
///
/// Any failed order turns the whole batch into a failure record listing every
/// failed order; otherwise the success record carries each order's commits in
/// the order given.
pub fn summarize(environment: &str, stories: &[String], orders: &[CompletedWorkOrder]) -> Summary {
    let failed: Vec<ServiceError> = orders
        .iter()
        .filter(|order| order.failed)
        .map(|order| ServiceError {
            service: order.package.clone(),
            environment: order.environment.clone(),
            error: order.error.as_ref().map(|err| err.chain()),
        })
        .collect();

    if !failed.is_empty() {
        return Summary::Failure(FailureRecord { errors: failed });
    }

    Summary::Success(SuccessRecord {
        environment: environment.to_string(),
        stories: stories.to_vec(),
        commits: orders
            .iter()
            .map(|order| ServiceCommits {
                service: order.package.clone(),
                environment: order.environment.clone(),
                commit_info: order.commit_info.clone(),
            })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CommandError, Operation, PipelineError, Stage};
    use crate::order::{WorkOrder, WorkOrderRequest};
    use std::path::Path;

    fn order(package: &str) -> WorkOrder {
        WorkOrder::new(
            WorkOrderRequest {
                repo: format!("git@example.com:{package}.git"),
                package: package.to_string(),
                branch: "main".to_string(),
                environment: "qa".to_string(),
                build_number: "7".to_string(),
            },
            Path::new("/base"),
        )
        .expect("order")
    }

    #[test]
    fn all_passing_orders_produce_success_record() {
        let mut a = order("svc-a");
        a.commit_info.push(CommitInfo {
            description: "Fix defect".to_string(),
            commit: "0f69a1d".to_string(),
            author: "dev".to_string(),
            date: "July 5, 2016".to_string(),
        });
        let orders = vec![CompletedWorkOrder::from(a), CompletedWorkOrder::from(order("svc-b"))];
        let stories = vec!["STORY-1".to_string()];

        let Summary::Success(record) = summarize("qa", &stories, &orders) else {
            panic!("expected success");
        };
        assert_eq!(record.environment, "qa");
        assert_eq!(record.stories, stories);
        assert_eq!(record.commits.len(), 2);
        assert_eq!(record.commits[0].service, "svc-a");
        assert_eq!(record.commits[0].commit_info[0].commit, "0f69a1d");
        assert!(record.commits[1].commit_info.is_empty());
    }

    #[test]
    fn any_failure_produces_failure_record_with_chain() {
        let mut bad = order("svc-b");
        bad.failed = true;
        bad.error = Some(PipelineError::new(
            Stage::Sync,
            Operation::Pull,
            "svc-b",
            "/base/svc-b/src/svc-b",
            CommandError::Failed {
                command: "git pull".to_string(),
                code: Some(1),
                stderr_tail: "conflict".to_string(),
            },
        ));
        let orders = vec![CompletedWorkOrder::from(order("svc-a")), CompletedWorkOrder::from(bad)];

        let Summary::Failure(record) = summarize("qa", &[], &orders) else {
            panic!("expected failure");
        };
        assert_eq!(record.errors.len(), 1);
        assert_eq!(record.errors[0].service, "svc-b");
        let message = record.errors[0].error.as_deref().expect("error text");
        assert!(message.starts_with("[svc-b] pull failed in [/base/svc-b/src/svc-b]"));
        assert!(message.ends_with("git pull exited with status 1: conflict"));
    }

    #[test]
    fn summary_serializes_with_status_tag() {
        let summary = summarize("prod", &[], &[]);
        let json = serde_json::to_value(&summary).expect("json");
        assert_eq!(json["status"], "success");
        assert_eq!(json["environment"], "prod");
    }
}
