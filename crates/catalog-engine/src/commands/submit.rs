//! Graph submission
//!
//! `submit` is the inbound contract for producers: validate the graph,
//! build its change-set and apply it. [`Submitter`] adds the retry policy:
//! a retryable failure is retried at change-set granularity, each attempt
//! with a fresh change-set.

#![allow(clippy::result_large_err)]

use std::time::{Duration, Instant};

use catalog_core::core_types::{RequestContext, TraceId};
use catalog_core::errors::{ExError, ExErrorKind};
use catalog_core::model::{ChangeSetId, ChangeSetStatus, MutationGraph, SchemaRegistry};
use catalog_core::{log_op_end, log_op_error, log_op_start, validate, ValidationErrors, Violation};
use catalog_store::errors::{from_rusqlite, Result};
use catalog_store::ChangeRepo;
use chrono::Utc;
use rusqlite::{Connection, TransactionBehavior};

use super::apply::{apply_change_set, record_rejection, AppliedEntity};
use super::build::build_change_set;
use crate::config::RetryConfig;

/// One reason a submission was rejected
#[derive(Debug, Clone)]
pub enum SubmitError {
    /// Structural problem found before anything was written
    Violation(Violation),
    /// Failure while applying the change-set
    Apply(ExError),
}

impl SubmitError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SubmitError::Violation(_) => false,
            SubmitError::Apply(e) => e.is_retryable(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            SubmitError::Violation(v) => serde_json::json!({
                "code": match v.kind {
                    catalog_core::ViolationKind::UnresolvedReference => {
                        ExErrorKind::UnresolvedReference.code()
                    }
                    _ => ExErrorKind::SchemaViolation.code(),
                },
                "violation": v,
            }),
            SubmitError::Apply(e) => e.to_json(),
        }
    }
}

impl std::fmt::Display for SubmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmitError::Violation(v) => write!(f, "{}", v),
            SubmitError::Apply(e) => write!(f, "{}", e),
        }
    }
}

/// Outcome of one submission
#[derive(Debug, Clone)]
pub struct ChangeSetResult {
    pub status: ChangeSetStatus,
    /// `None` when the graph changed nothing and no change-set was written
    pub change_set_id: Option<ChangeSetId>,
    pub entities: Vec<AppliedEntity>,
    pub errors: Vec<SubmitError>,
}

impl ChangeSetResult {
    fn accepted(change_set_id: Option<ChangeSetId>, entities: Vec<AppliedEntity>) -> Self {
        Self {
            status: ChangeSetStatus::Accepted,
            change_set_id,
            entities,
            errors: Vec::new(),
        }
    }

    fn rejected(change_set_id: ChangeSetId, errors: Vec<SubmitError>) -> Self {
        Self {
            status: ChangeSetStatus::Rejected,
            change_set_id: Some(change_set_id),
            entities: Vec::new(),
            errors,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status == ChangeSetStatus::Accepted
    }

    /// A rejection that a fresh attempt may not hit again
    pub fn is_retryable(&self) -> bool {
        self.status == ChangeSetStatus::Rejected && self.errors.iter().any(SubmitError::is_retryable)
    }

    pub fn to_json(&self) -> serde_json::Value {
        let errors: Vec<serde_json::Value> = self.errors.iter().map(SubmitError::to_json).collect();
        serde_json::json!({
            "status": self.status,
            "change_set_id": self.change_set_id,
            "entities": self.entities,
            "errors": errors,
        })
    }
}

/// Validate, build and apply `graph` on behalf of `submitter`
///
/// Rejections are reported in the returned [`ChangeSetResult`], every one
/// recorded against a rejected change-set.
///
/// # Errors
///
/// `InvariantViolation`, and store failures outside change-set application
/// (opening the change-set, recording a validation rejection).
pub fn submit(
    conn: &mut Connection,
    registry: &SchemaRegistry,
    graph: &MutationGraph,
    submitter: &str,
) -> Result<ChangeSetResult> {
    let start = Instant::now();
    log_op_start!("submit", submitter = submitter, node_count = graph.len());

    let result = submit_inner(conn, registry, graph, submitter);

    let duration_ms = start.elapsed().as_millis() as u64;
    match &result {
        Ok(outcome) => {
            log_op_end!(
                "submit",
                duration_ms = duration_ms,
                status = outcome.status.as_str(),
                change_set_id = outcome.change_set_id.map(|id| id.0),
                error_count = outcome.errors.len()
            );
        }
        Err(e) => {
            log_op_error!("submit", e.clone(), duration_ms = duration_ms, submitter = submitter);
        }
    }
    result
}

fn submit_inner(
    conn: &mut Connection,
    registry: &SchemaRegistry,
    graph: &MutationGraph,
    submitter: &str,
) -> Result<ChangeSetResult> {
    if let Err(violations) = validate(graph, registry) {
        let change_set_id = record_validation_rejection(conn, registry, submitter, &violations)?;
        tracing::info!(
            change_set_id = change_set_id.0,
            violation_count = violations.len(),
            "Graph rejected by validation"
        );
        let errors = violations.0.into_iter().map(SubmitError::Violation).collect();
        return Ok(ChangeSetResult::rejected(change_set_id, errors));
    }

    let Some(change_set_id) = build_change_set(conn, registry, graph, submitter)? else {
        return Ok(ChangeSetResult::accepted(None, Vec::new()));
    };

    match apply_change_set(conn, registry, change_set_id) {
        Ok(entities) => Ok(ChangeSetResult::accepted(Some(change_set_id), entities)),
        Err(err) if err.kind() == ExErrorKind::InvariantViolation => Err(err),
        Err(err) => Ok(ChangeSetResult::rejected(
            change_set_id,
            vec![SubmitError::Apply(err)],
        )),
    }
}

/// Open a change-set and reject it straight away with the violation list
fn record_validation_rejection(
    conn: &mut Connection,
    registry: &SchemaRegistry,
    submitter: &str,
    violations: &ValidationErrors,
) -> Result<ChangeSetId> {
    let now = Utc::now().timestamp_millis();
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(from_rusqlite)?;
    let change_set_id = ChangeRepo::create_change_set(&tx, submitter, registry.version(), now)?;
    ChangeRepo::finalize(
        &tx,
        change_set_id,
        ChangeSetStatus::Rejected,
        Some(&violations.to_json()),
        now,
    )?;
    tx.commit().map_err(from_rusqlite)?;
    Ok(change_set_id)
}

/// Make sure an abandoned attempt's change-set does not stay pending
///
/// Its own rejection write may have lost the lock as well.
fn settle_rejection(conn: &Connection, result: &ChangeSetResult) {
    let Some(change_set_id) = result.change_set_id else {
        return;
    };
    let error = result
        .errors
        .first()
        .map(SubmitError::to_json)
        .unwrap_or(serde_json::Value::Null);
    if let Err(e) = record_rejection(conn, change_set_id, &error) {
        tracing::warn!(
            change_set_id = change_set_id.0,
            error = %e,
            "Abandoned change-set is still pending"
        );
    }
}

/// [`submit`] with change-set granularity retry
pub struct Submitter<'r> {
    registry: &'r SchemaRegistry,
    retry: RetryConfig,
}

impl<'r> Submitter<'r> {
    pub fn new(registry: &'r SchemaRegistry, retry: &RetryConfig) -> Self {
        Self {
            registry,
            retry: retry.clone(),
        }
    }

    /// Submit under a new trace
    ///
    /// # Errors
    ///
    /// As [`submit`], once attempts are exhausted or the failure is not
    /// retryable.
    pub fn submit(
        &self,
        conn: &mut Connection,
        graph: &MutationGraph,
        submitter: &str,
    ) -> Result<ChangeSetResult> {
        let ctx = RequestContext::new().with_trace_id(TraceId::new());
        self.submit_with_context(conn, graph, submitter, ctx)
    }

    /// Submit, retrying retryable failures up to `retry.max_attempts` times
    ///
    /// Every attempt gets a fresh request id under the same trace.
    ///
    /// # Errors
    ///
    /// As [`submit`], tagged with the last attempt's request id.
    pub fn submit_with_context(
        &self,
        conn: &mut Connection,
        graph: &MutationGraph,
        submitter: &str,
        ctx: RequestContext,
    ) -> Result<ChangeSetResult> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut ctx = ctx;
        let mut attempt: u32 = 1;
        loop {
            tracing::debug!(
                request_id = ctx.request_id.as_str(),
                trace_id = ctx.trace_id.as_ref().map(|t| t.as_str()),
                attempt = attempt,
                "Submitting graph"
            );
            let outcome = submit(conn, self.registry, graph, submitter);
            let retryable = match &outcome {
                Ok(result) => result.is_retryable(),
                Err(e) => e.is_retryable(),
            };
            if !retryable || attempt >= max_attempts {
                return outcome.map_err(|e| e.with_request_id(ctx.request_id.clone()));
            }

            tracing::warn!(
                request_id = ctx.request_id.as_str(),
                trace_id = ctx.trace_id.as_ref().map(|t| t.as_str()),
                attempt = attempt,
                max_attempts = max_attempts,
                "Retryable failure, resubmitting with a fresh change-set"
            );
            std::thread::sleep(Duration::from_millis(
                self.retry.backoff_ms.saturating_mul(u64::from(attempt)),
            ));
            if let Ok(result) = &outcome {
                settle_rejection(conn, result);
            }
            attempt += 1;
            ctx = ctx.next_attempt();
        }
    }
}
