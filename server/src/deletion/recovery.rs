//! Recovery Code Manager
//!
//! Issues, verifies and expires the short-lived numeric codes that let a
//! user abort a scheduled deletion. At most one pending code per user is
//! valid at a time; issuing a new one invalidates all earlier pending codes.
//! Codes are never physically deleted - the trail of verified, expired and
//! invalidated codes is part of the audit record.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde_json::json;
use uuid::Uuid;

use super::error::DeletionError;
use super::types::{
    is_expired, DeletionRequest, DeletionStatus, RecoveryCode, RecoveryCodeStatus,
    DELETION_REQUEST_COLLECTION, RECOVERY_CODE_COLLECTION,
};
use crate::audit::{AuditTrail, MutationRecord};
use crate::stores::{DocRef, DocumentStore, FieldFilter, QueryOptions, StoreError, WriteOp};

/// A freshly issued code. The plaintext code exists only here and in the
/// notification email; lookups are by `(email, code)` equality.
#[derive(Debug)]
pub struct IssuedCode {
    pub code_id: String,
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

/// Why verification did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyFailure {
    WrongCode,
    Expired,
    NoPendingCode,
}

/// Outcome of a verification attempt.
#[derive(Debug)]
pub enum VerifyOutcome {
    Valid {
        code_id: String,
        user_id: String,
        deletion_request_id: Option<String>,
    },
    Invalid {
        reason: VerifyFailure,
        remaining_attempts: Option<u32>,
    },
}

/// Issues and checks recovery codes against the document store.
#[derive(Clone)]
pub struct RecoveryCodeManager {
    docs: Arc<dyn DocumentStore>,
    audit: AuditTrail,
    ttl_minutes: i64,
    max_attempts: u32,
}

impl RecoveryCodeManager {
    pub fn new(
        docs: Arc<dyn DocumentStore>,
        audit: AuditTrail,
        ttl_minutes: i64,
        max_attempts: u32,
    ) -> Self {
        Self {
            docs,
            audit,
            ttl_minutes,
            max_attempts,
        }
    }

    /// Uniformly distributed six-digit code, zero-padded.
    fn generate_code() -> String {
        format!("{:06}", rand::thread_rng().gen_range(0..1_000_000u32))
    }

    /// Issue a new code for a user, invalidating every earlier pending code.
    pub async fn issue(
        &self,
        user_id: &str,
        email: &str,
        deletion_request_id: Option<&str>,
        ip_address: Option<&str>,
    ) -> Result<IssuedCode, DeletionError> {
        let pending = self
            .docs
            .query(
                RECOVERY_CODE_COLLECTION,
                &[
                    FieldFilter::eq("user_id", user_id),
                    FieldFilter::eq("status", "pending"),
                ],
                QueryOptions::default(),
            )
            .await?;

        if !pending.is_empty() {
            let ops = pending
                .iter()
                .map(|doc| WriteOp::Patch {
                    doc: DocRef::new(RECOVERY_CODE_COLLECTION, &doc.id),
                    data: json!({ "status": "invalidated" }),
                })
                .collect();
            self.docs.transact(ops).await?;
        }

        let code_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let record = RecoveryCode {
            user_id: user_id.to_string(),
            email: email.to_lowercase(),
            code: Self::generate_code(),
            status: RecoveryCodeStatus::Pending,
            attempts: 0,
            max_attempts: self.max_attempts,
            created_at: now,
            expires_at: now + Duration::minutes(self.ttl_minutes),
            deletion_request_id: deletion_request_id.map(ToString::to_string),
        };
        let data = serde_json::to_value(&record)
            .map_err(|e| DeletionError::Validation(format!("code serialization: {e}")))?;
        self.docs
            .create(RECOVERY_CODE_COLLECTION, &code_id, data)
            .await?;

        self.audit
            .record(
                user_id,
                ip_address,
                MutationRecord::succeeded(
                    "recovery_code_issued",
                    "recovery_code",
                    Some(code_id.clone()),
                ),
            )
            .await;

        Ok(IssuedCode {
            code_id,
            code: record.code,
            expires_at: record.expires_at,
        })
    }

    /// Check a submitted code.
    ///
    /// An exact `(email, code, pending)` match verifies the code; the
    /// verification itself counts as one attempt. On a mismatch the most
    /// recent pending code for that email is charged an attempt, and
    /// reaching the attempt cap invalidates it. Expiry is evaluated lazily
    /// here; the hygiene sweep is not needed for correctness.
    pub async fn verify(&self, email: &str, code: &str) -> Result<VerifyOutcome, StoreError> {
        let email = email.to_lowercase();
        let exact = self
            .docs
            .query(
                RECOVERY_CODE_COLLECTION,
                &[
                    FieldFilter::eq("email", &email),
                    FieldFilter::eq("code", code),
                    FieldFilter::eq("status", "pending"),
                ],
                QueryOptions::limit(1),
            )
            .await?;

        let now = Utc::now();

        if let Some(doc) = exact.into_iter().next() {
            let record: RecoveryCode = doc.parse()?;

            if is_expired(&record, now) {
                self.docs
                    .update(RECOVERY_CODE_COLLECTION, &doc.id, json!({ "status": "expired" }))
                    .await?;
                return Ok(VerifyOutcome::Invalid {
                    reason: VerifyFailure::Expired,
                    remaining_attempts: None,
                });
            }

            self.docs
                .update(
                    RECOVERY_CODE_COLLECTION,
                    &doc.id,
                    json!({ "status": "verified", "attempts": record.attempts + 1 }),
                )
                .await?;

            return Ok(VerifyOutcome::Valid {
                code_id: doc.id,
                user_id: record.user_id,
                deletion_request_id: record.deletion_request_id,
            });
        }

        // Wrong code: charge the attempt to the newest pending code.
        let newest = self
            .docs
            .query(
                RECOVERY_CODE_COLLECTION,
                &[
                    FieldFilter::eq("email", &email),
                    FieldFilter::eq("status", "pending"),
                ],
                QueryOptions::latest_first("created_at").with_limit(1),
            )
            .await?;

        let Some(doc) = newest.into_iter().next() else {
            return Ok(VerifyOutcome::Invalid {
                reason: VerifyFailure::NoPendingCode,
                remaining_attempts: None,
            });
        };

        let record: RecoveryCode = doc.parse()?;

        if is_expired(&record, now) {
            self.docs
                .update(RECOVERY_CODE_COLLECTION, &doc.id, json!({ "status": "expired" }))
                .await?;
            return Ok(VerifyOutcome::Invalid {
                reason: VerifyFailure::Expired,
                remaining_attempts: None,
            });
        }

        let attempts = record.attempts + 1;
        let exhausted = attempts >= record.max_attempts;
        let patch = if exhausted {
            json!({ "attempts": attempts, "status": "invalidated" })
        } else {
            json!({ "attempts": attempts })
        };
        self.docs
            .update(RECOVERY_CODE_COLLECTION, &doc.id, patch)
            .await?;

        Ok(VerifyOutcome::Invalid {
            reason: VerifyFailure::WrongCode,
            remaining_attempts: Some(record.max_attempts.saturating_sub(attempts)),
        })
    }

    /// Verify a code and, on success, atomically cancel the associated
    /// scheduled deletion and clear the user's deletion flag.
    ///
    /// Any failure leaves every record untouched and maps to a descriptive
    /// error: bad/expired code, no matching schedule, or deadline passed.
    pub async fn recover_account(
        &self,
        email: &str,
        code: &str,
        ip_address: Option<&str>,
    ) -> Result<(String, DeletionRequest), DeletionError> {
        let outcome = self.verify(email, code).await?;

        let (user_id, request_id) = match outcome {
            VerifyOutcome::Valid {
                user_id,
                deletion_request_id,
                ..
            } => (user_id, deletion_request_id),
            VerifyOutcome::Invalid {
                reason: VerifyFailure::Expired,
                ..
            } => return Err(DeletionError::CodeExpired),
            VerifyOutcome::Invalid {
                remaining_attempts, ..
            } => {
                return Err(DeletionError::CodeInvalid { remaining_attempts });
            }
        };

        let (request_id, request_doc) = match request_id {
            Some(id) => {
                let doc = self
                    .docs
                    .get(DELETION_REQUEST_COLLECTION, &id)
                    .await?
                    .ok_or(DeletionError::NoActiveSchedule)?;
                (id, doc)
            }
            None => {
                // Codes issued on demand carry no request link; find the
                // user's scheduled request.
                let scheduled = self
                    .docs
                    .query(
                        DELETION_REQUEST_COLLECTION,
                        &[
                            FieldFilter::eq("user_id", &user_id),
                            FieldFilter::eq("status", DeletionStatus::Scheduled.as_str()),
                        ],
                        QueryOptions::latest_first("requested_at").with_limit(1),
                    )
                    .await?;
                let doc = scheduled
                    .into_iter()
                    .next()
                    .ok_or(DeletionError::NoActiveSchedule)?;
                (doc.id.clone(), doc)
            }
        };

        let request: DeletionRequest = request_doc.parse()?;
        let now = Utc::now();

        if !request.recoverable_at(now) {
            return Err(match request.status {
                DeletionStatus::Scheduled | DeletionStatus::Processing | DeletionStatus::Completed => {
                    DeletionError::DeadlinePassed
                }
                _ => DeletionError::NoActiveSchedule,
            });
        }

        // Single transaction, guarded on the status field: if the sweep has
        // started processing in the meantime, nothing is changed.
        let cancel = self
            .docs
            .transact(vec![
                WriteOp::PatchIf {
                    doc: DocRef::new(DELETION_REQUEST_COLLECTION, &request_id),
                    guard_field: "status".to_string(),
                    expected: DeletionStatus::Scheduled.as_str().to_string(),
                    data: json!({ "status": DeletionStatus::Cancelled.as_str(), "can_recover": false }),
                },
                WriteOp::Patch {
                    doc: DocRef::new("users", &request.user_id),
                    data: json!({
                        "deletion_scheduled_at": null,
                        "deletion_request_id": null,
                    }),
                },
            ])
            .await;

        match cancel {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => return Err(DeletionError::DeadlinePassed),
            Err(e) => return Err(e.into()),
        }

        self.audit
            .record(
                &request.user_id,
                ip_address,
                MutationRecord::succeeded(
                    "deletion_cancelled",
                    "deletion_request",
                    Some(request_id.clone()),
                )
                .with_values(
                    Some(json!({ "status": "scheduled" })),
                    Some(json!({ "status": "cancelled" })),
                ),
            )
            .await;

        tracing::info!(
            request_id,
            "Scheduled deletion cancelled via recovery code"
        );

        let recovered = DeletionRequest {
            status: DeletionStatus::Cancelled,
            can_recover: false,
            ..request
        };
        Ok((request_id, recovered))
    }

    /// Hygiene sweep: mark long-expired pending codes `expired`.
    pub async fn sweep_expired(&self) {
        let due = match self
            .docs
            .query(
                RECOVERY_CODE_COLLECTION,
                &[
                    FieldFilter::eq("status", "pending"),
                    FieldFilter::before("expires_at", Utc::now()),
                ],
                QueryOptions::default(),
            )
            .await
        {
            Ok(due) => due,
            Err(e) => {
                tracing::warn!(error = %e, "Recovery code sweep query failed");
                return;
            }
        };

        let mut swept = 0usize;
        for doc in due {
            match self
                .docs
                .update(RECOVERY_CODE_COLLECTION, &doc.id, json!({ "status": "expired" }))
                .await
            {
                Ok(()) => swept += 1,
                Err(e) => {
                    tracing::warn!(code_id = %doc.id, error = %e, "Failed to expire recovery code");
                }
            }
        }

        if swept > 0 {
            tracing::debug!(count = swept, "Expired stale recovery codes");
        }
    }
}
