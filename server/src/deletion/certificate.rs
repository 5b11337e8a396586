//! Certificate Issuer
//!
//! Produces and validates the signed certificates that attest to a
//! completed, independently verified deletion. The signature is a keyed MAC
//! over the canonical serialization of every non-signature field; the user
//! appears only as a salted one-way hash so the certificate remains usable
//! as proof after the account is gone.

use chrono::Utc;
use uuid::Uuid;

use super::types::{
    CertificateValidationResponse, DeletedDataSummary, DeletionCertificate, VerificationResult,
    CERTIFICATE_COLLECTION,
};
use crate::api::AppState;
use crate::stores::StoreError;
use crate::webhook::signing::{sign_payload, verify_signature};

/// Algorithm tag stored on every certificate.
const SIGNATURE_ALGORITHM: &str = "hmac-sha256";

/// Issuer tag stored on every certificate.
const ISSUED_BY: &str = "stride-privacy-server";

/// Canonical signing payload: the full certificate with the signature field
/// blanked. Struct field order is fixed, so serialization is deterministic.
fn signing_payload(certificate: &DeletionCertificate) -> Result<Vec<u8>, StoreError> {
    let mut unsigned = certificate.clone();
    unsigned.signature = String::new();
    serde_json::to_vec(&unsigned)
        .map_err(|e| StoreError::Backend(format!("certificate serialization: {e}")))
}

/// Issue and persist a certificate for a completed deletion.
/// Returns the certificate id.
pub async fn issue_certificate(
    state: &AppState,
    user_id: &str,
    request_id: &str,
    deleted_data: DeletedDataSummary,
    verification: &VerificationResult,
) -> Result<String, StoreError> {
    let now = Utc::now();
    let certificate_id = format!("cert-{}-{}", now.timestamp(), Uuid::new_v4().simple());

    let mut certificate = DeletionCertificate {
        user_id_hash: state.audit.user_hash(user_id),
        deletion_request_id: request_id.to_string(),
        deleted_at: now,
        deleted_data,
        verification_result: verification.clone(),
        signature: String::new(),
        signature_algorithm: SIGNATURE_ALGORITHM.to_string(),
        issued_at: now,
        issued_by: ISSUED_BY.to_string(),
    };

    let payload = signing_payload(&certificate)?;
    certificate.signature = sign_payload(&state.config.certificate_signing_key, &payload);

    let data = serde_json::to_value(&certificate)
        .map_err(|e| StoreError::Backend(format!("certificate serialization: {e}")))?;
    state
        .docs
        .create(CERTIFICATE_COLLECTION, &certificate_id, data)
        .await?;

    tracing::info!(certificate_id, request_id, "Deletion certificate issued");

    Ok(certificate_id)
}

/// Fetch a certificate and recompute its signature.
///
/// "Not found" and "signature mismatch" are reported distinctly: the first
/// means no such certificate was ever issued, the second is an integrity
/// failure that must never be silently accepted.
pub async fn validate_certificate(
    state: &AppState,
    certificate_id: &str,
) -> Result<CertificateValidationResponse, StoreError> {
    let Some(doc) = state.docs.get(CERTIFICATE_COLLECTION, certificate_id).await? else {
        return Ok(CertificateValidationResponse {
            valid: false,
            certificate: None,
            error: Some("certificate not found".to_string()),
        });
    };

    let certificate: DeletionCertificate = doc.parse()?;
    let payload = signing_payload(&certificate)?;
    let valid = verify_signature(
        &state.config.certificate_signing_key,
        &payload,
        &certificate.signature,
    );

    if !valid {
        tracing::error!(certificate_id, "Certificate signature mismatch");
    }

    Ok(CertificateValidationResponse {
        valid,
        certificate: Some(doc.data),
        error: (!valid).then(|| "signature mismatch".to_string()),
    })
}
