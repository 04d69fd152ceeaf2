//! The Security Gate (§4.5): bearer-token authentication, permission
//! checks, inter-worker message signing, and the audit trail.

pub mod audit;
pub mod auth;
pub mod envelope;
pub mod permissions;

pub use audit::{AuditLog, AuditRecord, Severity};
pub use auth::{AuthError, Claims, Principal, TokenVerifier};
pub use envelope::{EnvelopeError, SigningEnvelope};
pub use permissions::is_authorized;

/// Ties token verification, authorization, and audit logging into the
/// single entry point Ingress calls on every handshake and every
/// dispatch.
pub struct SecurityGate {
    verifier: TokenVerifier,
    audit: AuditLog,
}

impl SecurityGate {
    pub fn new(verifier: TokenVerifier, audit: AuditLog) -> Self {
        Self { verifier, audit }
    }

    pub fn from_env() -> Result<Self, AuthError> {
        Ok(Self::new(TokenVerifier::from_env()?, AuditLog::in_memory()))
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Authenticate an inbound connection from its `Authorization` header.
    pub fn authenticate(&self, header_value: Option<&str>) -> Result<Principal, AuthError> {
        match self.verifier.verify_header(header_value) {
            Ok(principal) => {
                self.audit.record(
                    "auth.success",
                    &principal.name,
                    Severity::Info,
                    serde_json::json!({}),
                );
                Ok(principal)
            }
            Err(e) => {
                self.audit.record(
                    "auth.failure",
                    "unknown",
                    Severity::Warning,
                    serde_json::json!({"reason": e.to_string()}),
                );
                Err(e)
            }
        }
    }

    /// Authorize a principal to perform `operation` against `target`.
    pub fn authorize(&self, principal: &Principal, operation: &str, target: Option<&str>) -> bool {
        let allowed = is_authorized(&principal.permissions, operation, target);
        self.audit.record(
            if allowed { "authz.allow" } else { "authz.deny" },
            &principal.name,
            if allowed { Severity::Info } else { Severity::Warning },
            serde_json::json!({"operation": operation, "target": target}),
        );
        allowed
    }
}
