//! Step 1 of spec §4.7: authentication is delegated to an external
//! validator; the Gateway only needs the resulting [`AuthContext`]. The
//! validator here is a minimal shared-secret scheme (spec §9 / SPEC_FULL.md
//! explicitly excludes a real auth/secret backend) so the request path has
//! something concrete to call without pulling in a JWT implementation the
//! teacher itself doesn't carry.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct AuthContext {
    pub tenant_id: String,
    pub expires_at: DateTime<Utc>,
}

impl AuthContext {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

pub trait Authenticator: Send + Sync {
    fn authenticate(&self, bearer_token: Option<&str>) -> Result<AuthContext>;
}

/// `<tenantId>.<expiresAtEpochSecs>.<hex-digest>` where the digest is
/// `SHA-256(tenantId ++ "." ++ expiresAtEpochSecs ++ "." ++ secret)`,
/// truncated to 16 hex characters.
pub struct SharedSecretAuthenticator {
    secret: String,
}

impl SharedSecretAuthenticator {
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }

    fn sign(&self, tenant_id: &str, expires_at: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(tenant_id.as_bytes());
        hasher.update(b".");
        hasher.update(expires_at.to_string().as_bytes());
        hasher.update(b".");
        hasher.update(self.secret.as_bytes());
        let digest = hasher.finalize();
        digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
    }
}

impl Authenticator for SharedSecretAuthenticator {
    fn authenticate(&self, bearer_token: Option<&str>) -> Result<AuthContext> {
        let token = bearer_token.ok_or(Error::AuthInvalidToken)?;
        let mut parts = token.splitn(3, '.');
        let (Some(tenant_id), Some(expires_raw), Some(signature)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::AuthInvalidToken);
        };
        let expires_at_secs: i64 = expires_raw.parse().map_err(|_| Error::AuthInvalidToken)?;
        if self.sign(tenant_id, expires_at_secs) != signature {
            return Err(Error::AuthInvalidToken);
        }
        let expires_at = DateTime::from_timestamp(expires_at_secs, 0).ok_or(Error::AuthInvalidToken)?;
        let ctx = AuthContext {
            tenant_id: tenant_id.to_string(),
            expires_at,
        };
        if ctx.is_expired() {
            return Err(Error::AuthTokenExpired);
        }
        Ok(ctx)
    }
}

/// Rejects any request whose body/path tenant does not match the
/// authenticated tenant (spec §7 `TENANT_ACCESS_DENIED`).
pub fn check_tenant(ctx: &AuthContext, requested_tenant: &str) -> Result<()> {
    if ctx.tenant_id != requested_tenant {
        return Err(Error::TenantAccessDenied);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(auth: &SharedSecretAuthenticator, tenant_id: &str, ttl_secs: i64) -> String {
        let expires_at = Utc::now().timestamp() + ttl_secs;
        format!("{tenant_id}.{expires_at}.{}", auth.sign(tenant_id, expires_at))
    }

    #[test]
    fn valid_token_round_trips() {
        let auth = SharedSecretAuthenticator::new("secret");
        let token = issue(&auth, "acme", 60);
        let ctx = auth.authenticate(Some(&token)).unwrap();
        assert_eq!(ctx.tenant_id, "acme");
    }

    #[test]
    fn missing_token_is_invalid() {
        let auth = SharedSecretAuthenticator::new("secret");
        assert!(matches!(auth.authenticate(None), Err(Error::AuthInvalidToken)));
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let auth = SharedSecretAuthenticator::new("secret");
        let token = issue(&auth, "acme", 60);
        let mut tampered = token.clone();
        tampered.push('0');
        assert!(matches!(auth.authenticate(Some(&tampered)), Err(Error::AuthInvalidToken)));
    }

    #[test]
    fn expired_token_is_rejected() {
        let auth = SharedSecretAuthenticator::new("secret");
        let token = issue(&auth, "acme", -10);
        assert!(matches!(auth.authenticate(Some(&token)), Err(Error::AuthTokenExpired)));
    }

    #[test]
    fn tenant_mismatch_is_denied() {
        let auth = SharedSecretAuthenticator::new("secret");
        let token = issue(&auth, "acme", 60);
        let ctx = auth.authenticate(Some(&token)).unwrap();
        assert!(matches!(check_tenant(&ctx, "other"), Err(Error::TenantAccessDenied)));
    }
}
