use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

use crate::secret::constant_time_eq;

/// Connection password for the cleartext startup handshake.
#[derive(Debug)]
pub struct CourtAuthSource {
    password: String,
}

impl CourtAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for CourtAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

/// Gate in front of the administrative export.
///
/// With no secret configured the export is disabled for everyone.
#[derive(Debug, Clone)]
pub struct AdminGate {
    secret: Option<String>,
}

impl AdminGate {
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.secret.is_some()
    }

    pub fn verify(&self, supplied: &str) -> bool {
        match &self.secret {
            Some(secret) => constant_time_eq(secret.as_bytes(), supplied.as_bytes()),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_accepts_only_exact_secret() {
        let gate = AdminGate::new(Some("s3cret".into()));
        assert!(gate.enabled());
        assert!(gate.verify("s3cret"));
        assert!(!gate.verify("s3cret "));
        assert!(!gate.verify("S3CRET"));
        assert!(!gate.verify(""));
    }

    #[test]
    fn gate_without_secret_rejects_everything() {
        let gate = AdminGate::new(None);
        assert!(!gate.enabled());
        assert!(!gate.verify(""));
        assert!(!gate.verify("anything"));
    }

    #[test]
    fn empty_secret_disables_gate() {
        let gate = AdminGate::new(Some(String::new()));
        assert!(!gate.enabled());
        assert!(!gate.verify(""));
    }
}
