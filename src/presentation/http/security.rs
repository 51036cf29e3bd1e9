use poem::{Error as PoemError, Result as PoemResult, http::StatusCode};
use poem_openapi::SecurityScheme;
use poem_openapi::auth::Bearer;

/// Bearer scheme carrying the deployment-wide API secret. Callers are
/// services (CRUD layer, provider hooks, operators), not end users, so a
/// single shared token is the whole auth model.
#[derive(SecurityScheme)]
#[oai(ty = "bearer")]
pub struct ApiKeyAuth(pub Bearer);

impl ApiKeyAuth {
    pub fn verify(&self, secret: &str) -> PoemResult<()> {
        if constant_time_eq(self.0.token.as_bytes(), secret.as_bytes()) {
            Ok(())
        } else {
            Err(PoemError::from_string(
                "invalid api token",
                StatusCode::UNAUTHORIZED,
            ))
        }
    }
}

/// Comparison that does not short-circuit on the first mismatching byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compares_whole_token() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secre"));
        assert!(!constant_time_eq(b"", b"secret"));
    }
}
