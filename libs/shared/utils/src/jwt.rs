use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use chrono::{Utc, TimeZone};
use tracing::debug;

use shared_config::AppConfig;
use shared_models::auth::{JwtClaims, JwtHeader, User};

type HmacSha256 = Hmac<Sha256>;

/// What a token has to satisfy besides a valid signature.
#[derive(Debug, Clone)]
pub struct TokenRules<'a> {
    pub secret: &'a str,
    pub issuer: &'a str,
    pub audience: &'a str,
}

impl<'a> TokenRules<'a> {
    pub fn from_config(config: &'a AppConfig) -> Self {
        Self {
            secret: &config.jwt_secret,
            issuer: &config.jwt_issuer,
            audience: &config.jwt_audience,
        }
    }
}

pub fn validate_token(token: &str, rules: &TokenRules<'_>) -> Result<User, String> {
    if rules.secret.is_empty() {
        return Err("JWT secret is not set".to_string());
    }

    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err("Invalid token format".to_string());
    }

    let header_b64 = parts[0];
    let claims_b64 = parts[1];
    let signature_b64 = parts[2];

    let header: JwtHeader = decode_segment(header_b64)
        .ok_or_else(|| "Invalid token header".to_string())?;
    if header.alg != "HS256" {
        debug!("Rejecting token signed with {}", header.alg);
        return Err("Unsupported signing algorithm".to_string());
    }

    let signature = match URL_SAFE_NO_PAD.decode(signature_b64) {
        Ok(sig) => sig,
        Err(e) => {
            debug!("Failed to decode signature: {}", e);
            return Err("Invalid signature encoding".to_string());
        }
    };

    let signing_input = format!("{}.{}", header_b64, claims_b64);

    let mut mac = match HmacSha256::new_from_slice(rules.secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return Err("Failed to create HMAC".to_string()),
    };

    mac.update(signing_input.as_bytes());

    if mac.verify_slice(&signature).is_err() {
        debug!("Token signature verification failed");
        return Err("Invalid token signature".to_string());
    }

    let claims: JwtClaims = decode_segment(claims_b64)
        .ok_or_else(|| "Invalid claims format".to_string())?;

    let exp = claims.exp.ok_or_else(|| "Token has no expiry".to_string())?;
    let now = Utc::now().timestamp().max(0) as u64;
    if exp < now {
        debug!("Token expired at {} (now: {})", exp, now);
        return Err("Token expired".to_string());
    }

    if claims.iss.as_deref() != Some(rules.issuer) {
        debug!("Unexpected issuer {:?}", claims.iss);
        return Err("Invalid token issuer".to_string());
    }

    if !claims.has_audience(rules.audience) {
        debug!("Token audience {:?} does not include {}", claims.aud, rules.audience);
        return Err("Invalid token audience".to_string());
    }

    if claims.sub.trim().is_empty() {
        return Err("Token has no subject".to_string());
    }

    let created_at = claims.iat
        .and_then(|timestamp| Utc.timestamp_opt(timestamp as i64, 0).single());

    let user = User {
        id: claims.sub,
        email: claims.email,
        role: claims.role,
        metadata: claims.user_metadata,
        created_at,
    };

    debug!("Token validated successfully for user: {}", user.id);
    Ok(user)
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str) -> Option<T> {
    let bytes = URL_SAFE_NO_PAD.decode(segment).ok()?;
    serde_json::from_slice(&bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{JwtTestUtils, TestUser};

    const SECRET: &str = "unit-test-secret";

    fn rules() -> TokenRules<'static> {
        TokenRules {
            secret: SECRET,
            issuer: "smart-clinic",
            audience: "smart-clinic-services",
        }
    }

    #[test]
    fn test_valid_token_yields_principal() {
        let user = TestUser::patient("p@example.com");
        let token = JwtTestUtils::create_test_token(&user, SECRET, Some(1));

        let principal = validate_token(&token, &rules()).unwrap();
        assert_eq!(principal.id, user.id);
        assert_eq!(principal.role.as_deref(), Some("patient"));
        assert!(principal.created_at.is_some());
    }

    #[test]
    fn test_rejects_bad_tokens() {
        let user = TestUser::default();

        let expired = JwtTestUtils::create_expired_token(&user, SECRET);
        assert_eq!(validate_token(&expired, &rules()).unwrap_err(), "Token expired");

        let forged = JwtTestUtils::create_invalid_signature_token(&user);
        assert_eq!(validate_token(&forged, &rules()).unwrap_err(), "Invalid token signature");

        let malformed = JwtTestUtils::create_malformed_token();
        assert!(validate_token(&malformed, &rules()).is_err());
        assert!(validate_token("only.two", &rules()).is_err());
    }

    #[test]
    fn test_rejects_wrong_issuer_or_audience() {
        let user = TestUser::default();

        let token = JwtTestUtils::create_token_with(&user, SECRET, "someone-else", "smart-clinic-services", 1);
        assert_eq!(validate_token(&token, &rules()).unwrap_err(), "Invalid token issuer");

        let token = JwtTestUtils::create_token_with(&user, SECRET, "smart-clinic", "billing", 1);
        assert_eq!(validate_token(&token, &rules()).unwrap_err(), "Invalid token audience");
    }

    #[test]
    fn test_empty_secret_rejects_everything() {
        let user = TestUser::default();
        let token = JwtTestUtils::create_test_token(&user, SECRET, Some(1));
        let rules = TokenRules { secret: "", ..rules() };
        assert_eq!(validate_token(&token, &rules).unwrap_err(), "JWT secret is not set");
    }
}
