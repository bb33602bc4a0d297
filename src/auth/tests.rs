use super::*;
use axum::http::HeaderMap;
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};

fn headers_with(value: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("authorization", value.parse().unwrap());
    headers
}

mod extract_bearer_token_tests {
    use super::*;

    #[test]
    fn valid_bearer_token() {
        let headers = headers_with("Bearer abc.def.ghi");
        assert_eq!(extract_bearer_token(&headers).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn valid_bearer_token_with_extra_whitespace() {
        let headers = headers_with("Bearer   abc.def.ghi  ");
        assert_eq!(extract_bearer_token(&headers).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn case_insensitive_bearer() {
        let headers = headers_with("bearer abc.def.ghi");
        assert_eq!(extract_bearer_token(&headers).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn missing_authorization_header() {
        let headers = HeaderMap::new();
        assert_eq!(extract_bearer_token(&headers), Err(TokenError::Missing));
    }

    #[test]
    fn empty_authorization_header() {
        let headers = headers_with("");
        assert_eq!(extract_bearer_token(&headers), Err(TokenError::InvalidFormat));
    }

    #[test]
    fn missing_bearer_prefix() {
        let headers = headers_with("abc.def.ghi");
        assert_eq!(extract_bearer_token(&headers), Err(TokenError::InvalidFormat));
    }

    #[test]
    fn wrong_scheme() {
        let headers = headers_with("Basic dXNlcjpwYXNz");
        assert_eq!(extract_bearer_token(&headers), Err(TokenError::InvalidFormat));
    }

    #[test]
    fn empty_token() {
        let headers = headers_with("Bearer    ");
        assert_eq!(extract_bearer_token(&headers), Err(TokenError::Empty));
    }
}

mod verifier_tests {
    use super::*;

    const SECRET: &str = "test-signing-secret";

    fn sign(claims: &IdTokenClaims, secret: &str) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims(sub: &str, email: Option<&str>, exp_offset: Duration) -> IdTokenClaims {
        IdTokenClaims {
            sub: sub.to_string(),
            email: email.map(str::to_string),
            exp: (Utc::now() + exp_offset).timestamp(),
        }
    }

    #[tokio::test]
    async fn jwt_valid_token() {
        let verifier = JwtIdentityVerifier::new(SECRET);
        let token = sign(&claims("u1", Some("u1@example.com"), Duration::hours(1)), SECRET);

        let identity = verifier.verify(&token).await.unwrap();
        assert_eq!(identity.subject, "u1");
        assert_eq!(identity.email.as_deref(), Some("u1@example.com"));
    }

    #[tokio::test]
    async fn jwt_without_email() {
        let verifier = JwtIdentityVerifier::new(SECRET);
        let token = sign(&claims("u1", None, Duration::hours(1)), SECRET);

        let identity = verifier.verify(&token).await.unwrap();
        assert!(identity.email.is_none());
    }

    #[tokio::test]
    async fn jwt_wrong_secret_rejected() {
        let verifier = JwtIdentityVerifier::new(SECRET);
        let token = sign(&claims("u1", None, Duration::hours(1)), "other-secret");

        let result = verifier.verify(&token).await;
        assert!(matches!(result, Err(IdentityError::InvalidToken)));
    }

    #[tokio::test]
    async fn jwt_expired_rejected() {
        let verifier = JwtIdentityVerifier::new(SECRET);
        let token = sign(&claims("u1", None, -Duration::hours(1)), SECRET);

        let result = verifier.verify(&token).await;
        assert!(matches!(result, Err(IdentityError::Expired)));
    }

    #[tokio::test]
    async fn jwt_garbage_rejected() {
        let verifier = JwtIdentityVerifier::new(SECRET);
        let result = verifier.verify("not-a-jwt").await;
        assert!(matches!(result, Err(IdentityError::InvalidToken)));
    }

    #[tokio::test]
    async fn static_verifier_lookup() {
        let verifier = StaticIdentityVerifier::new();
        verifier.insert("dev-token", "u1", None);

        let identity = verifier.verify("dev-token").await.unwrap();
        assert_eq!(identity.subject, "u1");
        assert!(matches!(
            verifier.verify("unknown").await,
            Err(IdentityError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn authenticate_maps_missing_header() {
        let verifier = StaticIdentityVerifier::new();
        let result = authenticate(&HeaderMap::new(), &verifier).await;
        assert!(matches!(
            result,
            Err(IdentityError::Token(TokenError::Missing))
        ));
    }

    #[tokio::test]
    async fn authenticate_valid_header() {
        let verifier = StaticIdentityVerifier::new();
        verifier.insert("dev-token", "u1", Some("u1@example.com"));

        let identity = authenticate(&headers_with("Bearer dev-token"), &verifier)
            .await
            .unwrap();
        assert_eq!(identity.subject, "u1");
    }
}
