use crate::error::{AuthError, Result};
use crate::otp::{hash_with_expiry, split_hash, OtpService, OTP_VALIDITY_SECS};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha512};
use stepauth_cache::{otp_key, revocation_key, Cache};
use stepauth_database::{RepositoryManager, UserRepository};
use stepauth_models::{DeliveryMethod, TfaOption, Token, TokenState, User};
use subtle::ConstantTimeEq;
use uuid::Uuid;

/// Name of the cookie carrying the plaintext client ID.
pub const CLIENT_ID_COOKIE: &str = "CLIENTID";

/// Record of an issued OTP code, kept until the code is consumed or
/// expires. The address is the delivery target, which for contact
/// verification may not yet be on the user's profile.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct OtpMarker {
    pub hash: String,
    pub address: String,
}

#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub issuer: String,
    pub audience: String,
    pub secret: String,
    pub expires_in_secs: i64,
    pub refresh_expires_in_secs: i64,
    pub cookie_domain: String,
    pub cookie_max_age: i64,
}

impl TokenConfig {
    pub fn from_env() -> Self {
        let issuer = std::env::var("TOKEN_ISSUER").unwrap_or_else(|_| "stepauth".to_string());
        Self {
            audience: issuer.clone(),
            issuer,
            secret: std::env::var("TOKEN_SECRET").unwrap_or_default(),
            expires_in_secs: std::env::var("TOKEN_EXPIRES_IN_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20 * 60),
            refresh_expires_in_secs: std::env::var("TOKEN_REFRESH_EXPIRES_IN_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(15 * 24 * 60 * 60),
            cookie_domain: std::env::var("API_COOKIE_DOMAIN").unwrap_or_default(),
            cookie_max_age: std::env::var("API_COOKIE_MAX_AGE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(605_800),
        }
    }
}

/// Mints, signs, validates, revokes, and refreshes bearer tokens.
///
/// A token is only honored when presented together with the plaintext
/// client ID it was minted for; the ID travels in a cookie while the token
/// carries its SHA-512 digest. Revocation markers live in Redis under a
/// TTL equal to the remaining token lifetime.
#[derive(Clone)]
pub struct TokenService {
    config: TokenConfig,
    cache: Cache,
    otp: OtpService,
    repo: RepositoryManager,
}

impl TokenService {
    pub fn new(
        config: TokenConfig,
        cache: Cache,
        otp: OtpService,
        repo: RepositoryManager,
    ) -> Self {
        Self {
            config,
            cache,
            otp,
            repo,
        }
    }

    /// Mint a token for a user. The plaintext client ID and refresh key
    /// ride on the returned struct for out-of-band delivery.
    pub fn create(&self, user: &User, state: TokenState) -> Result<Token> {
        self.create_with_options(user, state, user.tfa_options())
    }

    fn create_with_options(
        &self,
        user: &User,
        state: TokenState,
        tfa_options: Vec<TfaOption>,
    ) -> Result<Token> {
        let now = Utc::now().timestamp();
        let client_id = random_key();
        let refresh_key = random_key();
        let refresh_expires_at = now + self.config.refresh_expires_in_secs;

        Ok(Token {
            jti: Uuid::new_v4().to_string(),
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
            iat: now,
            exp: now + self.config.expires_in_secs,
            client_id_hash: sha512_hex(&client_id),
            client_id,
            user_id: user.id,
            email: user.email.clone().unwrap_or_default(),
            phone: user.phone.clone().unwrap_or_default(),
            state,
            code_hash: None,
            code: None,
            otp_method: None,
            otp_address: None,
            refresh_hash: hash_with_expiry(&refresh_key, refresh_expires_at),
            refresh_key: Some(refresh_key),
            tfa_options,
        })
    }

    /// Mint a token carrying an OTP code hash for the user's address on
    /// the given delivery method.
    pub async fn create_with_otp(
        &self,
        user: &User,
        state: TokenState,
        method: DeliveryMethod,
    ) -> Result<Token> {
        let address = user
            .address(method)
            .ok_or_else(|| {
                AuthError::BadRequest(format!("user has no {} address configured", method))
            })?
            .to_string();

        self.create_with_otp_to_address(user, state, method, &address)
            .await
    }

    /// Mint a token carrying an OTP code hash for an arbitrary address,
    /// used when verifying a candidate contact address. The issued code is
    /// recorded so it can be consumed exactly once.
    pub async fn create_with_otp_to_address(
        &self,
        user: &User,
        state: TokenState,
        method: DeliveryMethod,
        address: &str,
    ) -> Result<Token> {
        let mut token = self.create(user, state)?;
        let (code, hash) = self.issue_otp(user, method, address).await?;

        token.code = Some(code);
        token.code_hash = Some(hash);
        token.otp_method = Some(method);
        token.otp_address = Some(address.to_string());

        Ok(token)
    }

    /// Generate an OTP code for a user and record its single-use marker.
    /// Newer codes supersede older ones for the same delivery method.
    pub async fn issue_otp(
        &self,
        user: &User,
        method: DeliveryMethod,
        address: &str,
    ) -> Result<(String, String)> {
        let (code, hash) = self.otp.otp_code()?;

        self.cache
            .set(
                &otp_key(&user.id.to_string(), method.as_str()),
                &OtpMarker {
                    hash: hash.clone(),
                    address: address.to_string(),
                },
                Some(OTP_VALIDITY_SECS as u64),
            )
            .await?;

        Ok((code, hash))
    }

    /// The marker for the latest code issued to a user over a method, if
    /// one is still outstanding.
    pub async fn issued_code(
        &self,
        user_id: Uuid,
        method: DeliveryMethod,
    ) -> Result<Option<OtpMarker>> {
        let marker = self
            .cache
            .get(&otp_key(&user_id.to_string(), method.as_str()))
            .await?;
        Ok(marker)
    }

    /// Consume the issued-code marker for a user and delivery method.
    /// Fails when the code was already used or superseded; at most one
    /// caller can win the consumption.
    pub async fn consume_otp(
        &self,
        user_id: Uuid,
        method: DeliveryMethod,
        hash: &str,
    ) -> Result<OtpMarker> {
        let stored: Option<OtpMarker> = self
            .cache
            .take(&otp_key(&user_id.to_string(), method.as_str()))
            .await?;

        match stored {
            Some(marker) if marker.hash == hash => Ok(marker),
            _ => Err(AuthError::InvalidCode("code is no longer valid".to_string())),
        }
    }

    /// Create a signed JWT string from a token.
    pub fn sign(&self, token: &Token) -> Result<String> {
        sign_with_secret(token, &self.config.secret)
    }

    /// Verify that a signed token was issued by us, is unexpired,
    /// unrevoked, and presented by the client it was minted for.
    pub async fn validate(&self, signed: &str, client_id: &str) -> Result<Token> {
        let token = decode_with_secret(
            signed,
            &self.config.secret,
            &self.config.issuer,
            &self.config.audience,
            true,
            client_id,
        )?;

        self.check_revocation(&token.jti).await?;
        Ok(token)
    }

    /// Like `validate`, but accepts an expired access token. Used only by
    /// the refresh flow, where the refresh window embedded in the token
    /// governs validity instead of the access expiry.
    pub async fn validate_for_refresh(&self, signed: &str, client_id: &str) -> Result<Token> {
        let token = decode_with_secret(
            signed,
            &self.config.secret,
            &self.config.issuer,
            &self.config.audience,
            false,
            client_id,
        )?;

        self.check_revocation(&token.jti).await?;
        Ok(token)
    }

    async fn check_revocation(&self, token_id: &str) -> Result<()> {
        if self.cache.exists(&revocation_key(token_id)).await? {
            return Err(AuthError::InvalidToken("token has been revoked".to_string()));
        }
        Ok(())
    }

    /// Revoke a token for a duration, which should equal its remaining
    /// lifetime.
    pub async fn revoke(&self, token_id: &str, duration_secs: u64) -> Result<()> {
        self.cache
            .set(&revocation_key(token_id), &true, Some(duration_secs.max(1)))
            .await?;
        Ok(())
    }

    /// A secure cookie carrying the plaintext client ID for a token.
    pub fn cookie(&self, token: &Token) -> String {
        format!(
            "{}={}; Path=/; Domain={}; Max-Age={}; Secure; HttpOnly; SameSite=Strict",
            CLIENT_ID_COOKIE, token.client_id, self.config.cookie_domain, self.config.cookie_max_age,
        )
    }

    /// Issue a replacement token. The supplied refresh key must match the
    /// hash embedded in the old token and its window must not have
    /// elapsed; the access-token expiry itself is irrelevant here. The new
    /// token is always `authorized` with the user's current default TFA
    /// claims.
    pub async fn refresh(&self, token: &Token, refresh_key: &str) -> Result<Token> {
        verify_refresh_key(&token.refresh_hash, refresh_key)?;

        let user = UserRepository::by_id(self.repo.pool(), token.user_id).await?;
        self.create(&user, TokenState::Authorized)
    }
}

fn random_key() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn sha512_hex(value: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

pub(crate) fn sign_with_secret(token: &Token, secret: &str) -> Result<String> {
    let signed = encode(
        &Header::new(Algorithm::HS512),
        token,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;
    Ok(signed)
}

pub(crate) fn decode_with_secret(
    signed: &str,
    secret: &str,
    issuer: &str,
    audience: &str,
    validate_exp: bool,
    client_id: &str,
) -> Result<Token> {
    let mut validation = Validation::new(Algorithm::HS512);
    validation.set_issuer(&[issuer]);
    validation.set_audience(&[audience]);
    validation.validate_exp = validate_exp;

    let data = decode::<Token>(
        signed,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;
    let token = data.claims;

    let presented = sha512_hex(client_id);
    if !bool::from(
        presented
            .as_bytes()
            .ct_eq(token.client_id_hash.as_bytes()),
    ) {
        return Err(AuthError::InvalidToken(
            "token source could not be verified".to_string(),
        ));
    }

    Ok(token)
}

/// Check a refresh key against the embedded hash; the window encoded in
/// the hash must not have elapsed.
pub(crate) fn verify_refresh_key(refresh_hash: &str, refresh_key: &str) -> Result<()> {
    let (digest, expires_at) = split_hash(refresh_hash)
        .map_err(|_| AuthError::InvalidToken("token has no refresh claim".to_string()))?;

    if Utc::now().timestamp() >= expires_at {
        return Err(AuthError::InvalidToken(
            "refresh window has elapsed".to_string(),
        ));
    }

    let expected = hash_with_expiry(refresh_key, expires_at);
    let (expected_digest, _) = split_hash(&expected)?;

    if bool::from(expected_digest.as_bytes().ct_eq(digest.as_bytes())) {
        Ok(())
    } else {
        Err(AuthError::InvalidToken("invalid refresh key".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const SECRET: &str = "test-signing-secret";
    const ISSUER: &str = "stepauth";

    fn claims(state: TokenState) -> Token {
        let now = Utc::now().timestamp();
        let client_id = random_key();
        let refresh_key = random_key();

        Token {
            jti: Uuid::new_v4().to_string(),
            iss: ISSUER.to_string(),
            aud: ISSUER.to_string(),
            iat: now,
            exp: now + 1200,
            client_id_hash: sha512_hex(&client_id),
            client_id,
            user_id: Uuid::new_v4(),
            email: "jane@example.com".to_string(),
            phone: String::new(),
            state,
            code_hash: None,
            code: None,
            otp_method: None,
            otp_address: None,
            refresh_hash: hash_with_expiry(&refresh_key, now + 3600),
            refresh_key: Some(refresh_key),
            tfa_options: vec![TfaOption::OtpEmail],
        }
    }

    #[test]
    fn test_sign_validate_round_trip() {
        let token = claims(TokenState::Authorized);
        let signed = sign_with_secret(&token, SECRET).unwrap();

        let decoded =
            decode_with_secret(&signed, SECRET, ISSUER, ISSUER, true, &token.client_id).unwrap();

        assert_eq!(decoded.jti, token.jti);
        assert_eq!(decoded.user_id, token.user_id);
        assert_eq!(decoded.state, TokenState::Authorized);
        assert_eq!(decoded.tfa_options, vec![TfaOption::OtpEmail]);
        // Plaintext material never survives the round trip.
        assert!(decoded.client_id.is_empty());
        assert!(decoded.refresh_key.is_none());
    }

    #[test]
    fn test_wrong_client_id_rejected() {
        let token = claims(TokenState::Authorized);
        let signed = sign_with_secret(&token, SECRET).unwrap();

        let err = decode_with_secret(&signed, SECRET, ISSUER, ISSUER, true, "someone-else")
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = claims(TokenState::Authorized);
        let signed = sign_with_secret(&token, SECRET).unwrap();

        assert!(
            decode_with_secret(&signed, "other-secret", ISSUER, ISSUER, true, &token.client_id)
                .is_err()
        );
    }

    #[test]
    fn test_expired_token_rejected_unless_refreshing() {
        let mut token = claims(TokenState::Authorized);
        token.exp = Utc::now().timestamp() - 120;
        let signed = sign_with_secret(&token, SECRET).unwrap();

        assert!(
            decode_with_secret(&signed, SECRET, ISSUER, ISSUER, true, &token.client_id).is_err()
        );
        // The refresh path tolerates access-token expiry.
        assert!(
            decode_with_secret(&signed, SECRET, ISSUER, ISSUER, false, &token.client_id).is_ok()
        );
    }

    #[test]
    fn test_refresh_key_verification() {
        let token = claims(TokenState::Authorized);
        let key = token.refresh_key.clone().unwrap();

        assert!(verify_refresh_key(&token.refresh_hash, &key).is_ok());
        assert!(verify_refresh_key(&token.refresh_hash, "forged").is_err());
    }

    #[test]
    fn test_elapsed_refresh_window_rejected() {
        let refresh_key = random_key();
        let stale = hash_with_expiry(&refresh_key, Utc::now().timestamp() - 1);

        let err = verify_refresh_key(&stale, &refresh_key).unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }
}
