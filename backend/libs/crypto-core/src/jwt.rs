/// Shared JWT module for chat services
///
/// Tokens are signed with EdDSA (Ed25519). Every service that issues or checks
/// tokens goes through this module so there is exactly one algorithm and one
/// claim layout in the system.
///
/// ## Security Design
///
/// - **EdDSA ONLY**: validation pins the algorithm, HS256/RS256 tokens are rejected
/// - **No hardcoded keys**: keys come from configuration at startup
/// - **Thread-safe**: keys loaded once at startup, immutable thereafter
///
/// ## Usage
///
/// Services must call `initialize_jwt_keys()` during startup before any JWT operations:
///
/// ```rust,ignore
/// use crypto_core::jwt;
///
/// let private_key = std::fs::read_to_string("jwt_ed25519.pem")?;
/// let public_key = std::fs::read_to_string("jwt_ed25519.pub.pem")?;
/// jwt::initialize_jwt_keys(&private_key, &public_key)?;
///
/// let token = jwt::generate_token(user_id, "alice")?;
/// let claims = jwt::validate_token(&token)?.claims;
/// ```
use anyhow::{anyhow, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, Algorithm, DecodingKey, EncodingKey, Header, TokenData, Validation,
};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Constants
// ============================================================================

pub const TOKEN_EXPIRY_HOURS: i64 = 24;

const JWT_ALGORITHM: Algorithm = Algorithm::EdDSA;

// ============================================================================
// Data Structures
// ============================================================================

/// JWT claims issued at login
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID as UUID string)
    pub sub: String,
    /// Username at the time of login
    pub username: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

// ============================================================================
// Key Storage
// ============================================================================

static JWT_ENCODING_KEY: OnceCell<EncodingKey> = OnceCell::new();
static JWT_DECODING_KEY: OnceCell<DecodingKey> = OnceCell::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize JWT keys from PEM-formatted strings
///
/// MUST be called during application startup before any JWT operations.
/// Can only be called once - subsequent calls will return an error.
///
/// ## Arguments
///
/// * `private_key_pem` - Ed25519 private key in PKCS#8 PEM format (token generation)
/// * `public_key_pem` - Ed25519 public key in SPKI PEM format (token validation)
pub fn initialize_jwt_keys(private_key_pem: &str, public_key_pem: &str) -> Result<()> {
    let encoding_key = EncodingKey::from_ed_pem(private_key_pem.as_bytes())
        .map_err(|e| anyhow!("Failed to parse Ed25519 private key: {e}"))?;

    let decoding_key = DecodingKey::from_ed_pem(public_key_pem.as_bytes())
        .map_err(|e| anyhow!("Failed to parse Ed25519 public key: {e}"))?;

    JWT_ENCODING_KEY
        .set(encoding_key)
        .map_err(|_| anyhow!("JWT encoding key already initialized"))?;

    JWT_DECODING_KEY
        .set(decoding_key)
        .map_err(|_| anyhow!("JWT decoding key already initialized"))?;

    Ok(())
}

/// Initialize JWT keys for validation-only processes
///
/// Login is unavailable in such a process; `generate_token` returns an error.
pub fn initialize_jwt_validation_only(public_key_pem: &str) -> Result<()> {
    let decoding_key = DecodingKey::from_ed_pem(public_key_pem.as_bytes())
        .map_err(|e| anyhow!("Failed to parse Ed25519 public key: {e}"))?;

    JWT_DECODING_KEY
        .set(decoding_key)
        .map_err(|_| anyhow!("JWT decoding key already initialized"))?;

    Ok(())
}

fn get_encoding_key() -> Result<&'static EncodingKey> {
    JWT_ENCODING_KEY.get().ok_or_else(|| {
        anyhow!("JWT signing key not initialized. Call initialize_jwt_keys() during startup.")
    })
}

fn get_decoding_key() -> Result<&'static DecodingKey> {
    JWT_DECODING_KEY
        .get()
        .ok_or_else(|| anyhow!("JWT keys not initialized. Call initialize_jwt_keys() or initialize_jwt_validation_only() during startup."))
}

// ============================================================================
// Token Generation
// ============================================================================

/// Generate a login token valid for `TOKEN_EXPIRY_HOURS`
pub fn generate_token(user_id: Uuid, username: &str) -> Result<String> {
    let now = Utc::now();
    let expiry = now + Duration::hours(TOKEN_EXPIRY_HOURS);

    let claims = Claims {
        sub: user_id.to_string(),
        username: username.to_string(),
        iat: now.timestamp(),
        exp: expiry.timestamp(),
    };

    sign_claims(&claims)
}

/// Sign an arbitrary claim set with the process key
pub fn sign_claims(claims: &Claims) -> Result<String> {
    let encoding_key = get_encoding_key()?;
    encode(&Header::new(JWT_ALGORITHM), claims, encoding_key)
        .map_err(|e| anyhow!("Failed to generate token: {e}"))
}

// ============================================================================
// Token Validation
// ============================================================================

/// Validate and decode a JWT token
///
/// ## Errors
///
/// Returns error if:
/// - Token signature is invalid or the algorithm is not EdDSA
/// - Token is expired
/// - Token format is malformed
/// - Keys not initialized
pub fn validate_token(token: &str) -> Result<TokenData<Claims>> {
    let decoding_key = get_decoding_key()?;

    let mut validation = Validation::new(JWT_ALGORITHM);
    validation.validate_exp = true;

    decode::<Claims>(token, decoding_key, &validation)
        .map_err(|e| anyhow!("Token validation failed: {e}"))
}

/// Extract user ID from a validated token
pub fn get_user_id_from_token(token: &str) -> Result<Uuid> {
    let token_data = validate_token(token)?;
    Uuid::parse_str(&token_data.claims.sub)
        .map_err(|e| anyhow!("Invalid user ID format in token: {e}"))
}

// ============================================================================
// Tests
// ============================================================================
