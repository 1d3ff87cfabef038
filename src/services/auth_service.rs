use crate::{
    config::AppConfig,
    database::{MongoDB, USERS},
    models::{User, UserInfo, ROLE_ADMIN, ROLE_USER},
    utils::AppError,
};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use mongodb::bson::{doc, oid::ObjectId, DateTime as BsonDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const MIN_PASSWORD_LEN: usize = 8;

// JWT Claims
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String, // user_id
    pub email: String,
    pub roles: Vec<String>,
    pub iat: usize,
    pub exp: usize,
    pub jti: String,
    pub aud: String,
    pub iss: String,
}

impl Claims {
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == ROLE_ADMIN)
    }
}

// Request/Response structures
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct AuthResponse {
    pub success: bool,
    pub token: String,
    pub user: UserInfo,
}

// Generate JWT token
pub fn generate_jwt(config: &AppConfig, user: &User) -> Result<String, AppError> {
    let now = Utc::now();

    let claims = Claims {
        sub: user.user_id.clone(),
        email: user.email.clone(),
        roles: user.roles.clone(),
        iat: now.timestamp() as usize,
        exp: (now + Duration::hours(config.jwt_ttl_hours)).timestamp() as usize,
        jti: Uuid::new_v4().to_string(),
        aud: config.jwt_audience.clone(),
        iss: config.jwt_issuer.clone(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_ref()),
    )
    .map_err(|e| AppError::Internal(format!("Failed to generate token: {}", e)))
}

// Verify JWT token
pub fn verify_token(config: &AppConfig, token: &str) -> Result<Claims, AppError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[config.jwt_audience.as_str()]);
    validation.set_issuer(&[config.jwt_issuer.as_str()]);

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_ref()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| AppError::Unauthorized(format!("Invalid token: {}", e)))
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn is_valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    }
}

fn validate_registration(request: &RegisterRequest) -> Result<String, AppError> {
    let email = normalize_email(&request.email);

    if !is_valid_email(&email) {
        return Err(AppError::InvalidRequest("A valid email is required".to_string()));
    }

    if request.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::InvalidRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    Ok(email)
}

// User registration
pub async fn register(
    db: &MongoDB,
    config: &AppConfig,
    request: &RegisterRequest,
) -> Result<AuthResponse, AppError> {
    let email = validate_registration(request)?;
    let collection = db.collection::<User>(USERS);

    if collection.find_one(doc! { "email": &email }).await?.is_some() {
        return Err(AppError::Conflict("User already exists".to_string()));
    }

    let hashed_password = hash(&request.password, DEFAULT_COST)
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))?;

    let now = BsonDateTime::now();
    let new_user = User {
        id: None,
        user_id: ObjectId::new().to_hex(),
        email: email.clone(),
        password: Some(hashed_password),
        name: request.name.clone(),
        phone: request.phone.clone(),
        roles: vec![ROLE_USER.to_string()],
        is_active: true,
        created_at: Some(now),
        updated_at: Some(now),
        last_login: Some(now),
    };

    collection.insert_one(&new_user).await.map_err(|e| {
        // Lost a race against a concurrent registration
        if e.to_string().contains("E11000") {
            AppError::Conflict("User already exists".to_string())
        } else {
            AppError::from(e)
        }
    })?;

    let token = generate_jwt(config, &new_user)?;

    log::info!("✅ User registered successfully: {}", email);

    Ok(AuthResponse {
        success: true,
        token,
        user: UserInfo::from(new_user),
    })
}

// User login
pub async fn login(
    db: &MongoDB,
    config: &AppConfig,
    request: &LoginRequest,
) -> Result<AuthResponse, AppError> {
    let collection = db.collection::<User>(USERS);
    let email = normalize_email(&request.email);

    let user = collection
        .find_one(doc! { "email": &email })
        .await?
        .ok_or_else(|| AppError::Unauthorized("Invalid credentials".to_string()))?;

    let stored_password = user
        .password
        .as_ref()
        .ok_or_else(|| AppError::Unauthorized("Invalid credentials".to_string()))?;

    let valid = verify(&request.password, stored_password)
        .map_err(|e| AppError::Internal(format!("Password verification error: {}", e)))?;

    if !valid {
        return Err(AppError::Unauthorized("Invalid credentials".to_string()));
    }

    if !user.is_active {
        return Err(AppError::Forbidden("Account is inactive".to_string()));
    }

    collection
        .update_one(
            doc! { "user_id": &user.user_id },
            doc! { "$set": { "last_login": BsonDateTime::now() } },
        )
        .await?;

    let token = generate_jwt(config, &user)?;

    Ok(AuthResponse {
        success: true,
        token,
        user: UserInfo::from(user),
    })
}

pub async fn find_user(db: &MongoDB, user_id: &str) -> Result<User, AppError> {
    db.collection::<User>(USERS)
        .find_one(doc! { "user_id": user_id })
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))
}

// Refresh token
pub async fn refresh_token(
    db: &MongoDB,
    config: &AppConfig,
    claims: &Claims,
) -> Result<AuthResponse, AppError> {
    let user = find_user(db, &claims.sub).await?;

    if !user.is_active {
        return Err(AppError::Forbidden("Account is inactive".to_string()));
    }

    let token = generate_jwt(config, &user)?;

    Ok(AuthResponse {
        success: true,
        token,
        user: UserInfo::from(user),
    })
}

// Get current user
pub async fn get_current_user(db: &MongoDB, user_id: &str) -> Result<UserInfo, AppError> {
    find_user(db, user_id).await.map(UserInfo::from)
}

#[cfg(test)]
pub(crate) fn test_token(config: &AppConfig, user_id: &str, roles: &[&str]) -> String {
    let user = User {
        id: None,
        user_id: user_id.to_string(),
        email: format!("{}@example.com", user_id),
        password: None,
        name: None,
        phone: None,
        roles: roles.iter().map(|r| r.to_string()).collect(),
        is_active: true,
        created_at: None,
        updated_at: None,
        last_login: None,
    };
    generate_jwt(config, &user).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jwt_roundtrip_keeps_roles() {
        let config = AppConfig::for_tests();
        let token = test_token(&config, "owner-1", &["user", "admin"]);
        let claims = verify_token(&config, &token).unwrap();
        assert_eq!(claims.sub, "owner-1");
        assert!(claims.is_admin());
        assert_eq!(claims.iss, "qr-presence");
    }

    #[test]
    fn test_jwt_rejects_other_secret() {
        let config = AppConfig::for_tests();
        let token = test_token(&config, "owner-1", &["user"]);

        let mut other = AppConfig::for_tests();
        other.jwt_secret = "rotated".into();
        assert!(matches!(verify_token(&other, &token), Err(AppError::Unauthorized(_))));
    }

    #[test]
    fn test_jwt_rejects_other_audience() {
        let config = AppConfig::for_tests();
        let token = test_token(&config, "owner-1", &["user"]);

        let mut other = AppConfig::for_tests();
        other.jwt_audience = "someone-else".into();
        assert!(verify_token(&other, &token).is_err());
    }

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("owner@cafe.in"));
        assert!(!is_valid_email("owner@cafe"));
        assert!(!is_valid_email("@cafe.in"));
        assert!(!is_valid_email("owner cafe@x.in"));
        assert!(!is_valid_email("owner.cafe.in"));
    }

    #[test]
    fn test_registration_normalizes_email_and_checks_password() {
        let request = RegisterRequest {
            email: "  Owner@Cafe.IN ".into(),
            password: "longenough".into(),
            name: None,
            phone: None,
        };
        assert_eq!(validate_registration(&request).unwrap(), "owner@cafe.in");

        let short = RegisterRequest { password: "short".into(), ..request };
        assert!(matches!(validate_registration(&short), Err(AppError::InvalidRequest(_))));
    }
}
