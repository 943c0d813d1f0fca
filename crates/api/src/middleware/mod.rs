pub mod auth;
pub mod rate_limit;

pub use auth::{authenticate, require_auth, require_pre_auth};
pub use rate_limit::{
    rate_limit_contact, rate_limit_device, rate_limit_login, rate_limit_signup,
    rate_limit_token, rate_limit_totp, rate_limit_verify,
};
