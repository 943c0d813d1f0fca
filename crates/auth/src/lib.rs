pub mod error;
pub mod messaging;
pub mod otp;
pub mod password;
pub mod token;
pub mod webauthn;

pub use error::{AuthError, Result};
pub use messaging::consumer::{MessageConsumer, Messenger};
pub use messaging::email::{EmailConfig, SmtpEmail};
pub use messaging::publisher::MessagePublisher;
pub use messaging::repo::MessageRepo;
pub use messaging::sms::{SmsConfig, TwilioSms};
pub use otp::{OtpConfig, OtpService};
pub use password::{PasswordConfig, PasswordService};
pub use token::{OtpMarker, TokenConfig, TokenService, CLIENT_ID_COOKIE};
pub use webauthn::{WebauthnConfig, WebauthnService};
