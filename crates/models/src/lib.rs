pub mod contact;
pub mod device;
pub mod login_history;
pub mod message;
pub mod token;
pub mod user;

pub use contact::{is_email_valid, is_phone_valid};
pub use device::Device;
pub use login_history::LoginHistory;
pub use message::{DeliveryMethod, Message};
pub use token::{TfaOption, Token, TokenState};
pub use user::User;
