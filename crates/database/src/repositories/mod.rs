pub mod devices;
pub mod login_history;
pub mod users;
