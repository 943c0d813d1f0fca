pub mod error;
pub mod manager;
pub mod repositories;

pub use error::{DatabaseError, Result};
pub use manager::{DatabaseConfig, RepositoryManager};
pub use repositories::{
    devices::DeviceRepository, login_history::LoginHistoryRepository, users::UserRepository,
};
