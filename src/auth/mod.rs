pub mod password;

pub use password::{PasswordCheck, PasswordHash};
