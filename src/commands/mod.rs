pub mod accounts;
pub mod credentials;
pub mod init;
pub mod safety;
pub mod utils;
