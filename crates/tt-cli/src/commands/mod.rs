//! CLI command implementations

mod config;
mod connect;
mod profiles;
mod secret;
mod status;

pub use config::{config_init, config_path, config_show};
pub use connect::connect_command;
pub use profiles::profiles_command;
pub use secret::{secret_list, secret_set};
pub use status::status_command;
