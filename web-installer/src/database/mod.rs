pub mod connection;
pub mod migrations;
pub mod schema_installer;
pub mod users;
