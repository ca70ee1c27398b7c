pub mod admin;
pub mod callback;
pub mod command;
