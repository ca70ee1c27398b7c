pub mod account;
pub mod payment;
pub mod server;

pub use account::{Account, AccountStatus};
pub use payment::{NewPayment, Payment};
pub use server::{Server, ServerRef, ServerRefError};
