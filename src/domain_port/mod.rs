// store

mod refresh_token_store;
mod store_error;

pub use refresh_token_store::*;
pub use store_error::*;

// repo

mod account_repo;

pub use account_repo::*;
