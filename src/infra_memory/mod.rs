//! Single-process adapters. They back the `memory` store settings and the
//! test suite; atomicity holds within one process only.

mod account_repo_memory;
mod refresh_token_store_memory;

pub use account_repo_memory::*;
pub use refresh_token_store_memory::*;
