mod janitor;
mod server;

pub use janitor::*;
pub use server::*;
