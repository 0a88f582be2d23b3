mod account;
mod refresh_token;
mod session;

pub use account::*;
pub use refresh_token::*;
pub use session::*;
