pub mod base;
pub mod fred;
pub mod wrds;

pub use base::RemoteSource;
pub use fred::FredSource;
pub use wrds::{ScopedSession, WrdsCredentials, WrdsSession, WrdsSource};
