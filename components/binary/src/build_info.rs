pub const AUTHOR: &str = env!("CARGO_PKG_AUTHORS");
pub const FULL_VERSION: &str = env!("CARGO_PKG_VERSION");
