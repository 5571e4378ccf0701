pub mod cargo_env {
    pub const CARGO_PKG_NAME: &str = env!("CARGO_PKG_NAME");
    pub const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");
}

pub mod common {
    pub const DEFAULT_CALLBACK_BIND: &str = "127.0.0.1:4567";
    pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
    pub const CALLBACK_PATH: &str = "/callback/";
    pub const ENV_PREFIX: &str = "HARNESS";
}
