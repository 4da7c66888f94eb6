pub const FULL: &str = concat!(env!("CARGO_PKG_VERSION"), "+git.", env!("KLAUNCHER_GIT_SHA"));
