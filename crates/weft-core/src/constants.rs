//! Package-level constants.

/// Current version of the weft runtime (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name.
pub const NAME: &str = "weft";

/// Directory under `$HOME` holding user-level weft files.
pub const HOME_DIR_NAME: &str = ".weft";
