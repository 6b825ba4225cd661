//! Build-info strings for `--version` and `--buildinfo`.

/// Crate version baked in at build time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The full build-info block printed by `--buildinfo`.
#[must_use]
pub fn build_info() -> String {
    let profile = if cfg!(debug_assertions) {
        "debug"
    } else {
        "release"
    };
    format!(
        "netdbg {VERSION}\nplatform: {} {}\nprofile: {profile}",
        std::env::consts::OS,
        std::env::consts::ARCH,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_info_names_the_version() {
        let info = build_info();
        assert!(info.starts_with("netdbg "));
        assert!(info.contains(VERSION));
        assert!(info.contains("platform:"));
    }
}
