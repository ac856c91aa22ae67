//! User-Agent string sent with every session pool request.

use std::sync::OnceLock;

static USER_AGENT: OnceLock<String> = OnceLock::new();

/// Returns the client identification string, computed once per process.
///
/// Format: `name/version (Language=Rust; os; arch)`.
pub fn user_agent() -> &'static str {
    USER_AGENT.get_or_init(|| {
        format!(
            "{}/{} (Language=Rust; {}; {})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            std::env::consts::OS,
            std::env::consts::ARCH
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn includes_package_and_platform() {
        assert_eq!(
            user_agent(),
            format!(
                "dynamic-sessions-mcp/{} (Language=Rust; {}; {})",
                env!("CARGO_PKG_VERSION"),
                std::env::consts::OS,
                std::env::consts::ARCH
            )
        );
    }

    #[test]
    fn is_cached() {
        assert!(std::ptr::eq(user_agent(), user_agent()));
    }
}
