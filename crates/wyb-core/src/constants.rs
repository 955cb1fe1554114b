//! Package-level constants and protocol defaults.

/// Current version of the dashboard (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name.
pub const NAME: &str = "wyb";

/// Default time allowed for the WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Default time a request waits for its reply frame.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;

/// Close code for a clean, intentional shutdown. Never retried.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code reported when the socket dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Close code reported when a close frame carried no status.
pub const CLOSE_NO_STATUS: u16 = 1005;

/// Reason sent with the close frame on `disconnect()`.
pub const CLIENT_CLOSE_REASON: &str = "Client disconnected";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_semver() {
        let parts: Vec<&str> = VERSION.split('.').collect();
        assert_eq!(parts.len(), 3, "VERSION must be semver (MAJOR.MINOR.PATCH)");
        for part in parts {
            let _: u32 = part.parse().expect("each semver segment must be a number");
        }
    }

    #[test]
    fn name_is_lowercase() {
        assert_eq!(NAME, NAME.to_lowercase());
    }

    #[test]
    fn request_timeout_shorter_than_connect_timeout() {
        assert!(DEFAULT_REQUEST_TIMEOUT_MS < DEFAULT_CONNECT_TIMEOUT_MS);
    }
}
