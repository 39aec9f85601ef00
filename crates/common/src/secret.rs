//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports [`secrecy`] so every crate in the workspace names the same
//! types. `SecretString` implements `Debug` with redaction, so a struct that
//! derives `Debug` and holds a credential or a connection string stays safe
//! to pass to `tracing` fields. Values are zeroized on drop.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct Account {
//!     user_id: String,
//!     credential: SecretString,
//! }
//!
//! let account = Account {
//!     user_id: "alice".to_string(),
//!     credential: SecretString::from("hunter2"),
//! };
//!
//! assert!(!format!("{account:?}").contains("hunter2"));
//! assert_eq!(account.credential.expose_secret(), "hunter2");
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("postgres://qa:pw@db/qa");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("pw@db"));
    }

    #[test]
    fn test_deserialized_credential_stays_redacted() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct Signup {
            user_id: String,
            credential: SecretString,
        }

        let json = r#"{"user_id": "bob", "credential": "my-secret-value"}"#;
        let signup: Signup = serde_json::from_str(json).expect("deserialize");

        assert_eq!(signup.credential.expose_secret(), "my-secret-value");
        let debug = format!("{signup:?}");
        assert!(debug.contains("bob"));
        assert!(!debug.contains("my-secret-value"));
    }
}
