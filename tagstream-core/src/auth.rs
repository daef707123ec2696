//! Credential digest for the LocalSense authentication handshake.
//!
//! The server issues a per-deployment salt out of band; the client proves
//! knowledge of the password by sending
//! `hex( md5( hex(md5(password)) || salt ) )`. The inner digest joins the
//! salt in its lowercase hex rendering, not as raw bytes.

use md5::{Digest, Md5};

/// Credentials carried by the auth frame.
///
/// Unconfigured fields default to empty strings; the auth frame is always
/// sent, matching servers that run with authentication disabled.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub salt: String,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        salt: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            salt: salt.into(),
        }
    }

    /// The digest string sent on the wire for these credentials.
    pub fn digest(&self) -> String {
        password_digest(&self.password, &self.salt)
    }
}

/// Compute the wire digest: lowercase hex of `md5(hex(md5(password)) || salt)`.
///
/// Deterministic: identical inputs always produce identical output.
pub fn password_digest(password: &str, salt: &str) -> String {
    let inner = hex_lower(&Md5::digest(password.as_bytes()));
    let mut outer = Md5::new();
    outer.update(inner.as_bytes());
    outer.update(salt.as_bytes());
    hex_lower(&outer.finalize())
}

fn hex_lower(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic() {
        let a = password_digest("p", "s");
        let b = password_digest("p", "s");
        assert_eq!(a, b);
    }

    #[test]
    fn digest_matches_known_vector() {
        // md5("s3cret") = 33e1b232a4e6fa0028a6670753749a17;
        // md5("33e1b232a4e6fa0028a6670753749a17mine") pins the result.
        assert_eq!(
            password_digest("s3cret", "mine"),
            "8773804a5e0f764ee376ab8b69da378b"
        );
        assert_eq!(
            password_digest("p", "s"),
            "7c26f24cd9c2825515fd7480e99c3c2b"
        );
    }

    #[test]
    fn digest_is_lowercase_hex_of_md5_width() {
        let d = password_digest("secret", "salt-1");
        assert_eq!(d.len(), 32);
        assert!(d.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(d, d.to_lowercase());
    }

    #[test]
    fn digest_depends_on_both_inputs() {
        let base = password_digest("secret", "salt-1");
        assert_ne!(base, password_digest("secret", "salt-2"));
        assert_ne!(base, password_digest("Secret", "salt-1"));
    }

    #[test]
    fn empty_credentials_still_digest() {
        let d = Credentials::default().digest();
        assert_eq!(d.len(), 32);
    }

    #[test]
    fn salting_is_not_plain_concatenation() {
        // Moving characters between password and salt must change the
        // digest, because the password is hashed before the salt joins.
        assert_ne!(password_digest("ab", "c"), password_digest("a", "bc"));
    }
}
