use std::path::PathBuf;

use parlor_types::Identity;
use tracing::warn;

/// Where compose finds the user to send as. Read on every send, never cached.
pub trait IdentitySource {
    fn current(&self) -> Option<Identity>;
}

impl IdentitySource for Option<Identity> {
    fn current(&self) -> Option<Identity> {
        self.clone()
    }
}

impl<T: IdentitySource + ?Sized> IdentitySource for Box<T> {
    fn current(&self) -> Option<Identity> {
        (**self).current()
    }
}

/// Identity persisted by a login flow as `{"userId": .., "userName": ..}`.
#[derive(Debug, Clone)]
pub struct IdentityFile {
    path: PathBuf,
}

impl IdentityFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl IdentitySource for IdentityFile {
    fn current(&self) -> Option<Identity> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Identity file {} unreadable: {}", self.path.display(), e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(identity) => Some(identity),
            Err(e) => {
                warn!("Identity file {} is malformed: {}", self.path.display(), e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_is_reread() {
        let path = std::env::temp_dir().join(format!("parlor_identity_{}.json", std::process::id()));
        let source = IdentityFile::new(&path);

        let _ = std::fs::remove_file(&path);
        assert_eq!(source.current(), None);

        std::fs::write(&path, r#"{"userId":"7","userName":"Alice"}"#).unwrap();
        assert_eq!(source.current(), Some(Identity::new(7, "Alice")));

        std::fs::write(&path, r#"{"userId":8,"userName":"Bob"}"#).unwrap();
        assert_eq!(source.current(), Some(Identity::new(8, "Bob")));

        std::fs::write(&path, "not json").unwrap();
        assert_eq!(source.current(), None);

        let _ = std::fs::remove_file(&path);
    }
}
