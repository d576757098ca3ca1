//! Authenticated end-user identity.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::identifiers::UserId;

// ============================================================================
// Identity
// ============================================================================

/// The end user a session is opened for.
///
/// Supplied by the host application and immutable for a session's
/// lifetime. A different [`UserId`] is a different identity, never an
/// update of this one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Backend user id.
    pub id: UserId,

    /// Display name.
    pub name: String,

    /// Avatar reference (URL).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl Identity {
    /// Creates an identity without an avatar.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            image: None,
        }
    }

    /// Sets the avatar reference.
    #[inline]
    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let identity = Identity::new("u1", "Ada").with_image("https://cdn/ada.png");
        let json = serde_json::to_value(&identity).unwrap();
        assert_eq!(json["id"], "u1");
        assert_eq!(json["name"], "Ada");
        assert_eq!(json["image"], "https://cdn/ada.png");
    }

    #[test]
    fn test_image_omitted_when_absent() {
        let json = serde_json::to_value(Identity::new("u1", "Ada")).unwrap();
        assert!(json.get("image").is_none());
    }
}
