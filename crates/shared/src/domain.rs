use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub i64);
    };
}

id_newtype!(UserId);
id_newtype!(GroupId);
id_newtype!(MessageId);

/// Identity snapshot supplied by the auth layer with the login event.
/// The realtime core trusts it as-is and treats it as immutable for the
/// lifetime of the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    pub photo_url: String,
    pub bio: String,
}

impl UserProfile {
    /// A login with any empty field is dropped, not an error.
    pub fn is_complete(&self) -> bool {
        !self.username.is_empty() && !self.photo_url.is_empty() && !self.bio.is_empty()
    }
}

/// Order-independent identity of a 1:1 chat thread: the participant pair is
/// sorted on construction, so A→B and B→A resolve to the same thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadKey {
    low: UserId,
    high: UserId,
}

impl ThreadKey {
    pub fn new(a: UserId, b: UserId) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    pub fn low(&self) -> UserId {
        self.low
    }

    pub fn high(&self) -> UserId {
        self.high
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_key_is_order_independent() {
        assert_eq!(
            ThreadKey::new(UserId(7), UserId(3)),
            ThreadKey::new(UserId(3), UserId(7))
        );
    }

    #[test]
    fn thread_key_accepts_self_pair() {
        let key = ThreadKey::new(UserId(5), UserId(5));
        assert_eq!(key.low(), UserId(5));
        assert_eq!(key.high(), UserId(5));
    }

    #[test]
    fn profile_with_empty_field_is_incomplete() {
        let profile = UserProfile {
            id: UserId(1),
            username: "ada".into(),
            photo_url: String::new(),
            bio: "hi".into(),
        };
        assert!(!profile.is_complete());
    }
}
