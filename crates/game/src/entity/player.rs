use glam::IVec2;

use crate::ConnectionId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsernameError {
    #[error("username must not be empty")]
    Empty,
    #[error("username may only contain lowercase letters, digits, '_' and '-' (found {0:?})")]
    InvalidChar(char),
}

pub fn validate_username(username: &str) -> Result<(), UsernameError> {
    if username.is_empty() {
        return Err(UsernameError::Empty);
    }
    match username
        .chars()
        .find(|c| !matches!(c, 'a'..='z' | '0'..='9' | '_' | '-'))
    {
        Some(c) => Err(UsernameError::InvalidChar(c)),
        None => Ok(()),
    }
}

#[derive(Debug, Clone, Default)]
pub struct Player {
    username: String,
    pub display_name: String,
    /// Pending movement, consumed by the next simulation step.
    pub intent: IVec2,
    pub connection: Option<ConnectionId>,
    pub ping_dirty: bool,
    pub highlighted: bool,
}

impl Player {
    pub fn new(username: String, display_name: String) -> Self {
        Self {
            username,
            display_name,
            ..Default::default()
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

// Only the replicated fields take part in equality.
impl PartialEq for Player {
    fn eq(&self, other: &Self) -> bool {
        self.username == other.username
            && self.display_name == other.display_name
            && self.intent == other.intent
    }
}

impl Eq for Player {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_validation() {
        assert_eq!(validate_username("alice_01"), Ok(()));
        assert_eq!(validate_username("bob-the-builder"), Ok(()));
        assert_eq!(
            validate_username("Alice"),
            Err(UsernameError::InvalidChar('A'))
        );
        assert_eq!(
            validate_username("a b"),
            Err(UsernameError::InvalidChar(' '))
        );
        assert_eq!(validate_username(""), Err(UsernameError::Empty));
        assert_eq!(
            validate_username("zoë"),
            Err(UsernameError::InvalidChar('ë'))
        );
    }

    #[test]
    fn test_local_flags_ignored_by_equality() {
        let a = Player::new("alice".into(), "Alice".into());
        let mut b = a.clone();
        b.connection = Some(4);
        b.ping_dirty = true;
        b.highlighted = true;
        assert_eq!(a, b);

        b.display_name = "Al".into();
        assert_ne!(a, b);

        let mut c = a.clone();
        c.intent = IVec2::X;
        assert_ne!(a, c);
    }
}
