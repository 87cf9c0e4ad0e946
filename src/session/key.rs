// ABOUTME: Session identity: the (exercise, participant) pair and the container name derived from it

use std::fmt;

/// Identifies one REPL session: which coding exercise, which participant.
///
/// Docker restricts container names to lower case, and the container name is
/// the only durable record of a session's identity, so the key is normalized
/// to lower case at construction. Registry lookups and container naming can
/// therefore never disagree about case.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    exercise: String,
    participant: String,
}

impl SessionKey {
    pub fn new(exercise: &str, participant: &str) -> Self {
        Self {
            exercise: exercise.to_lowercase(),
            participant: participant.to_lowercase(),
        }
    }

    pub fn exercise(&self) -> &str {
        &self.exercise
    }

    pub fn participant(&self) -> &str {
        &self.participant
    }

    /// Deterministic name for the session's backend container.
    ///
    /// The name doubles as the idempotency token: a second create for the
    /// same key collides on this name in the container runtime's namespace.
    pub fn container_name(&self, prefix: &str) -> String {
        format!("{}-{}-{}", prefix, self.exercise, self.participant)
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.exercise, self.participant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn container_name_is_prefixed_and_joined_with_dashes() {
        let key = SessionKey::new("bowling", "lion");
        assert_eq!(
            key.container_name("cyber-dojo-repl-container-python"),
            "cyber-dojo-repl-container-python-bowling-lion"
        );
    }

    #[test]
    fn key_is_normalized_to_lower_case() {
        let shouty = SessionKey::new("Bowling", "LION");
        let quiet = SessionKey::new("bowling", "lion");
        assert_eq!(shouty, quiet);
        assert_eq!(
            shouty.container_name("repl"),
            "repl-bowling-lion"
        );
    }

    #[test]
    fn display_joins_with_slash() {
        let key = SessionKey::new("bowling", "lion");
        assert_eq!(key.to_string(), "bowling/lion");
    }
}
