use std::fmt;

use veil_core::confession::TextError;
use veil_core::protocol::ErrorKind;

/// Failures from room-scope operations, mapped to stable protocol kinds
/// at the gateway boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomError {
    NotFound,
    Inactive,
    BadPassword,
    Full,
    NotHost,
    NotInRoom,
    CodeExhaustion,
    GameInProgress,
    /// Confession text or chat text failed validation.
    Text(TextError),
    /// An unrevealed confession already exists for this player.
    AlreadyConfessed,
    /// The confession was already revealed and is immutable.
    Revealed,
    /// No confession to update or fetch.
    NoConfession,
}

impl RoomError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound => ErrorKind::NotFound,
            Self::Inactive => ErrorKind::Inactive,
            Self::BadPassword => ErrorKind::BadPassword,
            Self::Full => ErrorKind::Full,
            Self::NotHost => ErrorKind::NotHost,
            Self::NotInRoom => ErrorKind::NotInRoom,
            Self::CodeExhaustion => ErrorKind::CodeExhaustion,
            Self::GameInProgress => ErrorKind::GameInProgress,
            Self::Text(_) | Self::AlreadyConfessed | Self::Revealed | Self::NoConfession => {
                ErrorKind::Validation
            },
        }
    }
}

impl fmt::Display for RoomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => f.write_str("room not found"),
            Self::Inactive => f.write_str("room is no longer active"),
            Self::BadPassword => f.write_str("wrong password"),
            Self::Full => f.write_str("room is full"),
            Self::NotHost => f.write_str("host-only operation"),
            Self::NotInRoom => f.write_str("not a member of this room"),
            Self::CodeExhaustion => f.write_str("could not allocate a room code"),
            Self::GameInProgress => f.write_str("a game is already running"),
            Self::Text(e) => e.fmt(f),
            Self::AlreadyConfessed => f.write_str("an unrevealed confession already exists"),
            Self::Revealed => f.write_str("confession is already revealed"),
            Self::NoConfession => f.write_str("no confession submitted"),
        }
    }
}

impl From<TextError> for RoomError {
    fn from(e: TextError) -> Self {
        Self::Text(e)
    }
}

/// Failures from the matchmaker's host-driven start path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchError {
    NotFound,
    NotInRoom,
    NotHost,
    GameInProgress,
    NotEnoughReady,
    NoGamesAvailable,
}

impl MatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound => ErrorKind::NotFound,
            Self::NotInRoom => ErrorKind::NotInRoom,
            Self::NotHost => ErrorKind::NotHost,
            Self::GameInProgress => ErrorKind::GameInProgress,
            Self::NotEnoughReady => ErrorKind::NotEnoughReady,
            Self::NoGamesAvailable => ErrorKind::NoGamesAvailable,
        }
    }
}

impl fmt::Display for MatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind().as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_errors_map_to_protocol_kinds() {
        assert_eq!(RoomError::NotFound.kind(), ErrorKind::NotFound);
        assert_eq!(RoomError::NotHost.kind(), ErrorKind::NotHost);
        assert_eq!(RoomError::AlreadyConfessed.kind(), ErrorKind::Validation);
        assert_eq!(
            RoomError::Text(TextError::TooShort { min: 10, len: 3 }).kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn match_errors_map_to_protocol_kinds() {
        assert_eq!(MatchError::NotEnoughReady.kind(), ErrorKind::NotEnoughReady);
        assert_eq!(
            MatchError::NoGamesAvailable.kind(),
            ErrorKind::NoGamesAvailable
        );
    }
}
