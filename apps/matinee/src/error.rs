use thiserror::Error;

/// Failure taxonomy for room-store operations. Everything here is
/// recoverable from the client's side; nothing crashes a room.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomError {
    /// Joining an id that does not exist. Reported to the joining client,
    /// which is never added as a member.
    #[error("room not found")]
    RoomNotFound,
}
