//! Host authority: at most one member per room controls playback. All
//! functions here run inside the room's critical section.

use crate::registry::ConnectionId;
use crate::rooms::Room;

/// First member of an empty room takes authority unconditionally.
/// Returns true when the joiner became host.
pub fn elect_on_join(room: &mut Room, connection_id: &str) -> bool {
    if room.host_id.is_none() {
        room.host_id = Some(connection_id.to_string());
        return true;
    }
    false
}

/// Run succession after `departed` was removed from the member list.
///
/// Authority passes to the earliest-joined remaining member, which keeps
/// the choice stable and deterministic across repeated departures. Returns
/// the new host when the departing connection held authority and members
/// remain; a departure of a non-host changes nothing.
pub fn succeed(room: &mut Room, departed: &str) -> Option<ConnectionId> {
    if room.host_id.as_deref() != Some(departed) {
        return None;
    }
    room.host_id = room
        .members
        .first()
        .map(|member| member.connection_id.clone());
    room.host_id.clone()
}

/// Gate for control intents: only the current host may drive playback.
pub fn is_host(room: &Room, connection_id: &str) -> bool {
    room.host_id.as_deref() == Some(connection_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rooms::{Member, Room};

    fn room_with_members(ids: &[&str]) -> Room {
        let mut room = Room::new("abc123".into());
        for id in ids {
            room.members.push(Member {
                connection_id: id.to_string(),
                username: id.to_string(),
            });
        }
        room
    }

    #[test]
    fn first_joiner_takes_authority() {
        let mut room = room_with_members(&["a"]);
        assert!(elect_on_join(&mut room, "a"));
        assert!(is_host(&room, "a"));

        room.members.push(Member {
            connection_id: "b".into(),
            username: "b".into(),
        });
        assert!(!elect_on_join(&mut room, "b"));
        assert!(is_host(&room, "a"));
    }

    #[test]
    fn succession_picks_earliest_joined_survivor() {
        let mut room = room_with_members(&["a", "b", "c"]);
        room.host_id = Some("a".into());

        room.members.retain(|m| m.connection_id != "a");
        let new_host = succeed(&mut room, "a");
        assert_eq!(new_host.as_deref(), Some("b"));
        assert!(is_host(&room, "b"));
    }

    #[test]
    fn non_host_departure_leaves_authority_alone() {
        let mut room = room_with_members(&["a", "b", "c"]);
        room.host_id = Some("a".into());

        room.members.retain(|m| m.connection_id != "c");
        assert_eq!(succeed(&mut room, "c"), None);
        assert!(is_host(&room, "a"));
    }

    #[test]
    fn succession_with_no_survivors_assigns_no_host() {
        let mut room = room_with_members(&["a"]);
        room.host_id = Some("a".into());

        room.members.clear();
        assert_eq!(succeed(&mut room, "a"), None);
        assert_eq!(room.host_id, None);
    }
}
