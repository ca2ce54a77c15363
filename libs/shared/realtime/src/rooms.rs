use rand::{distributions::Alphanumeric, Rng};
use uuid::Uuid;

pub fn chat_room(conversation_id: Uuid) -> String {
    format!("chat_{}", conversation_id)
}

/// Personal room shared by the notification stream and the call socket; the
/// callee-ring delivery targets this room.
pub fn user_room(user_id: Uuid) -> String {
    format!("user_{}", user_id)
}

/// Fresh signaling room for one call attempt. The random suffix keeps two
/// attempts against the same record from ever sharing a room.
pub fn call_room(call_id: Uuid) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("call_{}_{}", call_id, suffix)
}

pub fn is_call_room(name: &str) -> bool {
    name.starts_with("call_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_names_are_scoped_by_kind() {
        let id = Uuid::new_v4();
        assert_eq!(chat_room(id), format!("chat_{}", id));
        assert_eq!(user_room(id), format!("user_{}", id));
    }

    #[test]
    fn call_rooms_are_unique_per_attempt() {
        let id = Uuid::new_v4();
        let first = call_room(id);
        let second = call_room(id);

        assert!(is_call_room(&first));
        assert!(first.starts_with(&format!("call_{}_", id)));
        assert_ne!(first, second, "suffix must differ between attempts");
    }
}
