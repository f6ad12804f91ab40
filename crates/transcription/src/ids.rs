use uuid::Uuid;

/// Generates a request/connection task ID: 32 lowercase hex chars.
pub fn new_task_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Generates a per-frame message ID in the same format.
pub fn new_message_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_ids_are_hex32() {
        let id = new_task_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, new_task_id());
    }
}
