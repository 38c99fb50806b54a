use uuid::Uuid;

/// Generate a short identifier used to correlate the log lines of one proxy session
/// Format: first 8 hex characters of a UUID v4
pub fn generate_session_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_session_id_format() {
        let id = generate_session_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(id.chars().all(|c| !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_generate_session_id_uniqueness() {
        let mut ids = HashSet::new();

        // 8 hex chars leave plenty of room for a thousand draws
        for _ in 0..1000 {
            ids.insert(generate_session_id());
        }
        assert!(ids.len() > 990);
    }
}
