use uuid::Uuid;

/// Generate a new alert identifier (hyphenless UUID v4).
pub fn next_id() -> String {
    Uuid::new_v4().simple().to_string()
}
