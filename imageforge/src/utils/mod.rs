//! Utility functions for id generation and timestamp handling.

mod ids;
pub mod timestamps;

pub use ids::{generate_build_id, id_prefix};
pub use timestamps::{format_iso8601, iso_timestamp, now_utc, parse_iso8601, Timestamp};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_build_id_is_uuid_v4() {
        let id = generate_build_id();
        let parsed = uuid::Uuid::parse_str(&id).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
    }

    #[test]
    fn test_iso_timestamp_format() {
        let ts = iso_timestamp();
        assert!(ts.contains('T'));
        assert!(ts.contains(':'));
    }
}
