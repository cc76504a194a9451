//! ID generation utilities for probefan
//!
//! Provides functions for generating identifiers for runs and their tasks.

use rand::Rng;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Generate a unique run ID
///
/// Format: `run-{timestamp_ms}-{random_hex}`
/// Example: `run-1738300800123-a1b2c3d4`
pub fn generate_run_id() -> String {
    let timestamp = now_ms();
    let random: u32 = rand::rng().random();
    format!("run-{}-{:08x}", timestamp, random)
}

/// Generate a task ID given its run and position in the batch
///
/// Format: `{run_id}-{index:04}`
pub fn generate_task_id(run_id: &str, index: usize) -> String {
    format!("{}-{:04}", run_id, index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_returns_reasonable_timestamp() {
        let ts = now_ms();
        // Should be after 2020-01-01 and before 2100-01-01
        assert!(ts > 1577836800000);
        assert!(ts < 4102444800000);
    }

    #[test]
    fn test_generate_run_id_format() {
        let id = generate_run_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "run");
        assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(parts[2].len(), 8);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generate_run_id_uniqueness() {
        let id1 = generate_run_id();
        let id2 = generate_run_id();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_generate_task_id_padding() {
        assert_eq!(generate_task_id("run-1", 7), "run-1-0007");
        assert_eq!(generate_task_id("run-1", 12345), "run-1-12345");
    }
}
