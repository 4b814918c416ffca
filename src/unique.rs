//! Process-unique opaque key generation
//!
//! Session and group identities are short strings such as `RTMPPUB3`,
//! built from a static prefix and a process-wide counter.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a process-unique key with the given prefix
pub fn gen_unique_key(prefix: &str) -> String {
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{}{}", prefix, id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_keys_are_unique() {
        let keys: HashSet<String> = (0..100).map(|_| gen_unique_key("TEST")).collect();
        assert_eq!(keys.len(), 100);
        assert!(keys.iter().all(|k| k.starts_with("TEST")));
    }
}
