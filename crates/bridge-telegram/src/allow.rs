//! Allowlist enforcement for the Telegram adapter.
//!
//! Deny-by-default: `ResolvedAgent.allowed_users` holds numeric Telegram
//! user ids (spec.md §6); `BridgeConfig::load` already refuses to start an
//! agent with an empty list, so there is no wildcard/username matching
//! left to do here.

/// Returns `true` when `user_id` appears in `allowed_users`.
pub fn is_allowed(allowed_users: &[i64], user_id: i64) -> bool {
    allowed_users.contains(&user_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_denies_all() {
        assert!(!is_allowed(&[], 111));
    }

    #[test]
    fn matches_listed_id() {
        assert!(is_allowed(&[1, 2, 3], 2));
    }

    #[test]
    fn rejects_unlisted_id() {
        assert!(!is_allowed(&[1, 2, 3], 4));
    }
}
