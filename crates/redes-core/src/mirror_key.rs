/// Prefix shared by every locally allocated mirror key.
pub const MIRROR_KEY_PREFIX: &str = "RED-";

/// Allocates a mirror key for a ticket that arrived without one.
///
/// Keys are derived from the allocation instant, so two tickets created in
/// the same second share a key. Mirror keys are correlation hints, not
/// identifiers; the primary key stays the single source of uniqueness.
pub fn allocate_mirror_key(now_unix: u64) -> String {
    format!("{MIRROR_KEY_PREFIX}{now_unix}")
}

/// Returns true when `candidate` looks like a locally allocated mirror key.
pub fn is_mirror_key(candidate: &str) -> bool {
    match candidate.strip_prefix(MIRROR_KEY_PREFIX) {
        Some(rest) if !rest.is_empty() => rest.bytes().all(|byte| byte.is_ascii_digit()),
        _ => false,
    }
}
