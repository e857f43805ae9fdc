/// Reads an on/off environment switch. Empty, `0`, `false`, `off` and `no`
/// (any case) mean off; any other value means on.
pub fn env_toggle_enabled(raw: &str) -> bool {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return false;
    }
    !["0", "false", "off", "no"]
        .iter()
        .any(|off| trimmed.eq_ignore_ascii_case(off))
}
