use rand::{Rng, distributions::Alphanumeric, thread_rng};

/// Length of the access credential minted for teams and members.
pub const ACCESS_KEY_LEN: usize = 32;

/// Uniform six digit code over the full 000000..=999999 range.
pub fn generate_otp_code() -> String {
    let code: u32 = thread_rng().gen_range(0..1_000_000);
    format!("{code:06}")
}

pub fn generate_access_key(len: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Sequential public team id, e.g. `HACK2026-007`.
pub fn format_team_id(prefix: &str, seq: i64) -> String {
    format!("{prefix}-{seq:03}")
}
