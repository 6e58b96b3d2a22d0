//! Human-facing booking protocol numbers: local `yyyyMMddHHmmss` followed by
//! a three-digit random suffix, e.g. `20250314093012417`.

use chrono::{DateTime, Local, TimeZone};
use rand::Rng;

use crate::model::Ms;

pub const PROTOCOL_LEN: usize = 17;

pub(crate) fn generate(at: Ms, rng: &mut impl Rng) -> String {
    let local: DateTime<Local> = Local
        .timestamp_millis_opt(at)
        .single()
        .unwrap_or_else(Local::now);
    format!("{}{}", local.format("%Y%m%d%H%M%S"), rng.gen_range(100..1000))
}

/// Shape check used before hitting the index on lookups.
pub fn looks_like_protocol(s: &str) -> bool {
    s.len() == PROTOCOL_LEN && s.bytes().all(|b| b.is_ascii_digit())
}
