//! Hard limits on input sizes. Requests beyond these fail with `LimitExceeded`.

pub const MAX_OPPORTUNITIES: usize = 100_000;
pub const MAX_SLOTS_PER_OPPORTUNITY: usize = 256;
pub const MAX_APPLICATIONS_PER_OPPORTUNITY: usize = 50_000;
pub const MAX_TITLE_LEN: usize = 512;

/// Longest slot validity window, in days.
pub const MAX_SLOT_DAYS: u32 = 3 * 366;

/// Longest single reservation, in days.
pub const MAX_STAY_DAYS: u32 = 366;

/// Widest window a capacity query may cover, in days.
pub const MAX_QUERY_DAYS: u32 = 3 * 366;

pub const MAX_DAY_CAPACITY: u32 = 10_000;
