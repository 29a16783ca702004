//! Input bounds enforced at the engine boundary.

/// Display name length after trimming, in characters.
pub const MIN_DISPLAY_NAME_LEN: usize = 2;
pub const MAX_DISPLAY_NAME_LEN: usize = 60;

/// Ad-hoc item description length after trimming, in characters.
pub const MIN_ADHOC_DESCRIPTION_LEN: usize = 3;
pub const MAX_ADHOC_DESCRIPTION_LEN: usize = 200;

pub const MAX_ITEM_NAME_LEN: usize = 200;
pub const MAX_TEXT_FIELD_LEN: usize = 1000;

pub const MAX_BATCH_SIZE: usize = 64;
pub const MAX_ITEMS: usize = 100_000;

/// Hard ceiling for unlimited-capacity items.
pub const MAX_RESERVATIONS_PER_ITEM: usize = 10_000;
