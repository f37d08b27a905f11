//! Stable color ids for slice titles.
//!
//! The model never renders anything, but it assigns every slice a color id so
//! that pieces of a split slice, and slices sharing a title, can be drawn
//! identically by whatever consumes the model.

/// Number of color ids available for hashed titles.
pub const NUM_GENERAL_PURPOSE_COLOR_IDS: u32 = 30;

/// Color ids reserved for scheduler states. They sit just past the general
/// purpose palette so a hashed title never collides with them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservedColor {
    Running,
    Runnable,
    Sleeping,
    IoWait,
}

impl ReservedColor {
    pub fn id(self) -> u32 {
        NUM_GENERAL_PURPOSE_COLOR_IDS
            + match self {
                ReservedColor::Running => 0,
                ReservedColor::Runnable => 1,
                ReservedColor::Sleeping => 2,
                ReservedColor::IoWait => 3,
            }
    }
}

/// 31-based string hash, wrapping on overflow.
pub fn string_hash(s: &str) -> u32 {
    let mut hash: i32 = 0;
    for unit in s.encode_utf16() {
        hash = hash.wrapping_shl(5).wrapping_sub(hash).wrapping_add(unit as i32);
    }
    hash.unsigned_abs()
}

/// Color id for a slice title.
pub fn string_color_id(s: &str) -> u32 {
    string_hash(s) % NUM_GENERAL_PURPOSE_COLOR_IDS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_distinguishes_titles() {
        assert_eq!(string_hash(""), 0);
        assert_eq!(string_hash("a"), 97);
        assert_ne!(string_hash("a"), string_hash("b"));
        assert_eq!(string_color_id("MessageLoop"), string_color_id("MessageLoop"));
    }

    #[test]
    fn color_ids_stay_in_palette() {
        for title in ["a", "b", "sys_write", "a much longer title to overflow the hash"] {
            assert!(string_color_id(title) < NUM_GENERAL_PURPOSE_COLOR_IDS);
        }
        assert!(ReservedColor::Running.id() >= NUM_GENERAL_PURPOSE_COLOR_IDS);
        assert_ne!(ReservedColor::Sleeping.id(), ReservedColor::IoWait.id());
    }
}
