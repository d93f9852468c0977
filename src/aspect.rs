//! Aspect bitmask for per-page derived data

use bitflags::bitflags;

bitflags! {
    /// One bit per kind of derived per-page data a backend can produce.
    ///
    /// A [`crate::jobs::PageDataJob`] is parameterized by a mask so a caller
    /// can ask for any subset of aspects in a single backend pass, and the
    /// page cache tracks freshness per aspect rather than per page.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct AspectMask: u16 {
        const LINKS       = 1 << 0;
        const TEXT        = 1 << 1;
        const TEXT_LAYOUT = 1 << 2;
        const TEXT_ATTRS  = 1 << 3;
        const IMAGES      = 1 << 4;
        const FORMS       = 1 << 5;
        const ANNOTATIONS = 1 << 6;
        const MEDIA       = 1 << 7;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_invalidation_keeps_other_bits() {
        let mut have = AspectMask::LINKS | AspectMask::TEXT | AspectMask::FORMS;
        have &= !AspectMask::TEXT;

        assert!(have.contains(AspectMask::LINKS));
        assert!(have.contains(AspectMask::FORMS));
        assert!(!have.contains(AspectMask::TEXT));
    }

    #[test]
    fn iter_yields_single_bits() {
        let mask = AspectMask::LINKS | AspectMask::MEDIA;
        let bits: Vec<AspectMask> = mask.iter().collect();

        assert_eq!(bits, vec![AspectMask::LINKS, AspectMask::MEDIA]);
    }
}
