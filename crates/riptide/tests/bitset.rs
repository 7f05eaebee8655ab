use anyhow::Result;
use riptide::{Bitset, BitsetError};

#[test]
fn set_get_across_word_boundaries() {
    let mut bits = Bitset::new(130);
    assert_eq!(bits.len(), 130);
    for index in [0, 1, 63, 64, 65, 127, 128, 129] {
        assert!(!bits.get(index));
        bits.set(index, true);
        assert!(bits.get(index));
    }
    bits.set(64, false);
    assert!(!bits.get(64));
    assert!(bits.get(63));
    assert!(bits.get(65));
}

#[test]
fn none_and_any() {
    let mut bits = Bitset::new(70);
    assert!(bits.none());
    assert!(!bits.any());
    bits.set(69, true);
    assert!(!bits.none());
    assert!(bits.any());
    bits.set(69, false);
    assert!(bits.none());
}

#[test]
fn bitand_intersects() {
    let mut a = Bitset::new(100);
    let mut b = Bitset::new(100);
    a.set(3, true);
    a.set(64, true);
    a.set(99, true);
    b.set(64, true);
    b.set(99, true);
    b.set(5, true);
    let c = &a & &b;
    assert!(!c.get(3));
    assert!(!c.get(5));
    assert!(c.get(64));
    assert!(c.get(99));
}

#[test]
fn equality_is_structural() {
    let mut a = Bitset::new(66);
    let mut b = Bitset::new(66);
    assert_eq!(a, b);
    a.set(65, true);
    assert_ne!(a, b);
    b.set(65, true);
    assert_eq!(a, b);
}

#[test]
fn or_assign_reports_newly_set_bits_in_order() -> Result<()> {
    let mut a = Bitset::new(130);
    let mut b = Bitset::new(130);
    a.set(2, true);
    a.set(70, true);
    b.set(2, true);
    b.set(5, true);
    b.set(70, true);
    b.set(128, true);

    let updated = a.or_assign_returning_update_list(&b)?;
    assert_eq!(updated, vec![5, 128]);
    assert!(a.get(5));
    assert!(a.get(128));

    // Nothing new on the second round.
    let updated = a.or_assign_returning_update_list(&b)?;
    assert!(updated.is_empty());
    Ok(())
}

#[test]
fn checked_ops_match_their_operators() -> Result<()> {
    let mut a = Bitset::new(80);
    let mut b = Bitset::new(80);
    a.set(7, true);
    a.set(64, true);
    b.set(64, true);
    b.set(79, true);

    let and = a.checked_and(&b)?;
    assert_eq!(and, &a & &b);

    let mut or = a.clone();
    or.checked_or_assign(&b)?;
    let mut expected = a.clone();
    expected |= &b;
    assert_eq!(or, expected);
    Ok(())
}

#[test]
fn size_mismatches_are_reported_not_panicked() {
    let mut a = Bitset::new(10);
    let b = Bitset::new(11);
    let mismatch = Err(BitsetError::InvalidSize { lhs: 10, rhs: 11 });
    assert_eq!(a.or_assign_returning_update_list(&b), mismatch);
    assert_eq!(a.checked_and(&b), Err(BitsetError::InvalidSize { lhs: 10, rhs: 11 }));
    assert_eq!(
        a.checked_or_assign(&b),
        Err(BitsetError::InvalidSize { lhs: 10, rhs: 11 })
    );
}
