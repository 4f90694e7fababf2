use super::*;

// -------------------- Parameters --------------------

#[test]
fn default_parameters_match_known_sizes() {
    let bf = BloomFilter::new(20, 400);
    assert_eq!(bf.k(), 3);
    assert_eq!(bf.m(), 1344);
    assert_eq!(bf.m() / 8, 168);
}

#[test]
fn m_is_always_a_multiple_of_eight() {
    for (f, n) in [(1, 1), (5, 17), (20, 400), (50, 3), (99, 1000)] {
        let bf = BloomFilter::new(f, n);
        assert_eq!(bf.m() % 8, 0, "m not byte aligned for f={} n={}", f, n);
        assert!(bf.k() >= 1);
    }
}

#[test]
fn lower_error_rate_means_more_probes_and_bits() {
    let loose = BloomFilter::new(20, 400);
    let tight = BloomFilter::new(1, 400);
    assert!(tight.k() > loose.k());
    assert!(tight.m() > loose.m());
}

#[test]
#[should_panic(expected = "fp_percent must be in 1..=99")]
fn new_panics_on_zero_percent() {
    BloomFilter::new(0, 10);
}

#[test]
#[should_panic(expected = "expected_keys must be > 0")]
fn new_panics_on_zero_keys() {
    BloomFilter::new(20, 0);
}

// -------------------- Positions --------------------

#[test]
fn positions_are_deterministic_and_in_range() {
    let bf = BloomFilter::new(20, 400);
    let a = bf.calc_bit_positions(b"hello");
    let b = bf.calc_bit_positions(b"hello");
    assert_eq!(a, b);
    assert_eq!(a.len(), bf.k() as usize);
    assert!(a.iter().all(|&p| p < bf.m()));
}

#[test]
fn hash_to_then_is_hit() {
    let bf = BloomFilter::new(20, 400);
    let mut bits = BitsArray::new(bf.m());
    let positions = bf.calc_bit_positions(b"k1");
    assert!(!bf.is_hit(&positions, &bits));
    bf.hash_to(&positions, &mut bits);
    assert!(bf.is_hit(&positions, &bits));
}

#[test]
#[should_panic(expected = "filter array must hold exactly m bits")]
fn is_hit_rejects_wrong_length() {
    let bf = BloomFilter::new(20, 400);
    let bits = BitsArray::new(bf.m() + 8);
    let _ = bf.is_hit(&bf.calc_bit_positions(b"x"), &bits);
}

// -------------------- BlockFilter --------------------

#[test]
fn accumulator_has_no_false_negatives() {
    let mut acc = BlockFilter::new(20, 400);
    for i in 0..400u32 {
        acc.add(&i.to_be_bytes());
    }
    assert_eq!(acc.key_len(), 400);
    let bits = acc.hash();
    for i in 0..400u32 {
        assert!(acc.exist(&i.to_be_bytes(), &bits), "key {} missing", i);
    }
}

#[test]
fn false_positive_rate_is_reasonable() {
    let mut acc = BlockFilter::new(20, 400);
    for i in 0..400u32 {
        acc.add(format!("present-{}", i).as_bytes());
    }
    let bits = acc.hash();

    let probes = 10_000;
    let hits = (0..probes)
        .filter(|i| acc.exist(format!("absent-{}", i).as_bytes(), &bits))
        .count();
    let rate = hits as f64 / probes as f64;
    // Target is 20%; leave room for variance.
    assert!(rate < 0.30, "false positive rate too high: {:.3}", rate);
}

#[test]
fn reset_clears_bits_and_count() {
    let mut acc = BlockFilter::new(20, 400);
    acc.add(b"a");
    let before = acc.hash();
    acc.reset();
    assert_eq!(acc.key_len(), 0);
    assert_eq!(acc.hash(), BitsArray::new(acc.filter().m()));
    // The snapshot taken before the reset is unaffected.
    assert!(acc.exist(b"a", &before));
}

#[test]
fn empty_filter_rejects_everything() {
    let acc = BlockFilter::new(20, 400);
    let bits = acc.hash();
    assert!(!acc.exist(b"anything", &bits));
}

// -------------------- BitsArray --------------------

#[test]
fn bit_layout_is_lsb_first_per_byte() {
    let mut bits = BitsArray::new(16);
    bits.set(0, true);
    bits.set(9, true);
    assert_eq!(bits.as_bytes(), &[0b0000_0001, 0b0000_0010]);
    assert!(bits.get(9));
    assert!(!bits.get(8));
}

#[test]
fn per_bit_operations() {
    let mut bits = BitsArray::new(8);
    bits.or_bit(3, true);
    assert!(bits.get(3));
    bits.and_bit(3, false);
    assert!(!bits.get(3));
    bits.xor_bit(3, true);
    assert!(bits.get(3));
    bits.not(3);
    assert!(!bits.get(3));
    bits.set(3, true);
    bits.set(3, false);
    assert_eq!(bits.count_ones(), 0);
}

#[test]
fn whole_array_operations() {
    let mut a = BitsArray::from_bytes(vec![0b1100_1100]);
    let b = BitsArray::from_bytes(vec![0b1010_1010]);

    let mut x = a.clone();
    x.xor(&b);
    assert_eq!(x.as_bytes(), &[0b0110_0110]);

    let mut o = a.clone();
    o.or(&b);
    assert_eq!(o.as_bytes(), &[0b1110_1110]);

    a.and(&b);
    assert_eq!(a.as_bytes(), &[0b1000_1000]);
}

#[test]
fn equality_compares_length_and_content() {
    let a = BitsArray::from_bytes(vec![1, 2]);
    let b = BitsArray::from_bytes(vec![1, 2]);
    let c = BitsArray::from_bytes_with_len(vec![1, 2], 12);
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(a.bit_length(), 16);
    assert_eq!(c.byte_length(), 2);
}

#[test]
#[should_panic(expected = "out of range")]
fn get_out_of_range_panics() {
    let bits = BitsArray::new(12);
    let _ = bits.get(12);
}

#[test]
#[should_panic(expected = "bit length mismatch")]
fn combine_with_different_length_panics() {
    let mut a = BitsArray::new(8);
    a.or(&BitsArray::new(16));
}

#[test]
#[should_panic(expected = "exceeds")]
fn from_bytes_with_len_rejects_overlong() {
    BitsArray::from_bytes_with_len(vec![0], 9);
}

// -------------------- Debug --------------------

#[test]
fn debug_impl_works() {
    let acc = BlockFilter::new(20, 400);
    let debug = format!("{:?}", acc);
    assert!(debug.contains("BlockFilter"));
    assert!(debug.contains("key_len"));
    assert!(format!("{:?}", acc.hash()).contains("bit_length"));
}
