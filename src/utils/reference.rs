use rand::Rng;

const REFERENCE_ALPHABET: &[u8] = b"0123456789ABCDEF";

fn random_suffix(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| REFERENCE_ALPHABET[rng.random_range(0..REFERENCE_ALPHABET.len())] as char)
        .collect()
}

/// Provider-facing order reference, e.g. `ORD-7F3A9C21`.
pub fn order_number() -> String {
    format!("ORD-{}", random_suffix(8))
}

/// Redeemable pack code, e.g. `PACK-4B2E91AC`.
pub fn pack_code() -> String {
    format!("PACK-{}", random_suffix(8))
}
