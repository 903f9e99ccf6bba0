use ethereum_types::H256;

pub(crate) fn common_setup() {
    // Try init since multiple tests calling `init` will cause an error.
    let _ = pretty_env_logger::try_init();
}

/// A handful of fixed keys whose values are large enough that every leaf is
/// hashed rather than embedded.
pub(crate) fn small_trie_entries() -> Vec<(H256, Vec<u8>)> {
    [0x11u8, 0x1b, 0x2f, 0x80, 0x8e, 0xc4, 0xf0, 0xfe]
        .into_iter()
        .enumerate()
        .map(|(i, b)| {
            let mut key = H256::repeat_byte(b);
            key.0[31] = i as u8;
            (key, vec![0x40 + i as u8; 40])
        })
        .collect()
}
