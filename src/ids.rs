//! Opaque id generation shared by every collection in the store.
//!
//! Ids are 15-character collision-resistant strings: a lowercase Crockford
//! base32 encoding of the top 75 bits of a `uuid::Uuid::new_v4()`, packed 5
//! bits per character. This mirrors PocketBase-family record ids, which this
//! crate's on-disk shape otherwise imitates.

const ALPHABET: &[u8; 32] = b"0123456789abcdefghjkmnpqrstvwxyz";
const ID_LEN: usize = 15;

/// Generate a new opaque id.
pub fn new_id() -> String {
    let uuid = uuid::Uuid::new_v4();
    encode(uuid.as_bytes())
}

fn encode(bytes: &[u8]) -> String {
    // Fold all 16 bytes (128 bits) into one accumulator, then shift right to
    // keep only the top 75 bits (15 base32 chars * 5 bits), and peel off
    // 5-bit groups from the top.
    let mut acc: u128 = 0;
    for b in bytes {
        acc = (acc << 8) | *b as u128;
    }
    let shift = 128 - (ID_LEN * 5);
    acc >>= shift;

    let mut out = String::with_capacity(ID_LEN);
    for i in (0..ID_LEN).rev() {
        let idx = ((acc >> (i * 5)) & 0x1f) as usize;
        out.push(ALPHABET[idx] as char);
    }
    out
}

/// Heuristic classification of an agent session reference: treat as `path`
/// if it starts with `/`, `.`, or contains a path separator, else `uuid`.
pub fn classify_ref(reference: &str) -> crate::store::models::RefType {
    use crate::store::models::RefType;
    if reference.starts_with('/')
        || reference.starts_with('.')
        || reference.contains(std::path::MAIN_SEPARATOR)
        || reference.contains('/')
    {
        RefType::Path
    } else {
        RefType::Uuid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_id_has_fixed_length() {
        let id = new_id();
        assert_eq!(id.len(), ID_LEN);
    }

    #[test]
    fn new_id_uses_only_alphabet_chars() {
        let id = new_id();
        assert!(id.bytes().all(|b| ALPHABET.contains(&b)));
    }

    #[test]
    fn new_id_is_not_trivially_repeated() {
        let a = new_id();
        let b = new_id();
        assert_ne!(a, b);
    }

    #[test]
    fn classify_ref_detects_uuid_like() {
        use crate::store::models::RefType;
        assert_eq!(classify_ref("abc-123"), RefType::Uuid);
        assert_eq!(classify_ref("550e8400"), RefType::Uuid);
    }

    #[test]
    fn classify_ref_detects_path_like() {
        use crate::store::models::RefType;
        assert_eq!(classify_ref("/home/user/project"), RefType::Path);
        assert_eq!(classify_ref("./session-42"), RefType::Path);
        assert_eq!(classify_ref("sessions/abc"), RefType::Path);
    }
}
