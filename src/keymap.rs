/// Trigger characters, one per key: number row, then the three letter rows.
const LAYOUT: &str = "1234567890qwertyuiopasdfghjklzxcvbnm";

/// Map a typed character to a key index (case-insensitive).
pub fn char_to_key(c: char) -> Option<usize> {
    let c = c.to_ascii_lowercase();
    LAYOUT.chars().position(|k| k == c)
}

/// The character that triggers a key, for labels.
pub fn key_to_char(index: usize) -> Option<char> {
    LAYOUT.chars().nth(index)
}

/// Number of keys the layout can reach.
pub fn capacity() -> usize {
    LAYOUT.len()
}
