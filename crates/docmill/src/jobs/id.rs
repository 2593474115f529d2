//! Short, URL-friendly job identifiers.

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const ID_LEN: usize = 10;

/// Generates a random 10-character job ID over `[A-Za-z0-9]`.
///
/// Rejection sampling keeps the distribution uniform; bytes >= 248
/// would bias toward the start of the 62-character alphabet.
pub fn generate() -> Result<String, getrandom::Error> {
    let mut id = String::with_capacity(ID_LEN);
    let mut buf = [0u8; 16];
    while id.len() < ID_LEN {
        getrandom::fill(&mut buf)?;
        for &byte in &buf {
            if byte >= 248 {
                continue;
            }
            id.push(ALPHABET[(byte % 62) as usize] as char);
            if id.len() == ID_LEN {
                break;
            }
        }
    }
    Ok(id)
}
