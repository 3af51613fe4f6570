/// Caller-side password encryption applied before a password is stored or
/// sent over the wire. The account store only ever sees this digest.
pub fn encrypt_password(password: &str) -> String {
    blake3::hash(password.as_bytes()).to_hex().to_string()
}
