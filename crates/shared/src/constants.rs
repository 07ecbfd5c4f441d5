/// Preview stored on the conversation record when the last message is encrypted.
/// The relay never holds client keys, so it cannot produce a real preview.
pub const ENCRYPTED_PREVIEW: &str = "[Encrypted message]";
/// Shown in place of message content that could not be decrypted locally.
pub const MESSAGE_UNAVAILABLE: &str = "[Message unavailable]";
/// Maximum number of characters kept in a plaintext last-message preview.
pub const PREVIEW_MAX_CHARS: usize = 50;
/// Query parameter carrying the bearer token on the WebSocket upgrade request.
pub const TOKEN_QUERY_PARAM: &str = "token";
/// Maximum size of a message `content` field in bytes (ciphertext included).
pub const MAX_MESSAGE_SIZE_BYTES: usize = 64 * 1024;
/// Prefix of the local storage entry holding an identity's encryption key.
pub const ENCRYPTION_KEY_PREFIX: &str = "encryption_key_";
