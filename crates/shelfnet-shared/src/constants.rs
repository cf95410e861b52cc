/// Application name, sent as the `source` field of request payloads
pub const APP_NAME: &str = "shelfnet";

/// Default event kind for "book wanted" requests
pub const DEFAULT_REQUEST_KIND: u16 = 8698;

/// Default event kind for catalog-excerpt responses
pub const DEFAULT_RESPONSE_KIND: u16 = 8699;

/// x-only secp256k1 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;

/// Secret key size in bytes
pub const SECRET_KEY_SIZE: usize = 32;

/// Schnorr signature size in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// Length of a hex-encoded public key or event id
pub const HEX_ID_LEN: usize = 64;

/// Length of a hex-encoded compressed SEC1 public key (`02`/`03` prefix)
pub const COMPRESSED_PUBKEY_HEX_LEN: usize = 66;

/// Length of a content fingerprint (file hash)
pub const FILE_HASH_LEN: usize = 16;

/// Minimum length of a title or series search term
pub const MIN_TERM_LEN: usize = 4;

/// Maximum length of any request field
pub const MAX_FIELD_LEN: usize = 256;

/// Responses list at most this many authors before collapsing
pub const MAX_LISTED_AUTHORS: usize = 3;

/// Author placeholder when a book has none
pub const AUTHOR_NOT_SPECIFIED: &str = "author not specified";

/// Author placeholder when a book has too many to list
pub const COLLECTIVE_OF_AUTHORS: &str = "collective of authors";

/// Tag marker for the referenced request on a response event
pub const REPLY_MARKER: &str = "reply";
