/// Version byte of the token dictionary, carried as the last byte of the
/// connection header (`WA\x06\x03`).
pub const DICT_VERSION: u8 = 3;

/// Marker introducing a 16-bit big-endian string length.
pub const STRING_16: u8 = 0xFD;
/// Marker introducing a 32-bit big-endian byte-payload length.
pub const BINARY_32: u8 = 0xFE;

/// The fixed token dictionary, indexed by wire byte.
///
/// Slots 0..=47 are empty so that short raw strings can use their length as
/// the leading byte without shadowing a token. Every slot from 247 up is
/// empty so the `STRING_16`/`BINARY_32` markers and inline byte-payload
/// lengths stay unambiguous. Both ends of the connection agree on this
/// table statically; changing it means bumping [`DICT_VERSION`].
pub static TOKENS: [&str; 256] = [
    "", "", "", "", "", "", "", "",
    "", "", "", "", "", "", "", "",
    "", "", "", "", "", "", "", "",
    "", "", "", "", "", "", "", "",
    "", "", "", "", "", "", "", "",
    "", "", "", "", "", "", "", "",
    "1", "2", "3", "4", "5", "6", "7", "8",
    "9", "10", "11", "12", "13", "14", "15", "16",
    "17", "18", "19", "20", "21", "22", "23", "24",
    "25", "26", "27", "28", "29", "30",
    "account", "ack", "action", "active", "add", "all", "and", "android",
    "announce", "archive", "available", "battery", "block", "body", "broadcast", "call",
    "cancel", "caption", "chat", "child", "clear", "code", "config", "contact",
    "contacts", "count", "create", "creator", "decrypt", "delete", "description", "device",
    "devices", "disappearing", "download", "edit", "encoding", "encrypt", "end", "ephemeral",
    "error", "event", "failure", "false", "file", "filename", "format", "from",
    "g.us", "get", "group", "groups", "hash", "id", "image", "index",
    "info", "invite", "ios", "iq", "item", "items", "jid", "key",
    "keys", "last", "leave", "limit", "list", "location", "media", "media_type",
    "member", "message", "messages", "meta", "mime", "mms", "msg", "mute",
    "name", "network", "new", "newsletter", "notification", "notify", "number", "offline",
    "order", "owner", "pairing", "participant", "participants", "paused", "phone", "photo",
    "picture", "pin", "platform", "pn", "preview", "private", "promote", "protocol",
    "push", "pushname", "query", "read", "reason", "receipt", "received", "recipient",
    "remove", "removed", "reply", "report", "request", "reset", "result", "retry",
    "revoke", "s.whatsapp.net", "search", "secret", "self", "sender", "server", "session",
    "set", "settings", "sig", "silent", "size", "source", "srcjid", "starred",
    "start", "status", "storage", "store", "stop", "subject", "subscribe", "success",
    "sync", "system", "tag", "terminate", "text", "thread", "time", "timestamp",
    "to", "token", "true", "type", "unavailable", "unknown", "unread", "update",
    "url", "user", "users", "value", "version", "video", "web", "write",
    "xmlns",
    "", "", "", "", "", "", "", "",
    "",
];

/// Looks up the wire byte for a token, if the dictionary carries it.
pub fn index_of(token: &str) -> Option<u8> {
    if token.is_empty() {
        return None;
    }
    TOKENS
        .iter()
        .position(|&t| t == token)
        .map(|idx| idx as u8)
}

/// Returns the token stored at `index`, or `None` for an empty slot.
pub fn get(index: u8) -> Option<&'static str> {
    let token = TOKENS[index as usize];
    if token.is_empty() { None } else { Some(token) }
}
