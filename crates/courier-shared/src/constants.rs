/// Default maximum message body length, in characters
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 2000;

/// Default HTTP / websocket port
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Store collection holding one document per conversation
pub const CONVERSATIONS_COLLECTION: &str = "conversations";

/// Store collection holding the presence snapshot
pub const PRESENCE_COLLECTION: &str = "presence";

/// Well-known key of the presence snapshot document
pub const PRESENCE_SNAPSHOT_KEY: &str = "online_users";

/// Machine id stamped on server-generated messages
pub const SYSTEM_MACHINE_ID: &str = "system";

/// Sender id reported in `new_message` events carrying a system message
pub const SYSTEM_SENDER_ID: &str = "system";
