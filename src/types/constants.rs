/// Realtime frame types sent by the backend (magic strings layer)
pub mod frame_types {
    pub const CONNECTED: &str = "connected";
    pub const EVENT: &str = "event";
    pub const ERROR: &str = "error";
    pub const RESPONSE: &str = "response";
    pub const PONG: &str = "pong";
    pub const PING: &str = "ping";
    pub const AUTHENTICATION: &str = "authentication";
}

/// Action segments found at the end of document event names
pub mod event_actions {
    pub const CREATE: &str = "create";
    pub const UPDATE: &str = "update";
    pub const DELETE: &str = "delete";
}

/// Logical collections backing the two badge channels
pub mod collections {
    pub const NOTIFICATIONS: &str = "notifications";
    pub const MESSAGES: &str = "messages";
    pub const PROFILES: &str = "users";
}

/// Screen names that suppress their own badge
pub mod screens {
    pub const NOTIFICATIONS: &str = "notifications";
    pub const MESSAGES: &str = "messages";
}

/// Document attribute names
pub mod fields {
    pub const ID: &str = "$id";
    pub const COLLECTION_ID: &str = "$collectionId";
    pub const CREATED_AT: &str = "$createdAt";
    pub const SENDER_ID: &str = "senderId";
    pub const RECEIVER_ID: &str = "receiverId";
    pub const SENDER: &str = "sender";
    pub const RECEIVER: &str = "receiver";
    pub const IS_SEEN: &str = "isSeen";
    pub const CONTENT: &str = "content";
    pub const PUSH_TOKEN: &str = "pushToken";
}

/// Default base reconnect delay (milliseconds)
pub const DEFAULT_BASE_DELAY: u64 = 3000;

/// Default reconnect delay cap (milliseconds)
pub const DEFAULT_MAX_DELAY: u64 = 60_000;

/// Default upper bound of random jitter added to each delay (milliseconds)
pub const DEFAULT_MAX_JITTER: u64 = 2000;

/// Default number of consecutive failures before cooling down
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Default cooldown window (milliseconds)
pub const DEFAULT_COOLDOWN: u64 = 5 * 60 * 1000;

/// Default inactivity that counts as a system wake (milliseconds)
pub const DEFAULT_SYSTEM_WAKE_THRESHOLD: u64 = 30_000;

/// Default settle delay after a full teardown (milliseconds)
pub const DEFAULT_SETTLE_DELAY: u64 = 3000;

/// Default period of the network check timer (milliseconds)
pub const DEFAULT_NETWORK_CHECK_INTERVAL: u64 = 10_000;

/// Default debounce before an authoritative badge resync (milliseconds)
pub const DEFAULT_RESYNC_DEBOUNCE: u64 = 1000;

/// Default delay before resyncing badges after the network returns (milliseconds)
pub const DEFAULT_NETWORK_RESTORE_SETTLE: u64 = 2000;

/// Default period of the background badge refresh (milliseconds)
pub const DEFAULT_COUNT_REFRESH_INTERVAL: u64 = 60_000;

/// Default socket ping interval (milliseconds)
pub const DEFAULT_PING_INTERVAL: u64 = 20_000;

/// Buffered signals per backend subscription
pub const EVENT_BUFFER_SIZE: usize = 100;

/// Expo push gateway
pub const EXPO_PUSH_ENDPOINT: &str = "https://exp.host/--/api/v2/push/send";
