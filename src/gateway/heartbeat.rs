use std::time::Duration;

/// How often the outbound loop pings an otherwise quiet client.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// A client that sends nothing at all for this long is treated as gone.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(90);
