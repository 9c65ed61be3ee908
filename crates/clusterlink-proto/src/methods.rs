//! Named constants for the daemon's gRPC method strings.
//!
//! Used as the `rpc` field of log events and fault reports so the names
//! match the routes the generated server registers.

/// `Daemon/Version`
pub const METHOD_VERSION: &str = "Daemon/Version";

/// `Daemon/Status`
pub const METHOD_STATUS: &str = "Daemon/Status";

/// `Daemon/Quit`
pub const METHOD_QUIT: &str = "Daemon/Quit";

/// `Daemon/SetDnsSearchPath`
pub const METHOD_SET_DNS_SEARCH_PATH: &str = "Daemon/SetDnsSearchPath";

/// `Daemon/Connect`
pub const METHOD_CONNECT: &str = "Daemon/Connect";

/// `Daemon/Disconnect`
pub const METHOD_DISCONNECT: &str = "Daemon/Disconnect";

/// `Daemon/GetClusterSubnets`
pub const METHOD_GET_CLUSTER_SUBNETS: &str = "Daemon/GetClusterSubnets";

/// `Daemon/SetLogLevel`
pub const METHOD_SET_LOG_LEVEL: &str = "Daemon/SetLogLevel";
