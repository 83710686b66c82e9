//! Protocol constants for method names, metric names, and error codes.

/// Method names understood by devices and the relay.
pub struct Methods;

impl Methods {
    /// Start streaming a metric; replies with a `subscriptionId`.
    pub const SUBSCRIBE: &'static str = "subscribe";

    /// Stop streaming for a `subscriptionId`.
    pub const UNSUBSCRIBE: &'static str = "unsubscribe";

    /// Send an action (marker, haptics, training, ...) to the device.
    pub const DISPATCH_ACTION: &'static str = "dispatchAction";

    /// Device metadata.
    pub const GET_INFO: &'static str = "getInfo";

    /// Apply new device settings.
    pub const CHANGE_SETTINGS: &'static str = "changeSettings";

    /// Relay wall clock, used to compute the server time offset.
    pub const GET_SERVER_TIME: &'static str = "getServerTime";
}

/// Names of the metrics a device streams.
pub struct Metric;

impl Metric {
    /// Raw accelerometer samples.
    pub const ACCELEROMETER: &'static str = "accelerometer";

    /// Composite calm/focus scores. Labels: `calm`, `focus`.
    pub const AWARENESS: &'static str = "awareness";

    /// Brainwave data. Labels: `raw`, `rawUnfiltered`, `psd`, `powerByBand`.
    pub const BRAINWAVES: &'static str = "brainwaves";

    /// Trained kinesis thoughts. Labels are trained thought names.
    pub const KINESIS: &'static str = "kinesis";

    /// Kinesis predictions. Labels are trained thought names.
    pub const PREDICTIONS: &'static str = "predictions";

    /// Per-channel signal quality.
    pub const SIGNAL_QUALITY: &'static str = "signalQuality";

    /// Per-channel frequency analysis. Labels are channel names, e.g.
    /// `FC1`. Has no entry in the scope tables.
    pub const CHANNEL_ANALYSIS: &'static str = "channelAnalysis";

    /// Every metric name with an entry in the scope tables.
    pub const ALL: [&'static str; 6] = [
        Self::ACCELEROMETER,
        Self::AWARENESS,
        Self::BRAINWAVES,
        Self::KINESIS,
        Self::PREDICTIONS,
        Self::SIGNAL_QUALITY,
    ];
}

/// Device status stream name.
pub const STATUS: &str = "status";

/// Device settings stream name.
pub const SETTINGS: &str = "settings";

// ─── Error Codes ────────────────────────────────────────────────────────

/// Error codes returned by devices and the relay.
pub struct ErrorCodes;

impl ErrorCodes {
    /// The relay has no live device for this id.
    pub const DEVICE_OFFLINE: i32 = -32001;

    /// Metric or labels were rejected.
    pub const INVALID_SUBSCRIPTION: i32 = -32016;

    /// Unknown method.
    pub const METHOD_NOT_FOUND: i32 = -32601;
}
