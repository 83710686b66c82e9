//! Subscription descriptors handed to a transport.

use serde::Serialize;

/// What kind of stream a subscription targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// A metric stream (`kinesis`, `brainwaves`, ...).
    Metric,
    /// The device status stream.
    Status,
    /// The device settings stream.
    Settings,
}

impl OperationKind {
    /// Returns the wire string for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Metric => "metric",
            OperationKind::Status => "status",
            OperationKind::Settings => "settings",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A logical stream request.
///
/// Labels are kept sorted and deduplicated so that two requests naming the
/// same labels in a different order are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SubscriptionRequest {
    pub kind: OperationKind,
    pub metric: String,
    pub labels: Vec<String>,
    pub atomic: bool,
}

impl SubscriptionRequest {
    /// Build a request, canonicalizing the label list.
    pub fn new<I, S>(kind: OperationKind, metric: impl Into<String>, labels: I, atomic: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        labels.sort();
        labels.dedup();

        Self {
            kind,
            metric: metric.into(),
            labels,
            atomic,
        }
    }

    /// Shorthand for a metric request.
    pub fn metric<I, S>(metric: impl Into<String>, labels: I, atomic: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(OperationKind::Metric, metric, labels, atomic)
    }
}
