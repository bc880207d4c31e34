use bytes::Bytes;
use core::fmt;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Identity of one logical time series: a class name plus a label set.
///
/// Two chunks belong to the same series iff their identities are equal.
/// Labels are kept in a [`BTreeMap`], so equality and hashing do not depend on
/// the order in which labels were added. Identities are compared, never
/// sorted.
///
/// # Example
/// ```
/// use parascan::SeriesId;
///
/// let a = SeriesId::new("cpu.load").with_label("host", "a").with_label("dc", "eu");
/// let b = SeriesId::new("cpu.load").with_label("dc", "eu").with_label("host", "a");
/// assert_eq!(a, b);
/// assert_eq!(a.to_string(), "cpu.load{dc=eu,host=a}");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SeriesId {
    name: String,
    labels: BTreeMap<String, String>,
}

impl SeriesId {
    /// Creates an identity with no labels.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
        }
    }

    /// Creates an identity from a name and any iterator of label pairs.
    pub fn from_parts<K, V>(
        name: impl Into<String>,
        labels: impl IntoIterator<Item = (K, V)>,
    ) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            name: name.into(),
            labels: labels
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Adds (or replaces) a label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }
}

impl fmt::Display for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.name)?;
        for (i, (k, v)) in self.labels.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{k}={v}")?;
        }
        f.write_str("}")
    }
}

/// An opaque, immutable unit of encoded series data.
///
/// The payload is never inspected by the merge engine; only the series
/// identity is used, to keep chunks of one series contiguous. Cloning is
/// cheap: both the identity and the payload are reference counted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecoderChunk {
    series: Arc<SeriesId>,
    payload: Bytes,
}

impl DecoderChunk {
    pub fn new(series: Arc<SeriesId>, payload: impl Into<Bytes>) -> Self {
        Self {
            series,
            payload: payload.into(),
        }
    }

    /// The identity this chunk belongs to.
    pub fn series(&self) -> &Arc<SeriesId> {
        &self.series
    }

    /// The encoded data.
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Returns `true` if `other` belongs to the same series.
    ///
    /// Pointer equality is checked first since chunks from one source usually
    /// share the identity allocation.
    pub fn same_series(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.series, &other.series) || self.series == other.series
    }

    pub fn into_parts(self) -> (Arc<SeriesId>, Bytes) {
        (self.series, self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn label_order_does_not_matter() {
        let a = SeriesId::from_parts("m", [("a", "1"), ("b", "2")]);
        let b = SeriesId::new("m")
            .with_label("b", "2")
            .with_label("a", "1");
        assert_eq!(a, b);

        let set: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn name_and_labels_both_matter() {
        let base = SeriesId::new("m").with_label("a", "1");
        assert_ne!(base, SeriesId::new("n").with_label("a", "1"));
        assert_ne!(base, SeriesId::new("m").with_label("a", "2"));
        assert_ne!(base, SeriesId::new("m"));
    }

    #[test]
    fn display() {
        assert_eq!(SeriesId::new("m").to_string(), "m{}");
        let id = SeriesId::new("m").with_label("x", "1").with_label("a", "2");
        assert_eq!(id.to_string(), "m{a=2,x=1}");
    }

    #[test]
    fn same_series_compares_by_value() {
        let a1 = DecoderChunk::new(Arc::new(SeriesId::new("a")), &b"1"[..]);
        let a2 = DecoderChunk::new(Arc::new(SeriesId::new("a")), &b"2"[..]);
        let a3 = DecoderChunk::new(Arc::clone(a1.series()), &b"3"[..]);
        let b = DecoderChunk::new(Arc::new(SeriesId::new("b")), &b"1"[..]);

        assert!(a1.same_series(&a2));
        assert!(a1.same_series(&a3));
        assert!(!a1.same_series(&b));
        assert_eq!(a3.payload().as_ref(), b"3");
    }
}
