use std::fmt;

/// A point-in-time snapshot of a component's counters.
///
/// Counters are listed in a fixed order chosen by the component, and only ever increase over the lifetime of the
/// component that produced them.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Stats {
    counters: Vec<(&'static str, u64)>,
}

impl Stats {
    pub(crate) fn from_counters(counters: Vec<(&'static str, u64)>) -> Self {
        Self { counters }
    }

    /// Returns the value of the named counter, if the component tracks it.
    pub fn get(&self, name: &str) -> Option<u64> {
        self.counters.iter().find(|(n, _)| *n == name).map(|(_, v)| *v)
    }

    /// Returns an iterator over the counters, in order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, u64)> + '_ {
        self.counters.iter().copied()
    }

    /// Returns the number of counters.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Returns `true` if there are no counters.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.counters.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}={}", name, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_and_display() {
        let stats = Stats::from_counters(vec![("sent", 3), ("errors", 0)]);
        assert_eq!(stats.get("sent"), Some(3));
        assert_eq!(stats.get("missing"), None);
        assert_eq!(stats.iter().map(|(n, _)| n).collect::<Vec<_>>(), vec!["sent", "errors"]);
        assert_eq!(stats.to_string(), "sent=3 errors=0");
    }
}
