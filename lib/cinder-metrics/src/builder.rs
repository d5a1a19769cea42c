use metrics::{counter, Counter, Label, Level, SharedString};

mod private {
    use metrics::SharedString;

    pub trait Sealed {}

    impl Sealed for &'static str {}
    impl Sealed for String {}
    impl<T> Sealed for (&'static str, T) where T: Into<SharedString> {}
}

/// A metric tag.
///
/// Tags can be given as `"name"`, `"name:value"` (either `&'static str` or `String`), or as a `(&'static str, value)`
/// tuple. This trait is sealed.
pub trait MetricTag: private::Sealed {
    /// Converts the tag into a `metrics` label.
    fn into_label(self) -> Label;
}

impl MetricTag for &'static str {
    fn into_label(self) -> Label {
        match self.split_once(':') {
            Some((key, value)) => Label::from_static_parts(key, value),
            None => Label::from_static_parts(self, ""),
        }
    }
}

impl MetricTag for String {
    fn into_label(self) -> Label {
        match self.split_once(':') {
            Some((key, value)) => Label::new(key.to_string(), value.to_string()),
            None => Label::new(self, ""),
        }
    }
}

impl<T> MetricTag for (&'static str, T)
where
    T: Into<SharedString>,
{
    fn into_label(self) -> Label {
        Label::new(SharedString::const_str(self.0), self.1.into())
    }
}

/// Builder for registering tagged metrics.
#[derive(Clone, Default)]
pub struct MetricsBuilder {
    default_tags: Vec<Label>,
}

impl MetricsBuilder {
    /// Creates a builder whose metrics are tagged with the given component identifier.
    ///
    /// An empty identifier is replaced with `unnamed`, so that metrics from anonymous components remain queryable.
    pub fn for_component(component_id: &str) -> Self {
        let component_id = if component_id.is_empty() {
            "unnamed"
        } else {
            component_id
        };

        Self::default().add_default_tag(("component_id", component_id.to_string()))
    }

    /// Adds a default tag to every metric registered by this builder.
    pub fn add_default_tag<T>(mut self, tag: T) -> Self
    where
        T: MetricTag,
    {
        self.default_tags.push(tag.into_label());
        self
    }

    /// Registers a counter at debug verbosity.
    pub fn register_debug_counter(&self, metric_name: &'static str) -> Counter {
        let tags = self.default_tags.clone();
        counter!(level: Level::DEBUG, metric_name, tags)
    }

    /// Registers a counter at debug verbosity with additional tags.
    pub fn register_debug_counter_with_tags<I, T>(&self, metric_name: &'static str, additional_tags: I) -> Counter
    where
        I: IntoIterator<Item = T>,
        T: MetricTag,
    {
        let mut tags = self.default_tags.clone();
        tags.extend(additional_tags.into_iter().map(MetricTag::into_label));

        counter!(level: Level::DEBUG, metric_name, tags)
    }
}
