//! Label sets attached to observations.

/// Mapping from label name to value.
///
/// Names are unique: setting a name twice keeps the last value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LabelSet {
    pairs: Vec<(String, String)>,
}

impl LabelSet {
    pub fn new() -> Self {
        Self { pairs: Vec::new() }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.pairs.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.pairs.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Comma separated names, for error messages.
    pub(crate) fn names(&self) -> String {
        self.pairs
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Values reordered to `declared`, or `None` unless the names match exactly.
    pub(crate) fn values_in_order(&self, declared: &[String]) -> Option<Vec<String>> {
        if self.pairs.len() != declared.len() {
            return None;
        }
        declared
            .iter()
            .map(|name| self.get(name).map(str::to_string))
            .collect()
    }
}

impl<K, V> FromIterator<(K, V)> for LabelSet
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = LabelSet::new();
        for (k, v) in iter {
            set.insert(k, v);
        }
        set
    }
}

impl<'a, const N: usize> From<[(&'a str, &'a str); N]> for LabelSet {
    fn from(pairs: [(&'a str, &'a str); N]) -> Self {
        pairs.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn declared(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn values_follow_declared_order() {
        let set = LabelSet::from([("status", "2xx"), ("route", "/test"), ("method", "GET")]);
        let values = set.values_in_order(&declared(&["route", "method", "status"]));
        assert_eq!(
            values,
            Some(vec!["/test".into(), "GET".into(), "2xx".into()])
        );
    }

    #[test]
    fn missing_or_extra_names_do_not_match() {
        let set = LabelSet::from([("route", "/test")]);
        assert_eq!(set.values_in_order(&declared(&["route", "method"])), None);

        let set = LabelSet::from([("route", "/test"), ("host", "a")]);
        assert_eq!(set.values_in_order(&declared(&["route", "method"])), None);
    }

    #[test]
    fn later_insert_replaces_value() {
        let set = LabelSet::new().with("route", "/a").with("route", "/b");
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("route"), Some("/b"));
    }
}
