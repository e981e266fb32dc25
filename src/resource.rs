//! Output resources and the channel-backed resource builder.

use crate::error::Result;
use crate::mapping::MappedElement;
use crate::pipeline::ResourceBuilder;
use anyhow::Context;
use crossbeam_channel::Sender;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A value under a predicate: a literal or a nested resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
    /// A plain string value.
    Literal(String),
    /// A child resource.
    Resource(Resource),
}

/// An ordered predicate to values map.
///
/// Predicates keep their first-seen order, values their insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resource {
    properties: IndexMap<String, Vec<Node>>,
}

impl Resource {
    /// Create an empty resource.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a literal value under a predicate.
    pub fn add_literal(&mut self, predicate: impl Into<String>, value: impl Into<String>) {
        self.properties
            .entry(predicate.into())
            .or_default()
            .push(Node::Literal(value.into()));
    }

    /// Add a child resource under a predicate.
    pub fn add_child(&mut self, predicate: impl Into<String>, child: Resource) {
        self.properties
            .entry(predicate.into())
            .or_default()
            .push(Node::Resource(child));
    }

    /// Attach a mapped element.
    ///
    /// Elements without a property become literals. Elements with a property
    /// are added to the last child under the predicate unless that child
    /// already has the property, in which case a new child is started.
    /// A translated value is accompanied by its original under
    /// `<property>Source` (or `<predicate>Source` for literals).
    pub fn attach(&mut self, element: MappedElement) {
        let Some(property) = element.property else {
            if let Some(source) = element.source {
                self.add_literal(format!("{}Source", element.predicate), source);
            }
            self.add_literal(element.predicate, element.value);
            return;
        };
        let reuse = matches!(
            self.properties.get(&element.predicate).and_then(|v| v.last()),
            Some(Node::Resource(child)) if child.get(&property).is_none()
        );
        if reuse {
            if let Some(Node::Resource(child)) = self
                .properties
                .get_mut(&element.predicate)
                .and_then(|v| v.last_mut())
            {
                child.add_value(property, element.value, element.source);
            }
        } else {
            let mut child = Resource::new();
            child.add_value(property, element.value, element.source);
            self.add_child(element.predicate, child);
        }
    }

    fn add_value(&mut self, property: String, value: String, source: Option<String>) {
        if let Some(source) = source {
            self.add_literal(format!("{property}Source"), source);
        }
        self.add_literal(property, value);
    }

    /// Values under a predicate.
    #[must_use]
    pub fn get(&self, predicate: &str) -> Option<&[Node]> {
        self.properties.get(predicate).map(Vec::as_slice)
    }

    /// Literal values under a predicate.
    #[must_use]
    pub fn literals(&self, predicate: &str) -> Vec<&str> {
        self.get(predicate)
            .unwrap_or_default()
            .iter()
            .filter_map(|n| match n {
                Node::Literal(s) => Some(s.as_str()),
                Node::Resource(_) => None,
            })
            .collect()
    }

    /// Child resources under a predicate.
    #[must_use]
    pub fn children(&self, predicate: &str) -> Vec<&Resource> {
        self.get(predicate)
            .unwrap_or_default()
            .iter()
            .filter_map(|n| match n {
                Node::Resource(r) => Some(r),
                Node::Literal(_) => None,
            })
            .collect()
    }

    /// Number of predicates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Returns true if the resource has no predicates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Iterate over predicates and their values.
    pub fn iter(&self) -> indexmap::map::Iter<'_, String, Vec<Node>> {
        self.properties.iter()
    }

    /// Render the resource as JSON, keeping predicate order.
    ///
    /// # Errors
    ///
    /// Returns `MarcError::Json` if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Builds one [`Resource`] per record and sends it to a channel.
///
/// Each pipeline worker gets its own collector; the sender is cloned into
/// every one of them so the receiving side sees all records.
///
/// ```
/// use marckv::{ResourceBuilder, ResourceCollector};
///
/// let (tx, rx) = crossbeam_channel::unbounded();
/// let mut collector = ResourceCollector::new(tx);
/// collector.begin()?;
/// collector.end()?;
/// assert!(rx.try_recv()?.is_empty());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct ResourceCollector {
    sink: Sender<Resource>,
    current: Option<Resource>,
    sent: usize,
}

impl ResourceCollector {
    /// Create a collector sending finished resources to `sink`.
    #[must_use]
    pub fn new(sink: Sender<Resource>) -> Self {
        ResourceCollector {
            sink,
            current: None,
            sent: 0,
        }
    }

    /// Number of resources sent.
    #[must_use]
    pub fn sent(&self) -> usize {
        self.sent
    }
}

impl ResourceBuilder for ResourceCollector {
    fn begin(&mut self) -> anyhow::Result<()> {
        self.current = Some(Resource::new());
        Ok(())
    }

    fn build(&mut self, element: MappedElement) -> anyhow::Result<()> {
        self.current
            .get_or_insert_with(Resource::new)
            .attach(element);
        Ok(())
    }

    fn end(&mut self) -> anyhow::Result<()> {
        let Some(resource) = self.current.take() else {
            return Ok(());
        };
        self.sink
            .send(resource)
            .context("resource sink is disconnected")?;
        self.sent += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(predicate: &str, property: Option<&str>, value: &str) -> MappedElement {
        MappedElement {
            key: String::new(),
            predicate: predicate.to_string(),
            property: property.map(str::to_string),
            value: value.to_string(),
            source: None,
        }
    }

    #[test]
    fn test_translated_value_keeps_source() {
        let mut r = Resource::new();
        let mut language = element("language", Some("a"), "German");
        language.source = Some("ger".to_string());
        r.attach(language);
        r.attach(element("language", Some("b"), "x"));
        let mut kind = element("kind", None, "book");
        kind.source = Some("a".to_string());
        r.attach(kind);

        let languages = r.children("language");
        assert_eq!(languages.len(), 1);
        assert_eq!(languages[0].literals("a"), vec!["German"]);
        assert_eq!(languages[0].literals("aSource"), vec!["ger"]);
        assert_eq!(languages[0].literals("b"), vec!["x"]);
        assert!(languages[0].get("bSource").is_none());
        assert_eq!(r.literals("kind"), vec!["book"]);
        assert_eq!(r.literals("kindSource"), vec!["a"]);
    }

    #[test]
    fn test_attach_literals_and_children() {
        let mut r = Resource::new();
        r.attach(element("identifier", None, "ocn123"));
        r.attach(element("title", Some("main"), "One"));
        r.attach(element("title", Some("responsibility"), "Someone"));
        r.attach(element("title", Some("main"), "Two"));
        assert_eq!(r.literals("identifier"), vec!["ocn123"]);
        let titles = r.children("title");
        assert_eq!(titles.len(), 2);
        assert_eq!(titles[0].literals("responsibility"), vec!["Someone"]);
        assert_eq!(titles[1].literals("main"), vec!["Two"]);
    }

    #[test]
    fn test_to_json_keeps_order() {
        let mut r = Resource::new();
        r.add_literal("b", "1");
        let mut child = Resource::new();
        child.add_literal("x", "2");
        r.add_child("a", child);
        assert_eq!(r.to_json().unwrap(), r#"{"b":["1"],"a":[{"x":["2"]}]}"#);
    }

    #[test]
    fn test_collector_sends_one_resource_per_record() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut c = ResourceCollector::new(tx);
        for n in 0..3 {
            c.begin().unwrap();
            c.build(element("n", None, &n.to_string())).unwrap();
            c.end().unwrap();
        }
        assert_eq!(c.sent(), 3);
        let got: Vec<Resource> = rx.try_iter().collect();
        assert_eq!(got[2].literals("n"), vec!["2"]);
    }

    #[test]
    fn test_collector_fails_when_sink_dropped() {
        let (tx, rx) = crossbeam_channel::unbounded();
        drop(rx);
        let mut c = ResourceCollector::new(tx);
        c.begin().unwrap();
        assert!(c.end().is_err());
    }
}
