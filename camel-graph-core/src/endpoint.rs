//! Endpoint identity normalization
//!
//! Services report the same logical channel with different encodings and
//! synonymous schemes. [`normalize`] folds them onto one canonical string so
//! routes of different services can be linked by plain string equality, while
//! process-local endpoints stay scoped to the service that owns them.

use serde::Serialize;

/// Schemes only addressable inside one JVM; they get the service name in front.
const LOCAL_SCHEMES: &[&str] = &["direct", "direct-vm", "timer"];

const VIRTUAL_TOPIC: &str = "VirtualTopic";

/// Turn a raw endpoint URI into its canonical identity.
///
/// Never fails: anything the pipeline does not recognise passes through.
/// An identity already scoped to `service_name` is normalized below its
/// prefix only, so feeding the output back in returns it unchanged.
pub fn normalize(service_name: &str, raw: &str) -> String {
    let unscoped = scoped_remainder(service_name, raw).unwrap_or(raw);
    let uri = canonical(unscoped);

    if is_local(&uri) {
        format!("{}:{}", service_name, uri)
    } else {
        uri
    }
}

fn canonical(raw: &str) -> String {
    let mut uri = raw
        .replace("%7B", "{")
        .replace("%7b", "{")
        .replace("%7D", "}")
        .replace("%7d", "}");
    // ":////x" turns into "://x" after one pass
    while uri.contains("://") {
        uri = uri.replace("://", ":");
    }
    uri = uri.replace("activemq:", "jms:");

    if let Some(pos) = uri.find('?') {
        uri.truncate(pos);
    }

    // local channel names are not broker topics
    if is_local(&uri) {
        return uri;
    }

    if let Some(pos) = uri.find(VIRTUAL_TOPIC) {
        uri = match scheme(&uri) {
            Some(s) if s.len() < pos => format!("{}:{}", s, &uri[pos..]),
            _ => uri[pos..].to_string(),
        };
    }

    uri
}

fn scheme(uri: &str) -> Option<&str> {
    uri.split_once(':').map(|(s, _)| s)
}

fn is_local(uri: &str) -> bool {
    scheme(uri).is_some_and(|s| LOCAL_SCHEMES.contains(&s))
}

// "svc:direct:start" -> "direct:start"
fn scoped_remainder<'a>(service_name: &str, uri: &'a str) -> Option<&'a str> {
    uri.strip_prefix(service_name)
        .and_then(|rest| rest.strip_prefix(':'))
        .filter(|rest| is_local(rest))
}

/// Ordered, de-duplicated endpoint identities of one route
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Endpoints {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,
}

impl Endpoints {
    /// Returns true if the identity was not present yet
    pub fn add_input(&mut self, identity: String) -> bool {
        push_unique(&mut self.inputs, identity)
    }

    pub fn add_output(&mut self, identity: String) -> bool {
        push_unique(&mut self.outputs, identity)
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }
}

fn push_unique(list: &mut Vec<String>, identity: String) -> bool {
    if list.contains(&identity) {
        return false;
    }
    list.push(identity);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activemq_aliased_and_query_stripped() {
        assert_eq!(normalize("svc", "activemq://Foo?x=1"), "jms:Foo");
        assert_eq!(normalize("svc", "activemq:queue:orders"), "jms:queue:orders");
    }

    #[test]
    fn test_local_schemes_scoped_to_service() {
        assert_eq!(normalize("svc", "direct:start"), "svc:direct:start");
        assert_eq!(normalize("svc", "direct-vm:shared"), "svc:direct-vm:shared");
        assert_eq!(normalize("svc", "timer://poll?period=5000"), "svc:timer:poll");
        assert_ne!(normalize("a", "direct:start"), normalize("b", "direct:start"));
    }

    #[test]
    fn test_brace_escapes_decoded() {
        assert_eq!(normalize("svc", "queue:%7Bfoo%7D"), "queue:{foo}");
        assert_eq!(normalize("svc", "queue:%7bfoo%7d"), "queue:{foo}");
    }

    #[test]
    fn test_virtual_topic_collapse() {
        assert_eq!(
            normalize("svc", "jms:VirtualTopic.Bar.Out?durable=true"),
            "jms:VirtualTopic.Bar.Out"
        );
        assert_eq!(
            normalize("svc", "activemq:queue:Consumer.A.VirtualTopic.Orders"),
            "jms:VirtualTopic.Orders"
        );
        assert_eq!(
            normalize("other", "jms:topic:VirtualTopic.Orders"),
            "jms:VirtualTopic.Orders"
        );
        assert_eq!(normalize("svc", "Consumer.VirtualTopic.X"), "VirtualTopic.X");
    }

    #[test]
    fn test_unparseable_passes_through() {
        assert_eq!(normalize("svc", ""), "");
        assert_eq!(normalize("svc", "not a uri"), "not a uri");
        assert_eq!(normalize("svc", "http4://host:8080/path"), "http4:host:8080/path");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let inputs = [
            "activemq://Foo?x=1",
            "direct:start",
            "direct-vm:a",
            "timer://tick",
            "queue:%7Bfoo%7D",
            "jms:VirtualTopic.Bar.Out?durable=true",
            "activemq:queue:Consumer.A.VirtualTopic.Orders",
            "seda:work?concurrentConsumers=5",
            "file:///tmp/in",
            "file:////tmp/in",
            "direct:VirtualTopic.Orders",
            "timer:VirtualTopicPoller?period=5",
        ];
        for raw in inputs {
            let once = normalize("svc", raw);
            assert_eq!(normalize("svc", &once), once, "not idempotent for {}", raw);
        }

        // service names that look like schemes or carry a query mark
        for service in ["activemq", "a?b", "jms"] {
            let once = normalize(service, "direct:start");
            assert_eq!(once, format!("{}:direct:start", service));
            assert_eq!(normalize(service, &once), once, "not idempotent for {}", service);
        }
    }

    #[test]
    fn test_local_names_keep_virtual_topic_text() {
        assert_eq!(
            normalize("svc", "direct:VirtualTopic.Orders"),
            "svc:direct:VirtualTopic.Orders"
        );
        assert_eq!(
            normalize("svc", "timer:VirtualTopicPoller?period=5"),
            "svc:timer:VirtualTopicPoller"
        );
    }

    #[test]
    fn test_endpoints_dedup_keeps_order() {
        let mut e = Endpoints::default();
        assert!(e.add_output("jms:a".into()));
        assert!(e.add_output("jms:b".into()));
        assert!(!e.add_output("jms:a".into()));
        assert!(e.add_input("jms:a".into()));
        assert_eq!(e.outputs, vec!["jms:a", "jms:b"]);
        assert_eq!(e.inputs, vec!["jms:a"]);
    }
}
