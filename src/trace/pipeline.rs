//! Rules applied to finished spans before a trace is flushed to the agent.
use crate::path::path_group;

/// Mutable view of a finished span, implemented by the tracer's span type.
pub trait SpanMut {
    fn name(&self) -> &str;
    fn service(&self) -> &str;
    fn set_service(&mut self, service: &str);
    fn tag(&self, key: &str) -> Option<&str>;
    fn set_resource(&mut self, resource: String);
}

type Filter = Box<dyn Fn(&dyn SpanMut) -> bool + Send + Sync>;
type Processor = Box<dyn Fn(&mut dyn SpanMut) + Send + Sync>;

enum Rule {
    /// Drops spans the predicate matches.
    Filter(Filter),
    /// Modifies spans in place.
    Processor(Processor),
}

/// Ordered list of span filters and processors.
#[derive(Default)]
pub struct SpanPipeline {
    rules: Vec<Rule>,
}

const INBOUND_REQUEST_SPAN: &str = "rack.request";
const NEWRELIC_SERVICE: &str = "collector.newrelic.com";
const GROUPED_SERVICE_SUFFIXES: [&str; 3] = ["myshopify.com", "ngrok.io", "ngrok-free.app"];
const AWS_METADATA_HOSTS: [&str; 2] = ["169.254.169.254", "169.254.170.2"];
const HTTP_CLIENT_COMPONENTS: [&str; 5] = ["ethon", "faraday", "net/http", "httpclient", "httprb"];

impl SpanPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// The rules every service runs with: noise filtering, service grouping and low cardinality
    /// resources for outbound HTTP requests.
    pub fn standard() -> Self {
        Self::new()
            .filter(is_health_check)
            .filter(is_static_asset)
            .filter(is_newrelic_reporter)
            .processor(group_subdomain_services)
            .processor(tag_aws_services)
            .processor(group_http_client_resource)
    }

    /// Adds a rule dropping every span `predicate` returns true for.
    #[must_use]
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&dyn SpanMut) -> bool + Send + Sync + 'static,
    {
        self.rules.push(Rule::Filter(Box::new(predicate)));
        self
    }

    /// Adds a rule modifying spans in place.
    #[must_use]
    pub fn processor<F>(mut self, processor: F) -> Self
    where
        F: Fn(&mut dyn SpanMut) + Send + Sync + 'static,
    {
        self.rules.push(Rule::Processor(Box::new(processor)));
        self
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Runs every rule, in order, over `spans` and returns the spans that survive.
    pub fn process<S: SpanMut>(&self, mut spans: Vec<S>) -> Vec<S> {
        for rule in &self.rules {
            match rule {
                Rule::Filter(predicate) => spans.retain(|span| !predicate(span)),
                Rule::Processor(processor) => {
                    for span in spans.iter_mut() {
                        processor(span);
                    }
                }
            }
        }
        spans
    }
}

fn inbound_url_starts_with(span: &dyn SpanMut, prefixes: &[&str]) -> bool {
    span.name() == INBOUND_REQUEST_SPAN
        && span
            .tag("http.url")
            .is_some_and(|url| prefixes.iter().any(|p| url.starts_with(p)))
}

pub fn is_health_check(span: &dyn SpanMut) -> bool {
    inbound_url_starts_with(span, &["/health_check"])
}

pub fn is_static_asset(span: &dyn SpanMut) -> bool {
    inbound_url_starts_with(span, &["/assets", "/packs"])
}

pub fn is_newrelic_reporter(span: &dyn SpanMut) -> bool {
    span.service() == NEWRELIC_SERVICE
}

/// Collapses per-customer subdomains (`shop.myshopify.com`) into one service.
pub fn group_subdomain_services(span: &mut dyn SpanMut) {
    let grouped = GROUPED_SERVICE_SUFFIXES
        .iter()
        .copied()
        .find(|suffix| span.service().ends_with(suffix));
    if let Some(suffix) = grouped {
        span.set_service(suffix);
    }
}

/// Requests to the EC2/ECS metadata endpoints.
pub fn tag_aws_services(span: &mut dyn SpanMut) {
    if span
        .tag("peer.hostname")
        .is_some_and(|host| AWS_METADATA_HOSTS.contains(&host))
    {
        span.set_service("aws");
    }
}

/// Uses `<method> <path group>` as the resource of outbound HTTP requests, so that IDs in
/// paths don't create a resource each.
pub fn group_http_client_resource(span: &mut dyn SpanMut) {
    if !span
        .tag("component")
        .is_some_and(|c| HTTP_CLIENT_COMPONENTS.contains(&c))
    {
        return;
    }

    let method = span.tag("http.method").unwrap_or_default();
    let path = path_group(span.tag("http.url")).unwrap_or_default();
    let resource = format!("{method} {path}");
    span.set_resource(resource);
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{SpanMut, SpanPipeline};

    #[derive(Clone, Debug, Default, PartialEq)]
    struct TestSpan {
        pub name: String,
        pub service: String,
        pub resource: String,
        pub tags: HashMap<String, String>,
    }

    impl TestSpan {
        pub fn new(name: &str, service: &str) -> Self {
            Self {
                name: name.to_string(),
                service: service.to_string(),
                ..Default::default()
            }
        }

        pub fn with_tag(mut self, key: &str, value: &str) -> Self {
            self.tags.insert(key.to_string(), value.to_string());
            self
        }
    }

    impl SpanMut for TestSpan {
        fn name(&self) -> &str {
            &self.name
        }

        fn service(&self) -> &str {
            &self.service
        }

        fn set_service(&mut self, service: &str) {
            self.service = service.to_string();
        }

        fn tag(&self, key: &str) -> Option<&str> {
            self.tags.get(key).map(String::as_str)
        }

        fn set_resource(&mut self, resource: String) {
            self.resource = resource;
        }
    }

    fn request(url: &str) -> TestSpan {
        TestSpan::new("rack.request", "payments").with_tag("http.url", url)
    }

    #[test]
    fn test_filters_noise() {
        let spans = vec![
            request("/health_check"),
            request("/health_check/db"),
            request("/assets/app.css"),
            request("/packs/app.js"),
            request("/orders/12"),
            TestSpan::new("http.request", "collector.newrelic.com"),
            TestSpan::new("sidekiq.job", "payments").with_tag("http.url", "/health_check"),
        ];
        let kept = SpanPipeline::standard().process(spans);
        let names: Vec<(&str, Option<&str>)> = kept
            .iter()
            .map(|s| (s.name.as_str(), s.tag("http.url")))
            .collect();
        assert_eq!(
            names,
            [
                ("rack.request", Some("/orders/12")),
                ("sidekiq.job", Some("/health_check")),
            ]
        );
    }

    #[test]
    fn test_groups_services() {
        let spans = vec![
            TestSpan::new("http.request", "shop-1.myshopify.com"),
            TestSpan::new("http.request", "abc.ngrok.io"),
            TestSpan::new("http.request", "abc.ngrok-free.app"),
            TestSpan::new("http.request", "example.com"),
            TestSpan::new("http.request", "10.0.0.1").with_tag("peer.hostname", "169.254.170.2"),
        ];
        let services: Vec<String> = SpanPipeline::standard()
            .process(spans)
            .into_iter()
            .map(|s| s.service)
            .collect();
        assert_eq!(
            services,
            [
                "myshopify.com",
                "ngrok.io",
                "ngrok-free.app",
                "example.com",
                "aws"
            ]
        );
    }

    #[test]
    fn test_http_client_resource() {
        let spans = vec![
            TestSpan::new("faraday.request", "api.stripe.com")
                .with_tag("component", "faraday")
                .with_tag("http.method", "POST")
                .with_tag("http.url", "/v1/charges/ch_123/refund"),
            TestSpan::new("rack.request", "payments")
                .with_tag("component", "rack")
                .with_tag("http.url", "/orders/12"),
        ];
        let spans = SpanPipeline::standard().process(spans);
        assert_eq!(spans[0].resource, "POST /v1/charges/?/refund");
        assert_eq!(spans[1].resource, "");
    }

    #[test]
    fn test_custom_rules_run_in_order() {
        let pipeline = SpanPipeline::new()
            .processor(|span| span.set_service("renamed"))
            .filter(|span| span.service() == "renamed" && span.name() == "drop.me");
        assert_eq!(pipeline.len(), 2);

        let spans = pipeline.process(vec![
            TestSpan::new("drop.me", "a"),
            TestSpan::new("keep.me", "b"),
        ]);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].service, "renamed");
    }
}
