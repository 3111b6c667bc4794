//! `camel-graph check`: validate the configuration and probe every service once

use std::path::Path;

use camel_graph_core::config::{GraphConfig, ServiceConfig};
use camel_graph_core::fetch::Fetcher;
use camel_graph_core::{Error, jolokia};

#[derive(Debug)]
pub struct Check {
    pub name: String,
    pub passed: bool,
    pub message: String,
    pub hint: Option<String>,
}

impl Check {
    fn ok(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            message: message.into(),
            hint: None,
        }
    }

    fn fail(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            message: message.into(),
            hint: None,
        }
    }

    fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Print a report; returns false if any service could not be polled
pub async fn run_check(path: &Path, config: &GraphConfig, fetcher: &dyn Fetcher) -> bool {
    println!("camel-graph check\n");
    println!("Configuration: {}", path.display());
    println!(
        "  service interval {}s, route interval {}s",
        config.service_update_interval_seconds, config.route_update_interval_seconds
    );
    match &config.metrics.graphite_url {
        Some(url) => println!("  metrics: graphite at {} (prefix {})", url, config.metrics.prefix),
        None => println!("  metrics: discarded (no graphite url)"),
    }
    println!();

    let mut failed = Vec::new();
    for env in &config.environments {
        println!("{}:", env.name);
        for svc in &env.services {
            let check = check_service(fetcher, svc).await;
            print_check(&check);
            if !check.passed {
                failed.push(format!("{}/{}", env.name, check.name));
            }
        }
        println!();
    }

    if failed.is_empty() {
        println!("All services reachable!");
        true
    } else {
        println!("Unreachable: {}", failed.join(", "));
        false
    }
}

pub async fn check_service(fetcher: &dyn Fetcher, svc: &ServiceConfig) -> Check {
    let url = jolokia::routes_url(svc.url.trim_end_matches('/'));
    let result = match fetcher.fetch(&url, svc.authorization.as_ref()).await {
        Ok(body) => jolokia::parse_route_list(&body),
        Err(e) => Err(e),
    };

    match result {
        Ok(list) => Check::ok(&svc.name, format!("{} routes", list.value.len())),
        Err(e @ Error::RemoteStatus(_)) if e.to_string().contains("401") => {
            Check::fail(&svc.name, e.to_string())
                .with_hint("check the service's authorization block")
        }
        Err(e @ Error::Transport(_)) => {
            Check::fail(&svc.name, e.to_string())
                .with_hint(format!("is {} reachable from here?", svc.url))
        }
        Err(e) => Check::fail(&svc.name, e.to_string()),
    }
}

fn print_check(check: &Check) {
    let icon = if check.passed { "✓" } else { "✗" };
    let color = if check.passed { "\x1b[32m" } else { "\x1b[31m" };
    let reset = "\x1b[0m";

    println!("  {}{}{} {}: {}", color, icon, reset, check.name, check.message);

    if let Some(hint) = &check.hint {
        println!("    └─ {}", hint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use camel_graph_core::Result;
    use camel_graph_core::config::Authorization;

    struct Canned(Result<Vec<u8>>);

    #[async_trait]
    impl Fetcher for Canned {
        async fn fetch(&self, _url: &str, _auth: Option<&Authorization>) -> Result<Vec<u8>> {
            self.0.clone()
        }
    }

    fn svc() -> ServiceConfig {
        ServiceConfig {
            name: "orders".into(),
            url: "http://orders/".into(),
            color: None,
            authorization: None,
        }
    }

    #[tokio::test]
    async fn test_reachable_service_counts_routes() {
        let body = br#"{"value": {"a": {"RouteId": "r1"}, "b": {"RouteId": "r2"}}, "status": 200}"#;
        let check = check_service(&Canned(Ok(body.to_vec())), &svc()).await;
        assert!(check.passed);
        assert_eq!(check.message, "2 routes");
    }

    #[tokio::test]
    async fn test_unauthorized_gets_hint() {
        let fetcher = Canned(Err(Error::RemoteStatus("Status 401 Unauthorized".into())));
        let check = check_service(&fetcher, &svc()).await;
        assert!(!check.passed);
        assert!(check.hint.unwrap().contains("authorization"));
    }

    #[tokio::test]
    async fn test_transport_failure() {
        let fetcher = Canned(Err(Error::Transport("connection refused".into())));
        let check = check_service(&fetcher, &svc()).await;
        assert!(!check.passed);
        assert!(check.message.contains("connection refused"));
    }
}
