//! Per-endpoint reconciliation with bounded concurrency.
//!
//! Each wanted endpoint is converted, written, waited on and given its trigger
//! side effects independently. A failure is reported for that endpoint only.

use std::fmt;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde_json::Value;
use tracing::{error, info, instrument};

use crate::config::Config;
use crate::convert::{to_provider_resource, ProviderResource};
use crate::endpoint::{Endpoint, Trigger};
use crate::error::Result;
use crate::providers::functions::{self, CloudFunction, FunctionsClient};
use crate::providers::http::HttpClient;
use crate::providers::operations::ApiOperationPoller;
use crate::providers::run::{self, RunClient};
use crate::providers::tasks::{self, queue_from_endpoint, TasksClient};
use crate::providers::traits::{ApiClient, OperationPoller, PollOptions};

/// Clients and pollers for every API a deployment touches.
#[derive(Clone)]
pub struct Apis {
    pub functions: Arc<dyn ApiClient>,
    pub functions_poller: Arc<dyn OperationPoller>,
    pub run: Arc<dyn ApiClient>,
    pub run_poller: Arc<dyn OperationPoller>,
    pub tasks: Arc<dyn ApiClient>,
}

impl Apis {
    /// HTTP clients for the origins in `config`, authenticated with `access_token`.
    ///
    /// # Errors
    /// Returns an error if an HTTP client cannot be created.
    pub fn http(config: &Config, access_token: &str) -> Result<Self> {
        let client = |origin: &str, version: &str| -> Result<Arc<dyn ApiClient>> {
            Ok(Arc::new(HttpClient::new(
                origin,
                version,
                access_token,
                config.request_timeout,
            )?))
        };
        let functions = client(&config.functions_origin, functions::API_VERSION)?;
        let run = client(&config.run_origin, run::API_VERSION)?;
        let tasks = client(&config.tasks_origin, tasks::API_VERSION)?;

        Ok(Self {
            functions_poller: Arc::new(ApiOperationPoller::new(functions.clone())),
            run_poller: Arc::new(ApiOperationPoller::new(run.clone())),
            functions,
            run,
            tasks,
        })
    }
}

/// What happened to one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Created,
    Updated,
    /// The deployed hash already matches.
    Skipped,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Skipped => "skipped",
        })
    }
}

/// Result of reconciling one endpoint.
#[derive(Debug)]
pub struct Outcome {
    /// `id(region)` of the endpoint.
    pub endpoint: String,
    pub result: Result<Action>,
}

/// Reconciles endpoints against the provider APIs.
#[derive(Clone)]
pub struct Deployer {
    functions: FunctionsClient,
    functions_poller: Arc<dyn OperationPoller>,
    run: RunClient,
    run_poller: Arc<dyn OperationPoller>,
    tasks: TasksClient,
    config: Config,
}

impl Deployer {
    /// Deployer over `apis`, with concurrency, retry and polling from `config`.
    #[must_use]
    pub fn new(apis: Apis, config: Config) -> Self {
        Self {
            functions: FunctionsClient::new(apis.functions),
            functions_poller: apis.functions_poller,
            run: RunClient::new(apis.run, config.retry.clone()),
            run_poller: apis.run_poller,
            tasks: TasksClient::new(apis.tasks, config.retry.clone()),
            config,
        }
    }

    /// Reconcile every endpoint in `wanted`; `have` is what is deployed now.
    ///
    /// Outcomes are returned in the order of `wanted`.
    pub async fn deploy(&self, wanted: &[Endpoint], have: &[Endpoint]) -> Vec<Outcome> {
        let mut outcomes: Vec<(usize, Outcome)> = stream::iter(wanted.iter().enumerate())
            .map(|(index, endpoint)| async move {
                let existing = have.iter().find(|h| same_endpoint(h, endpoint));
                let result = self.reconcile(endpoint, existing).await;
                match &result {
                    Ok(action) => info!(endpoint = %endpoint, action = %action, "Reconciled endpoint"),
                    Err(e) => error!(endpoint = %endpoint, error = %e, "Failed to reconcile endpoint"),
                }
                (
                    index,
                    Outcome {
                        endpoint: endpoint.to_string(),
                        result,
                    },
                )
            })
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect()
            .await;

        outcomes.sort_by_key(|(index, _)| *index);
        outcomes.into_iter().map(|(_, outcome)| outcome).collect()
    }

    /// Reconcile one endpoint.
    ///
    /// # Errors
    /// Returns the first conversion, write, operation or side-effect error.
    #[instrument(skip(self, endpoint, existing), fields(endpoint = %endpoint))]
    pub async fn reconcile(&self, endpoint: &Endpoint, existing: Option<&Endpoint>) -> Result<Action> {
        if let Some(existing) = existing {
            if endpoint.hash.is_some() && existing.hash == endpoint.hash {
                return Ok(Action::Skipped);
            }
        }

        let action = if existing.is_some() {
            Action::Updated
        } else {
            Action::Created
        };

        let service = match to_provider_resource(endpoint)? {
            ProviderResource::ManagedFunction(function) => {
                let op = match action {
                    Action::Created => self.functions.create(&function).await?,
                    _ => self.functions.update(&function).await?,
                };
                let response = self.functions_poller.poll(&self.poll_options(op.name)).await?;
                backing_service(response)?.or_else(|| {
                    existing
                        .and_then(|e| e.run_service_id.as_ref())
                        .map(|id| format!("projects/{}/locations/{}/services/{id}", endpoint.project, endpoint.region))
                })
            }
            ProviderResource::ContainerService(service) => {
                let op = match action {
                    Action::Created => self.run.create(&service).await?,
                    _ => self.run.update(&service).await?,
                };
                self.run_poller.poll(&self.poll_options(op.name)).await?;
                Some(service.name)
            }
        };

        self.apply_trigger_side_effects(endpoint, action, service.as_deref())
            .await?;
        Ok(action)
    }

    async fn apply_trigger_side_effects(
        &self,
        endpoint: &Endpoint,
        action: Action,
        service: Option<&str>,
    ) -> Result<()> {
        let invoker = match &endpoint.trigger {
            Trigger::TaskQueue(trigger) => {
                let queue = queue_from_endpoint(endpoint)?;
                let created = self.tasks.upsert_queue(&queue).await?;
                if let Some(invoker) = &trigger.invoker {
                    self.tasks.set_enqueuer(&queue.name, invoker, created).await?;
                }
                None
            }
            Trigger::Https(trigger) => trigger.invoker.clone(),
            // Callable functions must stay reachable by client SDKs.
            Trigger::Callable(_) if action == Action::Created => Some(vec!["public".to_string()]),
            _ => None,
        };

        if let (Some(invoker), Some(service)) = (invoker, service) {
            self.run.set_invoker(&endpoint.project, service, &invoker).await?;
        }
        Ok(())
    }

    fn poll_options(&self, name: String) -> PollOptions {
        PollOptions {
            operation_resource_name: name,
            backoff: self.config.poll_backoff,
            max_backoff: self.config.poll_max_backoff,
            master_timeout: self.config.poll_timeout,
        }
    }
}

fn same_endpoint(a: &Endpoint, b: &Endpoint) -> bool {
    a.project == b.project && a.region == b.region && a.id == b.id && a.platform == b.platform
}

/// Backing service named in a finished function operation, if any.
fn backing_service(response: Value) -> Result<Option<String>> {
    if response.is_null() {
        return Ok(None);
    }
    let function: CloudFunction = serde_json::from_value(response)?;
    Ok(function.service_config.service.filter(|s| !s.is_empty()))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reqwest::Method;
    use serde_json::json;

    use super::*;
    use crate::endpoint::{CallableTrigger, HttpsTrigger, Platform, TaskQueueTrigger};
    use crate::error::Error;
    use crate::providers::fake::FakeClient;
    use crate::retry::RetryConfig;

    const FUNCTIONS: &str = "projects/p/locations/us-central1/functions";
    const SERVICE: &str = "projects/p/locations/us-central1/services/fn";

    struct Fakes {
        functions: Arc<FakeClient>,
        run: Arc<FakeClient>,
        tasks: Arc<FakeClient>,
    }

    impl Fakes {
        fn new(functions: FakeClient, run: FakeClient, tasks: FakeClient) -> Self {
            Self {
                functions: Arc::new(functions),
                run: Arc::new(run),
                tasks: Arc::new(tasks),
            }
        }

        fn deployer(&self) -> Deployer {
            let apis = Apis {
                functions: self.functions.clone(),
                functions_poller: Arc::new(ApiOperationPoller::new(self.functions.clone())),
                run: self.run.clone(),
                run_poller: Arc::new(ApiOperationPoller::new(self.run.clone())),
                tasks: self.tasks.clone(),
            };
            let config = Config {
                max_concurrency: 1,
                retry: RetryConfig::immediate(3),
                poll_backoff: Duration::ZERO,
                poll_max_backoff: Duration::ZERO,
                ..Config::default()
            };
            Deployer::new(apis, config)
        }

        fn assert_drained(&self) {
            assert!(self.functions.is_drained());
            assert!(self.run.is_drained());
            assert!(self.tasks.is_drained());
        }
    }

    fn endpoint(trigger: Trigger) -> Endpoint {
        Endpoint::new("fn", "p", "us-central1", Platform::FunctionsV2, trigger)
    }

    fn done(response: Value) -> Value {
        json!({ "name": "operations/op", "done": true, "response": response })
    }

    fn function_response() -> Value {
        json!({
            "name": format!("{FUNCTIONS}/fn"),
            "buildConfig": {},
            "serviceConfig": { "service": SERVICE }
        })
    }

    #[tokio::test]
    async fn test_unchanged_hash_is_skipped() {
        let fakes = Fakes::new(FakeClient::new(), FakeClient::new(), FakeClient::new());
        let mut ep = endpoint(Trigger::https());
        ep.hash = Some("h".into());

        let outcomes = fakes.deployer().deploy(&[ep.clone()], &[ep]).await;
        assert_eq!(outcomes[0].result.as_ref().unwrap(), &Action::Skipped);
        assert!(fakes.functions.calls().is_empty());
    }

    #[tokio::test]
    async fn test_creates_function_and_sets_invoker() {
        let fakes = Fakes::new(
            FakeClient::new()
                .ok(Method::POST, FUNCTIONS, json!({ "name": "operations/op" }))
                .ok(Method::GET, "operations/op", done(function_response())),
            FakeClient::new()
                .ok(Method::GET, &format!("{SERVICE}:getIamPolicy"), json!({ "etag": "e" }))
                .ok(Method::POST, &format!("{SERVICE}:setIamPolicy"), json!({})),
            FakeClient::new(),
        );
        let ep = endpoint(Trigger::Https(HttpsTrigger {
            invoker: Some(vec!["public".into()]),
        }));

        let outcomes = fakes.deployer().deploy(&[ep], &[]).await;
        assert_eq!(outcomes[0].endpoint, "fn(us-central1)");
        assert_eq!(outcomes[0].result.as_ref().unwrap(), &Action::Created);
        fakes.assert_drained();
    }

    #[tokio::test]
    async fn test_callable_is_public_on_create_only() {
        let fakes = Fakes::new(
            FakeClient::new()
                .ok(Method::PATCH, &format!("{FUNCTIONS}/fn"), json!({ "name": "operations/op" }))
                .ok(Method::GET, "operations/op", done(function_response())),
            FakeClient::new(),
            FakeClient::new(),
        );
        let ep = endpoint(Trigger::Callable(CallableTrigger {}));

        let outcomes = fakes.deployer().deploy(&[ep.clone()], &[ep]).await;
        assert_eq!(outcomes[0].result.as_ref().unwrap(), &Action::Updated);
        fakes.assert_drained();
    }

    #[tokio::test]
    async fn test_task_queue_side_effects() {
        let queue = "projects/p/locations/us-central1/queues/fn";
        let fakes = Fakes::new(
            FakeClient::new()
                .ok(Method::POST, FUNCTIONS, json!({ "name": "operations/op" }))
                .ok(Method::GET, "operations/op", done(function_response())),
            FakeClient::new(),
            FakeClient::new()
                .err(Method::GET, queue, 404, None)
                .ok(Method::POST, "projects/p/locations/us-central1/queues", json!({ "name": queue }))
                .ok(Method::POST, &format!("{queue}:setIamPolicy"), json!({})),
        );
        let ep = endpoint(Trigger::TaskQueue(TaskQueueTrigger {
            invoker: Some(vec!["sa@".into()]),
            ..TaskQueueTrigger::default()
        }));

        let outcomes = fakes.deployer().deploy(&[ep], &[]).await;
        assert_eq!(outcomes[0].result.as_ref().unwrap(), &Action::Created);
        fakes.assert_drained();
    }

    #[tokio::test]
    async fn test_failed_operation_is_reported() {
        let fakes = Fakes::new(
            FakeClient::new()
                .ok(Method::POST, FUNCTIONS, json!({ "name": "operations/op" }))
                .ok(
                    Method::GET,
                    "operations/op",
                    json!({ "name": "operations/op", "done": true, "error": { "code": 3, "message": "build failed" } }),
                ),
            FakeClient::new(),
            FakeClient::new(),
        );

        let outcomes = fakes.deployer().deploy(&[endpoint(Trigger::https())], &[]).await;
        assert!(matches!(
            outcomes[0].result,
            Err(Error::OperationFailed { ref message, .. }) if message == "build failed"
        ));
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_siblings() {
        let fakes = Fakes::new(FakeClient::new(), FakeClient::new(), FakeClient::new());
        let mut unchanged = endpoint(Trigger::https());
        unchanged.hash = Some("h".into());
        // A container service without an image cannot be converted.
        let broken = Endpoint::new("svc", "p", "us-central1", Platform::Run, Trigger::https());

        let outcomes = fakes
            .deployer()
            .deploy(&[broken, unchanged.clone()], &[unchanged])
            .await;
        assert_eq!(outcomes[0].endpoint, "svc(us-central1)");
        assert!(matches!(outcomes[0].result, Err(Error::InvalidEndpoint(_))));
        assert_eq!(outcomes[1].result.as_ref().unwrap(), &Action::Skipped);
    }

    #[test]
    fn test_backing_service() {
        assert_eq!(backing_service(Value::Null).unwrap(), None);
        assert_eq!(
            backing_service(function_response()).unwrap().as_deref(),
            Some(SERVICE)
        );
    }
}
