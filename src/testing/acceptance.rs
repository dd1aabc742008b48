//! Multi-step acceptance cases.
//!
//! An [`AcceptanceCase`] is a list of [`Step`]s, each declaring the full set
//! of resources and data sources that should exist after it is applied. The
//! runner converges the provider towards each step in turn, refreshes every
//! resource, requires a follow-up plan to be empty, then runs the step's
//! [`Check`]s. After the last step everything is destroyed and each resource
//! must read back as gone.
//!
//! String values of the form `${address.attribute}` in a configuration are
//! replaced with the attribute of an already applied resource or data source.
//! Resource addresses are `type.name`; data source addresses are
//! `data.type.name`.
//!
//! Live runs are opt-in: set [`ACC_ENV`] and the credentials the case needs.

use std::collections::BTreeMap;

use rand::distr::Alphanumeric;
use rand::Rng;
use serde_json::Value;
use tracing::{info, warn};

use super::{ProviderTester, TestError};
use crate::service::ProviderService;

/// Environment variable that enables live acceptance runs.
pub const ACC_ENV: &str = "ATLAS_ACC";

/// Whether live acceptance runs were requested.
pub fn enabled() -> bool {
    std::env::var(ACC_ENV).is_ok_and(|v| !v.is_empty() && v != "0")
}

/// Read a required environment variable, or `None` to skip the case.
pub fn required_env(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => {
            warn!(variable = name, "Skipping acceptance case: variable not set");
            None
        },
    }
}

/// `{prefix}-` followed by ten random lowercase alphanumerics.
pub fn random_name(prefix: &str) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect();
    format!("{}-{}", prefix, suffix.to_lowercase())
}

/// `{prefix}.{n}` with a random final octet.
pub fn random_ip(prefix: &str) -> String {
    format!("{}.{}", prefix, rand::rng().random_range(0..=255u8))
}

/// Error type for acceptance runs.
#[derive(Debug, thiserror::Error)]
pub enum AcceptanceError {
    /// A provider call or lifecycle check failed while applying a step.
    #[error("step {step}: {source}")]
    Apply {
        /// 1-based step number.
        step: usize,
        /// What went wrong.
        #[source]
        source: TestError,
    },

    /// A configuration referenced an attribute that does not exist.
    #[error("step {step}: unresolved reference ${{{reference}}}")]
    Reference {
        /// 1-based step number.
        step: usize,
        /// The `address.attribute` text.
        reference: String,
    },

    /// A check did not hold.
    #[error("step {step}: {message}")]
    Check {
        /// 1-based step number.
        step: usize,
        /// Description of the mismatch.
        message: String,
    },

    /// A step declared an expected error but applied cleanly.
    #[error("step {step}: expected an error containing '{expected}', but the step succeeded")]
    ExpectedError {
        /// 1-based step number.
        step: usize,
        /// The expected error substring.
        expected: String,
    },

    /// Tearing down a resource failed.
    #[error("destroying {address}: {source}")]
    Destroy {
        /// The resource address.
        address: String,
        /// What went wrong.
        #[source]
        source: TestError,
    },
}

impl AcceptanceError {
    fn apply(step: usize, source: impl Into<TestError>) -> Self {
        Self::Apply {
            step,
            source: source.into(),
        }
    }
}

/// A resource or data source declared by a step.
#[derive(Debug, Clone)]
struct Block {
    address: String,
    type_name: String,
    config: Value,
}

/// Post-apply assertion against an address in the step's state.
#[derive(Debug, Clone)]
pub enum Check {
    /// The attribute at `path` equals `expected`.
    Equals {
        /// Resource or data source address.
        address: String,
        /// Dotted attribute path.
        path: String,
        /// Expected value.
        expected: Value,
    },
    /// The attribute at `path` is present and not null or empty.
    Set {
        /// Resource or data source address.
        address: String,
        /// Dotted attribute path.
        path: String,
    },
    /// The array at `path` contains `element`.
    Contains {
        /// Resource or data source address.
        address: String,
        /// Dotted attribute path.
        path: String,
        /// Element that must be present.
        element: Value,
    },
}

impl Check {
    /// `path` on `address` equals `expected`.
    ///
    /// A path segment of `#` yields the length of the array it follows, so
    /// `usernames.#` checks the member count.
    pub fn attr(address: impl Into<String>, path: impl Into<String>, expected: impl Into<Value>) -> Self {
        Self::Equals {
            address: address.into(),
            path: path.into(),
            expected: expected.into(),
        }
    }

    /// `path` on `address` has a non-empty value.
    pub fn attr_set(address: impl Into<String>, path: impl Into<String>) -> Self {
        Self::Set {
            address: address.into(),
            path: path.into(),
        }
    }

    /// The array at `path` on `address` contains `element`.
    pub fn contains(
        address: impl Into<String>,
        path: impl Into<String>,
        element: impl Into<Value>,
    ) -> Self {
        Self::Contains {
            address: address.into(),
            path: path.into(),
            element: element.into(),
        }
    }

    fn verify(&self, states: &BTreeMap<String, Value>) -> Result<(), String> {
        let (address, path) = match self {
            Check::Equals { address, path, .. }
            | Check::Set { address, path }
            | Check::Contains { address, path, .. } => (address, path),
        };
        let state = states
            .get(address)
            .ok_or_else(|| format!("{}: not found in state", address))?;
        let actual = lookup(state, path);

        match self {
            Check::Equals { expected, .. } => match actual {
                Some(actual) if &actual == expected => Ok(()),
                actual => Err(format!(
                    "{}.{}: expected {}, got {}",
                    address,
                    path,
                    expected,
                    actual.unwrap_or(Value::Null)
                )),
            },
            Check::Set { .. } => match actual {
                Some(Value::Null) | None => Err(format!("{}.{}: not set", address, path)),
                Some(Value::String(s)) if s.is_empty() => {
                    Err(format!("{}.{}: empty", address, path))
                },
                Some(_) => Ok(()),
            },
            Check::Contains { element, .. } => match actual {
                Some(Value::Array(items)) if items.contains(element) => Ok(()),
                actual => Err(format!(
                    "{}.{}: {} does not contain {}",
                    address,
                    path,
                    actual.unwrap_or(Value::Null),
                    element
                )),
            },
        }
    }
}

/// Verifies that importing an applied resource reproduces its state.
#[derive(Clone)]
struct ImportCheck {
    address: String,
    import_id: fn(&Value) -> String,
    ignore: Vec<String>,
}

impl std::fmt::Debug for ImportCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportCheck")
            .field("address", &self.address)
            .field("ignore", &self.ignore)
            .finish_non_exhaustive()
    }
}

/// One desired configuration of a case.
#[derive(Debug, Clone, Default)]
pub struct Step {
    resources: Vec<Block>,
    data_sources: Vec<Block>,
    checks: Vec<Check>,
    import: Option<ImportCheck>,
    expect_error: Option<String>,
}

impl Step {
    /// An empty step. Applying it destroys everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare resource `name` of `type_name`, addressed as `type_name.name`.
    pub fn resource(mut self, type_name: &str, name: &str, config: Value) -> Self {
        self.resources.push(Block {
            address: format!("{}.{}", type_name, name),
            type_name: type_name.to_string(),
            config,
        });
        self
    }

    /// Declare data source `name` of `type_name`, addressed as
    /// `data.type_name.name`. Data sources are read after resources apply.
    pub fn data_source(mut self, type_name: &str, name: &str, config: Value) -> Self {
        self.data_sources.push(Block {
            address: format!("data.{}.{}", type_name, name),
            type_name: type_name.to_string(),
            config,
        });
        self
    }

    /// Add a post-apply check.
    pub fn check(mut self, check: Check) -> Self {
        self.checks.push(check);
        self
    }

    /// After applying, import `address` using the id `import_id` derives from
    /// its state and require the result to match, apart from `ignore`.
    pub fn import_verify(mut self, address: &str, import_id: fn(&Value) -> String, ignore: &[&str]) -> Self {
        self.import = Some(ImportCheck {
            address: address.to_string(),
            import_id,
            ignore: ignore.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    /// Require the step to fail with an error containing `substring`.
    pub fn expect_error(mut self, substring: &str) -> Self {
        self.expect_error = Some(substring.to_string());
        self
    }
}

#[derive(Debug, Clone)]
struct Applied {
    type_name: String,
    config: Value,
    state: Value,
}

/// A named sequence of steps.
#[derive(Debug, Clone)]
pub struct AcceptanceCase {
    name: String,
    steps: Vec<Step>,
}

impl AcceptanceCase {
    /// An empty case.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Append a step.
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Apply every step, then destroy what is left.
    ///
    /// Resources are destroyed even when a step fails; the step's error wins
    /// over any cleanup failure.
    pub async fn run<P: ProviderService>(&self, tester: &ProviderTester<P>) -> Result<(), AcceptanceError> {
        info!(case = %self.name, steps = self.steps.len(), "Running acceptance case");
        let mut applied: Vec<(String, Applied)> = Vec::new();

        for (index, step) in self.steps.iter().enumerate() {
            let number = index + 1;
            let outcome = apply_step(tester, number, step, &mut applied).await;

            let failure = match (&step.expect_error, outcome) {
                (None, Ok(())) => None,
                (None, Err(e)) => Some(e),
                (Some(expected), Err(e)) if e.to_string().contains(expected.as_str()) => {
                    info!(case = %self.name, step = number, "Step failed as expected");
                    None
                },
                (Some(_), Err(e)) => Some(e),
                (Some(expected), Ok(())) => Some(AcceptanceError::ExpectedError {
                    step: number,
                    expected: expected.clone(),
                }),
            };

            if let Some(err) = failure {
                if let Err(cleanup) = destroy(tester, &mut applied).await {
                    warn!(case = %self.name, error = %cleanup, "Cleanup after failed step also failed");
                }
                return Err(err);
            }
        }

        destroy(tester, &mut applied).await?;
        info!(case = %self.name, "Acceptance case passed");
        Ok(())
    }
}

async fn apply_step<P: ProviderService>(
    tester: &ProviderTester<P>,
    step: usize,
    desired: &Step,
    applied: &mut Vec<(String, Applied)>,
) -> Result<(), AcceptanceError> {
    // Resources dropped from the configuration go first, newest first.
    let mut index = applied.len();
    while index > 0 {
        index -= 1;
        let address = applied[index].0.clone();
        if desired.resources.iter().all(|b| b.address != address) {
            let (_, gone) = applied.remove(index);
            tester
                .lifecycle_delete(&gone.type_name, gone.state)
                .await
                .map_err(|e| AcceptanceError::apply(step, e))?;
        }
    }

    for block in &desired.resources {
        let config = resolve(&block.config, &state_map(applied, &BTreeMap::new()))
            .map_err(|reference| AcceptanceError::Reference { step, reference })?;

        let existing = applied.iter().position(|(address, _)| *address == block.address);
        let state = match existing {
            Some(i) => {
                let prior = applied[i].1.state.clone();
                tester
                    .lifecycle_update(&block.type_name, prior, config.clone())
                    .await
            },
            None => tester.lifecycle_create(&block.type_name, config.clone()).await,
        }
        .map_err(|e| AcceptanceError::apply(step, e))?;

        let entry = Applied {
            type_name: block.type_name.clone(),
            config,
            state,
        };
        match existing {
            Some(i) => applied[i].1 = entry,
            None => applied.push((block.address.clone(), entry)),
        }
    }

    for (address, resource) in applied.iter_mut() {
        resource.state = tester
            .refresh(&resource.type_name, resource.state.clone())
            .await
            .map_err(|e| AcceptanceError::apply(step, e))?;

        let plan = tester
            .plan_update(&resource.type_name, resource.state.clone(), resource.config.clone())
            .await
            .map_err(|e| AcceptanceError::apply(step, e))?;
        if !plan.is_no_op() {
            let paths: Vec<&str> = plan.changes.iter().map(|c| c.path.as_str()).collect();
            return Err(AcceptanceError::Check {
                step,
                message: format!("{}: plan after apply is not empty: {:?}", address, paths),
            });
        }
    }

    let mut data = BTreeMap::new();
    for block in &desired.data_sources {
        let config = resolve(&block.config, &state_map(applied, &data))
            .map_err(|reference| AcceptanceError::Reference { step, reference })?;
        tester
            .validate_data_source_config(&block.type_name, config.clone())
            .await
            .map_err(|e| AcceptanceError::apply(step, e))?;
        let value = tester
            .read_data_source(&block.type_name, config)
            .await
            .map_err(|e| AcceptanceError::apply(step, e))?;
        data.insert(block.address.clone(), value);
    }

    let states = state_map(applied, &data);
    for check in &desired.checks {
        check
            .verify(&states)
            .map_err(|message| AcceptanceError::Check { step, message })?;
    }

    if let Some(import) = &desired.import {
        verify_import(tester, step, import, applied).await?;
    }
    Ok(())
}

async fn verify_import<P: ProviderService>(
    tester: &ProviderTester<P>,
    step: usize,
    import: &ImportCheck,
    applied: &[(String, Applied)],
) -> Result<(), AcceptanceError> {
    let check_failed = |message: String| AcceptanceError::Check { step, message };

    let (_, resource) = applied
        .iter()
        .find(|(address, _)| *address == import.address)
        .ok_or_else(|| check_failed(format!("{}: nothing to import", import.address)))?;

    let id = (import.import_id)(&resource.state);
    let imported = tester
        .import_resource(&resource.type_name, &id)
        .await
        .map_err(|e| AcceptanceError::apply(step, e))?;
    let [imported] = imported.as_slice() else {
        return Err(check_failed(format!(
            "{}: import of {} returned {} resources",
            import.address,
            id,
            imported.len()
        )));
    };

    let strip = |state: &Value| {
        let mut state = state.clone();
        if let Some(map) = state.as_object_mut() {
            for field in &import.ignore {
                map.remove(field);
            }
        }
        state
    };
    if strip(&imported.state) != strip(&resource.state) {
        return Err(check_failed(format!(
            "{}: imported state {} differs from {}",
            import.address, imported.state, resource.state
        )));
    }
    Ok(())
}

async fn destroy<P: ProviderService>(
    tester: &ProviderTester<P>,
    applied: &mut Vec<(String, Applied)>,
) -> Result<(), AcceptanceError> {
    while let Some((address, resource)) = applied.pop() {
        tester
            .lifecycle_delete(&resource.type_name, resource.state)
            .await
            .map_err(|source| AcceptanceError::Destroy { address, source })?;
    }
    Ok(())
}

fn state_map(applied: &[(String, Applied)], data: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    applied
        .iter()
        .map(|(address, resource)| (address.clone(), resource.state.clone()))
        .chain(data.iter().map(|(k, v)| (k.clone(), v.clone())))
        .collect()
}

/// Substitute `${address.attribute}` references, returning the first
/// unresolved reference on failure.
fn resolve(config: &Value, states: &BTreeMap<String, Value>) -> Result<Value, String> {
    match config {
        Value::String(s) => match s.strip_prefix("${").and_then(|r| r.strip_suffix('}')) {
            Some(reference) => reference
                .rsplit_once('.')
                .and_then(|(address, attr)| states.get(address).and_then(|state| lookup(state, attr)))
                .filter(|value| !value.is_null())
                .ok_or_else(|| reference.to_string()),
            None => Ok(config.clone()),
        },
        Value::Array(items) => items
            .iter()
            .map(|item| resolve(item, states))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| resolve(v, states).map(|v| (k.clone(), v)))
            .collect::<Result<serde_json::Map<_, _>, _>>()
            .map(Value::Object),
        _ => Ok(config.clone()),
    }
}

/// Follow a dotted path. `#` after an array yields its length.
fn lookup(state: &Value, path: &str) -> Option<Value> {
    let mut current = state;
    for segment in path.split('.') {
        current = match (segment, current) {
            ("#", Value::Array(items)) => return Some(Value::from(items.len())),
            (index, Value::Array(items)) => items.get(index.parse::<usize>().ok()?)?,
            (key, Value::Object(map)) => map.get(key)?,
            _ => return None,
        };
    }
    Some(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{FakeAtlas, FakeCall};
    use crate::AtlasProvider;
    use serde_json::json;
    use std::sync::Arc;

    const TEAM: &str = "atlas_team";
    const ENTRY: &str = "atlas_project_ip_access_list";

    async fn tester() -> (Arc<FakeAtlas>, ProviderTester<AtlasProvider>) {
        let fake = Arc::new(FakeAtlas::new());
        for name in ["alice", "bob", "carol"] {
            fake.add_user(name).await;
        }
        let tester = ProviderTester::new(AtlasProvider::with_client(fake.clone()));
        (fake, tester)
    }

    fn team_import_id(state: &Value) -> String {
        format!(
            "{}-{}",
            state["org_id"].as_str().unwrap_or_default(),
            state["team_id"].as_str().unwrap_or_default()
        )
    }

    #[test]
    fn test_random_helpers() {
        let name = random_name("test-acc");
        assert!(name.starts_with("test-acc-"));
        assert_eq!(name.len(), "test-acc-".len() + 10);
        assert_eq!(name, name.to_lowercase());

        let ip = random_ip("179.154.226");
        let octet: u16 = ip.rsplit('.').next().unwrap().parse().unwrap();
        assert!(ip.starts_with("179.154.226."));
        assert!(octet <= 255);
    }

    #[test]
    fn test_lookup_paths() {
        let state = json!({"usernames": ["alice", "bob"], "nested": {"k": "v"}});
        assert_eq!(lookup(&state, "usernames.#"), Some(json!(2)));
        assert_eq!(lookup(&state, "usernames.1"), Some(json!("bob")));
        assert_eq!(lookup(&state, "nested.k"), Some(json!("v")));
        assert_eq!(lookup(&state, "usernames.7"), None);
        assert_eq!(lookup(&state, "missing"), None);
    }

    #[test]
    fn test_resolve_references() {
        let mut states = BTreeMap::new();
        states.insert("atlas_team.test".to_string(), json!({"team_id": "t1"}));

        let resolved = resolve(
            &json!({"id": "${atlas_team.test.team_id}", "keep": "plain", "list": ["${atlas_team.test.team_id}"]}),
            &states,
        )
        .unwrap();
        assert_eq!(resolved, json!({"id": "t1", "keep": "plain", "list": ["t1"]}));

        let err = resolve(&json!({"id": "${atlas_team.other.team_id}"}), &states).unwrap_err();
        assert_eq!(err, "atlas_team.other.team_id");
    }

    #[tokio::test]
    async fn test_team_case_converges_and_destroys() {
        let (fake, tester) = tester().await;
        let address = "atlas_team.test";

        AcceptanceCase::new("team basic")
            .step(
                Step::new()
                    .resource(TEAM, "test", json!({"org_id": "o1", "name": "eng", "usernames": ["alice", "carol"]}))
                    .check(Check::attr_set(address, "org_id"))
                    .check(Check::attr(address, "name", "eng"))
                    .check(Check::attr(address, "usernames.#", 2))
                    .import_verify(address, team_import_id, &[]),
            )
            .step(
                Step::new()
                    .resource(TEAM, "test", json!({"org_id": "o1", "name": "platform", "usernames": ["alice", "bob"]}))
                    .check(Check::attr(address, "name", "platform"))
                    .check(Check::contains(address, "usernames", "bob")),
            )
            .run(&tester)
            .await
            .unwrap();

        assert!(!fake.has_team("t1").await);
        assert_eq!(fake.calls(FakeCall::CreateTeam).await, 1);
    }

    #[tokio::test]
    async fn test_data_source_reads_applied_entry() {
        let (_, tester) = tester().await;
        let ip = random_ip("179.154.226");
        let comment = format!("TestAcc for ipAddress ({})", ip);

        AcceptanceCase::new("access list lookup")
            .step(
                Step::new()
                    .resource(ENTRY, "test", json!({"project_id": "p1", "ip_address": ip, "comment": comment}))
                    .data_source(
                        ENTRY,
                        "test",
                        json!({
                            "project_id": "${atlas_project_ip_access_list.test.project_id}",
                            "ip_address": "${atlas_project_ip_access_list.test.ip_address}",
                        }),
                    )
                    .check(Check::attr("data.atlas_project_ip_access_list.test", "ip_address", ip.as_str()))
                    .check(Check::attr("data.atlas_project_ip_access_list.test", "comment", comment.as_str())),
            )
            .run(&tester)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failed_check_still_destroys() {
        let (fake, tester) = tester().await;

        let err = AcceptanceCase::new("bad check")
            .step(
                Step::new()
                    .resource(TEAM, "test", json!({"org_id": "o1", "name": "eng", "usernames": ["alice"]}))
                    .check(Check::attr("atlas_team.test", "name", "other")),
            )
            .run(&tester)
            .await
            .unwrap_err();

        assert!(matches!(err, AcceptanceError::Check { step: 1, .. }));
        assert!(err.to_string().contains("expected \"other\""));
        assert!(!fake.has_team("t1").await);
    }

    #[tokio::test]
    async fn test_expected_error_step() {
        let (_, tester) = tester().await;

        AcceptanceCase::new("unknown user")
            .step(
                Step::new()
                    .resource(TEAM, "test", json!({"org_id": "o1", "name": "eng", "usernames": ["mallory"]}))
                    .expect_error("error creating team"),
            )
            .run(&tester)
            .await
            .unwrap();

        let err = AcceptanceCase::new("no error")
            .step(
                Step::new()
                    .resource(TEAM, "test", json!({"org_id": "o1", "name": "eng", "usernames": []}))
                    .expect_error("boom"),
            )
            .run(&tester)
            .await
            .unwrap_err();
        assert!(matches!(err, AcceptanceError::ExpectedError { step: 1, .. }));
    }

    #[tokio::test]
    async fn test_resource_removed_between_steps_is_deleted() {
        let (fake, tester) = tester().await;

        AcceptanceCase::new("drop resource")
            .step(Step::new().resource(
                ENTRY,
                "a",
                json!({"project_id": "p1", "cidr_block": "10.0.0.0/24", "comment": "a"}),
            ))
            .step(Step::new())
            .run(&tester)
            .await
            .unwrap();

        assert_eq!(fake.calls(FakeCall::DeleteAccessListEntry).await, 1);
    }
}
