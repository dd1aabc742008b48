//! Live acceptance tests against a real Atlas organization.
//!
//! Run with:
//!
//! ```text
//! ATLAS_ACC=1 ATLAS_ACCESS_TOKEN=... ATLAS_ORG_ID=... ATLAS_PROJECT_ID=... \
//!     cargo test --features acceptance-tests --test acceptance
//! ```
//!
//! Each case skips itself when `ATLAS_ACC` or one of its variables is unset.

#![cfg(feature = "acceptance-tests")]

use atlas_provider::testing::acceptance::{
    enabled, random_ip, random_name, required_env, AcceptanceCase, Check, Step,
};
use atlas_provider::testing::ProviderTester;
use atlas_provider::AtlasProvider;
use serde_json::{json, Value};

const ENTRY: &str = "atlas_project_ip_access_list";
const TEAM: &str = "atlas_team";
const ENTRY_ADDRESS: &str = "atlas_project_ip_access_list.test";
const LOOKUP_ADDRESS: &str = "data.atlas_project_ip_access_list.test";

/// A configured tester, or `None` when live runs are disabled.
async fn live_tester() -> Option<ProviderTester<AtlasProvider>> {
    if !enabled() {
        eprintln!("skipping: ATLAS_ACC is not set");
        return None;
    }
    required_env("ATLAS_ACCESS_TOKEN")?;

    let _ = atlas_provider::try_init_logging();
    let tester = ProviderTester::new(AtlasProvider::new());
    // Credentials come from the environment.
    tester
        .configure(json!({}))
        .await
        .expect("provider configuration failed");
    Some(tester)
}

fn lookup_step(project_id: &str, field: &str, value: &str, comment: &str) -> Step {
    let reference = format!("${{{}.{}}}", ENTRY_ADDRESS, field);
    Step::new()
        .resource(
            ENTRY,
            "test",
            json!({"project_id": project_id, field: value, "comment": comment}),
        )
        .data_source(
            ENTRY,
            "test",
            json!({
                "project_id": format!("${{{}.project_id}}", ENTRY_ADDRESS),
                field: reference,
            }),
        )
        .check(Check::attr_set(LOOKUP_ADDRESS, "project_id"))
        .check(Check::attr_set(LOOKUP_ADDRESS, field))
        .check(Check::attr_set(LOOKUP_ADDRESS, "comment"))
        .check(Check::attr(LOOKUP_ADDRESS, "project_id", project_id))
        .check(Check::attr(LOOKUP_ADDRESS, field, value))
        .check(Check::attr(LOOKUP_ADDRESS, "comment", comment))
}

#[tokio::test]
async fn test_acc_access_list_lookup_by_ip_address() {
    let Some(tester) = live_tester().await else { return };
    let Some(project_id) = required_env("ATLAS_PROJECT_ID") else { return };

    let ip_address = random_ip("179.154.226");
    let comment = format!("TestAcc for ipAddress ({})", ip_address);

    AcceptanceCase::new("access list lookup by ip_address")
        .step(lookup_step(&project_id, "ip_address", &ip_address, &comment))
        .run(&tester)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_acc_access_list_lookup_by_cidr_block() {
    let Some(tester) = live_tester().await else { return };
    let Some(project_id) = required_env("ATLAS_PROJECT_ID") else { return };

    let cidr_block = format!("{}/32", random_ip("179.154.226"));
    let comment = format!("TestAcc for cidrBlock ({})", cidr_block);

    AcceptanceCase::new("access list lookup by cidr_block")
        .step(lookup_step(&project_id, "cidr_block", &cidr_block, &comment))
        .run(&tester)
        .await
        .unwrap();
}

/// Needs a security group in an AWS VPC already peered with the project.
#[tokio::test]
async fn test_acc_access_list_lookup_by_aws_security_group() {
    let Some(tester) = live_tester().await else { return };
    let Some(project_id) = required_env("ATLAS_PROJECT_ID") else { return };
    let Some(group) = required_env("AWS_SECURITY_GROUP_ID") else { return };

    let comment = format!("TestAcc for awsSecurityGroup ({})", group);

    AcceptanceCase::new("access list lookup by aws_security_group")
        .step(lookup_step(&project_id, "aws_security_group", &group, &comment))
        .run(&tester)
        .await
        .unwrap();
}

fn team_import_id(state: &Value) -> String {
    format!(
        "{}-{}",
        state["org_id"].as_str().unwrap_or_default(),
        state["team_id"].as_str().unwrap_or_default()
    )
}

/// `ATLAS_TEAM_USERNAMES` lists at least two existing organization users,
/// comma separated.
#[tokio::test]
async fn test_acc_team_lifecycle() {
    let Some(tester) = live_tester().await else { return };
    let Some(org_id) = required_env("ATLAS_ORG_ID") else { return };
    let Some(usernames) = required_env("ATLAS_TEAM_USERNAMES") else { return };

    let usernames: Vec<&str> = usernames.split(',').map(str::trim).collect();
    assert!(
        usernames.len() >= 2,
        "ATLAS_TEAM_USERNAMES needs at least two usernames"
    );
    let name = random_name("test-acc");
    let renamed = random_name("test-acc");
    let address = "atlas_team.test";

    AcceptanceCase::new("team lifecycle")
        .step(
            Step::new()
                .resource(
                    TEAM,
                    "test",
                    json!({"org_id": org_id, "name": name, "usernames": [usernames[0]]}),
                )
                .check(Check::attr_set(address, "team_id"))
                .check(Check::attr(address, "name", name.as_str()))
                .check(Check::attr(address, "usernames.#", 1))
                .import_verify(address, team_import_id, &[]),
        )
        .step(
            Step::new()
                .resource(
                    TEAM,
                    "test",
                    json!({"org_id": org_id, "name": renamed, "usernames": [usernames[1]]}),
                )
                .check(Check::attr(address, "name", renamed.as_str()))
                .check(Check::attr(address, "usernames.#", 1))
                .check(Check::contains(address, "usernames", usernames[1])),
        )
        .step(
            Step::new()
                .resource(
                    TEAM,
                    "test",
                    json!({"org_id": org_id, "name": renamed, "usernames": usernames}),
                )
                .check(Check::attr(address, "usernames.#", usernames.len())),
        )
        .run(&tester)
        .await
        .unwrap();
}
