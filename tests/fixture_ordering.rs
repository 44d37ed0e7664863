//! Fixture graph behaviour across several tests of one module
//!
//! Collaborators are in-memory stand-ins that record their commits and
//! deletions, so the whole session runs without a cluster.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use kuadrant_testsuite::config::HarnessConfig;
use kuadrant_testsuite::errors::Result;
use kuadrant_testsuite::fixtures::{
    commit_all, FixtureDef, FixtureRegistry, FixtureRuntime, Parametrization, Scope, TestMeta, TestOutcome,
    TestRunner,
};
use kuadrant_testsuite::{Lifecycle, Settings};

type Journal = Arc<Mutex<Vec<String>>>;

struct Recorded {
    name: String,
    ready: bool,
    journal: Journal,
}

impl Recorded {
    fn record(&self, action: &str) {
        self.journal.lock().unwrap().push(format!("{} {}", action, self.name));
    }
}

#[async_trait]
impl Lifecycle for Recorded {
    fn describe(&self) -> String {
        self.name.clone()
    }

    async fn commit(&self) -> Result<()> {
        self.record("commit");
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        self.record("delete");
        Ok(())
    }

    async fn wait_for_ready(&self) -> bool {
        self.ready
    }
}

/// Fixture committing one recorded collaborator into its scope's finalizers
fn collaborator(name: &'static str, scope: Scope, ready: bool, journal: &Journal) -> FixtureDef {
    let journal = journal.clone();
    FixtureDef::shared(name, scope, move |ctx| {
        let resource = Arc::new(Recorded {
            name: name.to_string(),
            ready,
            journal: journal.clone(),
        });
        async move {
            commit_all(ctx.finalizers(), &[resource.clone() as Arc<dyn Lifecycle>]).await?;
            Ok(resource)
        }
    })
}

fn registry(journal: &Journal) -> FixtureRegistry {
    FixtureRegistry::new()
        .with(FixtureDef::new("config", Scope::Session, |_| async {
            HarnessConfig::from_settings(Settings::default())
        }))
        .with(collaborator("gateway", Scope::Module, true, journal))
        .with(collaborator("route", Scope::Module, true, journal).depends_on(["gateway"]))
        .with(collaborator("policy", Scope::Function, true, journal).depends_on(["route"]))
        .with(collaborator("stuck", Scope::Function, false, journal).depends_on(["route"]))
        .with(
            FixtureDef::new("mockserver", Scope::Module, |ctx| async move {
                let config = ctx.get::<HarnessConfig>("config")?;
                config.require_str("mockserver.url").await
            })
            .depends_on(["config"]),
        )
}

fn journal_entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

#[tokio::test]
async fn module_lifecycle() {
    let journal: Journal = Default::default();
    let runtime = FixtureRuntime::session(registry(&journal)).await.unwrap();
    runtime.enter(Scope::Module).await.unwrap();
    let runner = TestRunner::new(runtime.clone());

    for test in ["test_first", "test_second"] {
        runner
            .run_test(TestMeta::new(test), |rt| async move {
                let policy = rt.resolve::<Recorded>("policy").await?;
                assert_eq!(policy.describe(), "policy");
                Ok(())
            })
            .await
            .assert_passed();
    }
    assert_eq!(
        journal_entries(&journal),
        vec![
            "commit gateway",
            "commit route",
            "commit policy",
            "delete policy",
            "commit policy",
            "delete policy",
        ]
    );

    let outcome = runner
        .run_test(TestMeta::new("test_unready"), |rt| async move {
            rt.resolve::<Recorded>("stuck").await?;
            Ok(())
        })
        .await;
    let TestOutcome::Failed(message) = outcome else {
        panic!("expected a failure, got {:?}", outcome);
    };
    assert!(message.contains("stuck"), "{}", message);
    assert_eq!(
        journal_entries(&journal)[6..],
        ["commit stuck".to_string(), "delete stuck".to_string()]
    );

    let outcome = runner
        .run_test(TestMeta::new("test_needs_mockserver"), |rt| async move {
            rt.resolve::<String>("mockserver").await?;
            Ok(())
        })
        .await;
    assert_eq!(outcome, TestOutcome::Skipped("mockserver.url must be set".to_string()));

    assert_eq!(runtime.exit(Scope::Module).await.unwrap(), 0);
    assert_eq!(
        journal_entries(&journal)[8..],
        ["delete route".to_string(), "delete gateway".to_string()]
    );
    assert_eq!(runtime.exit_all().await, 0);
    assert!(runtime.active_scopes().await.is_empty());
}

#[tokio::test]
async fn function_values_outside_a_test_live_in_the_module() {
    let journal: Journal = Default::default();
    let runtime = FixtureRuntime::session(registry(&journal)).await.unwrap();
    runtime.enter(Scope::Module).await.unwrap();

    let policy = runtime.resolve::<Recorded>("policy").await.unwrap();
    let again = runtime.resolve::<Recorded>("policy").await.unwrap();
    assert!(Arc::ptr_eq(&policy, &again));
    assert_eq!(
        journal_entries(&journal),
        vec!["commit gateway", "commit route", "commit policy"]
    );

    // A test still gets its own instance
    let runner = TestRunner::new(runtime.clone());
    let module_policy = policy.clone();
    runner
        .run_test(TestMeta::new("test_fresh_policy"), |rt| async move {
            let fresh = rt.resolve::<Recorded>("policy").await?;
            assert!(!Arc::ptr_eq(&fresh, &module_policy));
            Ok(())
        })
        .await
        .assert_passed();

    assert_eq!(runtime.exit_all().await, 0);
    assert_eq!(
        journal_entries(&journal)[3..],
        [
            "commit policy".to_string(),
            "delete policy".to_string(),
            "delete policy".to_string(),
            "delete route".to_string(),
            "delete gateway".to_string(),
        ]
    );
}

#[tokio::test]
async fn module_policy_follows_the_target_across_cases() {
    let journal: Journal = Default::default();
    let policy_journal = journal.clone();
    let registry = FixtureRegistry::new()
        .with(collaborator("gateway", Scope::Module, true, &journal))
        .with(collaborator("route", Scope::Module, true, &journal).depends_on(["gateway"]))
        .with(FixtureDef::new("target", Scope::Module, |ctx| async move {
            Ok(ctx.param::<Recorded>()?.describe())
        }))
        .with(
            FixtureDef::shared("policy", Scope::Module, move |ctx| {
                let journal = policy_journal.clone();
                async move {
                    let target = ctx.get::<String>("target")?;
                    let policy = Arc::new(Recorded {
                        name: format!("policy->{}", target),
                        ready: true,
                        journal,
                    });
                    commit_all(ctx.finalizers(), &[policy.clone() as Arc<dyn Lifecycle>]).await?;
                    Ok(policy)
                }
            })
            .depends_on(["target"]),
        );
    let runtime = FixtureRuntime::session(registry).await.unwrap();
    runtime.enter(Scope::Module).await.unwrap();
    let runner = TestRunner::new(runtime.clone());

    for case in Parametrization::new().route_or_gateway().cases() {
        let expected = format!("policy->{}", case.id);
        runner
            .run_test(TestMeta::new("test_policy_target").case(case), |rt| async move {
                let policy = rt.resolve::<Recorded>("policy").await?;
                assert_eq!(policy.describe(), expected);
                Ok(())
            })
            .await
            .assert_passed();
    }
    assert_eq!(
        journal_entries(&journal),
        vec![
            "commit gateway",
            "commit route",
            "commit policy->route",
            "delete policy->route",
            "commit policy->gateway",
        ]
    );

    assert_eq!(runtime.exit_all().await, 0);
    assert_eq!(
        journal_entries(&journal)[5..],
        [
            "delete policy->gateway".to_string(),
            "delete route".to_string(),
            "delete gateway".to_string(),
        ]
    );
}

#[tokio::test]
async fn scopes_nest_strictly() {
    let runtime = FixtureRuntime::session(FixtureRegistry::new()).await.unwrap();
    runtime.enter(Scope::Module).await.unwrap();
    assert!(runtime.enter(Scope::Package).await.is_err());
    assert!(runtime.exit(Scope::Session).await.is_err());
    runtime.enter(Scope::Function).await.unwrap();
    assert_eq!(
        runtime.active_scopes().await,
        vec![Scope::Session, Scope::Module, Scope::Function]
    );
    assert_eq!(runtime.exit_all().await, 0);
}
