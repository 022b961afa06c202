//! Orchestrator integration tests: dependency ordering, failure isolation,
//! enable toggling and teardown rules.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use modkit::modules::{TOPIC_DESTROYED, TOPIC_INITIALIZED, TOPIC_INIT_FAILED};
use modkit::{
    Module, ModuleConfig, ModuleContext, ModuleDefinition, Runtime, RuntimeError, RuntimeResult,
};
use serde_json::{Value, json};

type Log = Arc<Mutex<Vec<String>>>;

/// Test module that records every lifecycle hook it passes through.
struct Probe {
    id: &'static str,
    log: Log,
    fail_init: bool,
}

#[async_trait]
impl Module for Probe {
    async fn init(&mut self, _ctx: &ModuleContext) -> RuntimeResult<()> {
        if self.fail_init {
            return Err(RuntimeError::Internal {
                component: self.id.to_string(),
                reason: "init exploded".to_string(),
            });
        }
        self.log.lock().unwrap().push(format!("init:{}", self.id));
        Ok(())
    }

    fn render(&mut self, _ctx: &ModuleContext) -> RuntimeResult<Option<String>> {
        self.log.lock().unwrap().push(format!("render:{}", self.id));
        Ok(Some(format!("<div id=\"{}\"></div>", self.id)))
    }

    fn after_mount(&mut self, _ctx: &ModuleContext) -> RuntimeResult<()> {
        self.log.lock().unwrap().push(format!("mount:{}", self.id));
        Ok(())
    }

    async fn destroy(&mut self, _ctx: &ModuleContext) -> RuntimeResult<()> {
        self.log.lock().unwrap().push(format!("destroy:{}", self.id));
        Ok(())
    }
}

fn probe_factory(id: &'static str, log: &Log) -> ModuleDefinition {
    let log = log.clone();
    ModuleDefinition::factory(move |_: &ModuleContext| -> RuntimeResult<Box<dyn Module>> {
        Ok(Box::new(Probe {
            id,
            log: log.clone(),
            fail_init: false,
        }))
    })
}

fn failing_factory(id: &'static str, log: &Log) -> ModuleDefinition {
    let log = log.clone();
    ModuleDefinition::factory(move |_: &ModuleContext| -> RuntimeResult<Box<dyn Module>> {
        Ok(Box::new(Probe {
            id,
            log: log.clone(),
            fail_init: true,
        }))
    })
}

fn runtime() -> Runtime {
    Runtime::builder().build().unwrap()
}

#[tokio::test]
async fn dependencies_initialize_depth_first() {
    let mut runtime = runtime();
    let log: Log = Default::default();

    runtime.register("a", probe_factory("a", &log), ModuleConfig::default());
    runtime.register(
        "b",
        probe_factory("b", &log),
        ModuleConfig::default().with_dependencies(["a"]),
    );
    runtime.register(
        "c",
        probe_factory("c", &log),
        ModuleConfig::default().with_dependencies(["b"]),
    );

    runtime.modules_mut().init("c").await.unwrap();

    assert_eq!(
        log.lock().unwrap().as_slice(),
        &["init:a", "init:b", "init:c"]
    );
    assert_eq!(runtime.modules().init_order(), &["a", "b", "c"]);

    let a = runtime.modules().initialized_at("a").unwrap();
    let b = runtime.modules().initialized_at("b").unwrap();
    let c = runtime.modules().initialized_at("c").unwrap();
    assert!(a <= b && b <= c);
}

#[tokio::test]
async fn init_all_respects_priority_then_registration_order() {
    let mut runtime = runtime();
    let log: Log = Default::default();

    runtime.register(
        "low",
        probe_factory("low", &log),
        ModuleConfig::default().with_priority(1),
    );
    runtime.register(
        "high",
        probe_factory("high", &log),
        ModuleConfig::default().with_priority(10),
    );
    runtime.register(
        "tie-first",
        probe_factory("tie-first", &log),
        ModuleConfig::default().with_priority(5),
    );
    runtime.register(
        "tie-second",
        probe_factory("tie-second", &log),
        ModuleConfig::default().with_priority(5),
    );

    let report = runtime.init_all().await;
    assert!(report.all_ok());
    assert_eq!(
        log.lock().unwrap().as_slice(),
        &["init:high", "init:tie-first", "init:tie-second", "init:low"]
    );
}

#[tokio::test]
async fn init_all_isolates_a_failing_module() {
    let mut runtime = runtime();
    let log: Log = Default::default();
    let failures: Arc<Mutex<Vec<Value>>> = Default::default();

    let failures_clone = failures.clone();
    runtime
        .events()
        .subscribe(TOPIC_INIT_FAILED, move |message| {
            failures_clone.lock().unwrap().push(message.payload.clone());
            Ok(())
        })
        .unwrap();

    runtime.register("x", failing_factory("x", &log), ModuleConfig::default());
    runtime.register("y", probe_factory("y", &log), ModuleConfig::default());

    let report = runtime.init_all().await;

    assert!(runtime.modules().is_initialized("y"));
    assert!(!runtime.modules().is_initialized("x"));
    assert_eq!(report.initialized, vec!["y"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "x");

    let failures = failures.lock().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0]["id"], json!("x"));
}

#[tokio::test]
async fn direct_init_propagates_hook_errors() {
    let mut runtime = runtime();
    let log: Log = Default::default();
    runtime.register("x", failing_factory("x", &log), ModuleConfig::default());

    let error = runtime.modules_mut().init("x").await.unwrap_err();
    assert!(matches!(error, RuntimeError::Lifecycle { .. }));
    assert!(!runtime.modules().is_initialized("x"));
}

#[tokio::test]
async fn dependency_cycle_fails_fast_with_the_chain() {
    let mut runtime = runtime();
    let log: Log = Default::default();

    runtime.register(
        "a",
        probe_factory("a", &log),
        ModuleConfig::default().with_dependencies(["b"]),
    );
    runtime.register(
        "b",
        probe_factory("b", &log),
        ModuleConfig::default().with_dependencies(["a"]),
    );

    let error = runtime.modules_mut().init("a").await.unwrap_err();
    match error {
        RuntimeError::DependencyCycle { chain } => {
            assert_eq!(chain, vec!["a", "b", "a"]);
        }
        other => panic!("expected cycle error, got {other}"),
    }
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_dependency_names_the_referencing_module() {
    let mut runtime = runtime();
    let log: Log = Default::default();
    runtime.register(
        "a",
        probe_factory("a", &log),
        ModuleConfig::default().with_dependencies(["ghost"]),
    );

    let error = runtime.modules_mut().init("a").await.unwrap_err();
    match error {
        RuntimeError::UnknownDependency {
            module_id,
            dependency,
        } => {
            assert_eq!(module_id, "a");
            assert_eq!(dependency, "ghost");
        }
        other => panic!("expected unknown dependency, got {other}"),
    }
}

#[tokio::test]
async fn disabled_module_is_skipped_entirely() {
    let mut runtime = runtime();
    let log: Log = Default::default();

    runtime.register(
        "off",
        probe_factory("off", &log),
        ModuleConfig::default().disabled(),
    );
    runtime.register("on", probe_factory("on", &log), ModuleConfig::default());

    let report = runtime.init_all().await;

    assert_eq!(report.skipped, vec!["off"]);
    assert!(!runtime.modules().is_initialized("off"));
    assert!(runtime.modules().get("off").is_none());
    let list = runtime.modules().list();
    let off = list.iter().find(|info| info.id == "off").unwrap();
    assert!(!off.initialized);
}

#[tokio::test]
async fn render_and_mount_only_with_a_container() {
    let mut runtime = runtime();
    let log: Log = Default::default();

    runtime.register(
        "panel",
        probe_factory("panel", &log),
        ModuleConfig::default().with_container("#panel"),
    );
    runtime.register("headless", probe_factory("headless", &log), ModuleConfig::default());

    runtime.init_all().await;

    let log = log.lock().unwrap();
    assert!(log.contains(&"render:panel".to_string()));
    assert!(log.contains(&"mount:panel".to_string()));
    assert!(!log.iter().any(|entry| entry == "render:headless"));
}

#[tokio::test]
async fn destroy_refuses_while_dependents_are_live() {
    let mut runtime = runtime();
    let log: Log = Default::default();

    runtime.register("base", probe_factory("base", &log), ModuleConfig::default());
    runtime.register(
        "top",
        probe_factory("top", &log),
        ModuleConfig::default().with_dependencies(["base"]),
    );
    runtime.modules_mut().init("top").await.unwrap();

    let error = runtime.modules_mut().destroy("base").await.unwrap_err();
    match error {
        RuntimeError::LiveDependents { dependents, .. } => {
            assert_eq!(dependents, vec!["top"]);
        }
        other => panic!("expected live dependents, got {other}"),
    }
    assert!(runtime.modules().is_initialized("base"));

    // Cascade takes the dependent down first.
    runtime.modules_mut().destroy_cascade("base").await.unwrap();
    assert_eq!(
        log.lock().unwrap().as_slice(),
        &["init:base", "init:top", "destroy:top", "destroy:base"]
    );
}

#[tokio::test]
async fn destroy_all_walks_reverse_init_order() {
    let mut runtime = runtime();
    let log: Log = Default::default();

    runtime.register("a", probe_factory("a", &log), ModuleConfig::default());
    runtime.register(
        "b",
        probe_factory("b", &log),
        ModuleConfig::default().with_dependencies(["a"]),
    );
    runtime.init_all().await;
    runtime.shutdown().await;

    assert_eq!(
        log.lock().unwrap().as_slice(),
        &["init:a", "init:b", "destroy:b", "destroy:a"]
    );
    assert!(runtime.modules().init_order().is_empty());
}

#[tokio::test]
async fn set_enabled_toggles_the_live_instance() {
    let mut runtime = runtime();
    let log: Log = Default::default();
    runtime.register("m", probe_factory("m", &log), ModuleConfig::default());
    runtime.init_all().await;

    runtime.modules_mut().set_enabled("m", false).await.unwrap();
    assert!(!runtime.modules().is_initialized("m"));
    assert!(!runtime.modules().get_config("m").unwrap().enabled);

    runtime.modules_mut().set_enabled("m", true).await.unwrap();
    assert!(runtime.modules().is_initialized("m"));

    assert_eq!(
        log.lock().unwrap().as_slice(),
        &["init:m", "destroy:m", "init:m"]
    );
}

#[tokio::test]
async fn disabling_with_live_dependents_refuses_without_touching_config() {
    let mut runtime = runtime();
    let log: Log = Default::default();

    runtime.register("base", probe_factory("base", &log), ModuleConfig::default());
    runtime.register(
        "top",
        probe_factory("top", &log),
        ModuleConfig::default().with_dependencies(["base"]),
    );
    runtime.modules_mut().init("top").await.unwrap();

    let error = runtime
        .modules_mut()
        .set_enabled("base", false)
        .await
        .unwrap_err();
    match error {
        RuntimeError::LiveDependents { dependents, .. } => {
            assert_eq!(dependents, vec!["top"]);
        }
        other => panic!("expected live dependents, got {other}"),
    }
    // Config and instance stayed consistent: still enabled, still live.
    assert!(runtime.modules().get_config("base").unwrap().enabled);
    assert!(runtime.modules().is_initialized("base"));
}

#[tokio::test]
async fn reload_destroys_then_reinitializes() {
    let mut runtime = runtime();
    let log: Log = Default::default();
    runtime.register("m", probe_factory("m", &log), ModuleConfig::default());
    runtime.init_all().await;

    runtime.modules_mut().reload("m").await.unwrap();

    assert_eq!(
        log.lock().unwrap().as_slice(),
        &["init:m", "destroy:m", "init:m"]
    );
}

#[tokio::test]
async fn instance_definition_is_consumed_by_first_init() {
    let mut runtime = runtime();
    let log: Log = Default::default();

    runtime.register(
        "single",
        ModuleDefinition::instance(Probe {
            id: "single",
            log: log.clone(),
            fail_init: false,
        }),
        ModuleConfig::default(),
    );

    runtime.modules_mut().init("single").await.unwrap();
    runtime.modules_mut().destroy("single").await.unwrap();

    let error = runtime.modules_mut().init("single").await.unwrap_err();
    assert!(matches!(error, RuntimeError::Lifecycle { .. }));
}

#[tokio::test]
async fn lifecycle_events_announce_init_and_destroy() {
    let mut runtime = runtime();
    let log: Log = Default::default();
    let seen: Arc<Mutex<Vec<(String, Value)>>> = Default::default();

    for topic in [TOPIC_INITIALIZED, TOPIC_DESTROYED] {
        let seen = seen.clone();
        runtime
            .events()
            .subscribe(topic, move |message| {
                seen.lock()
                    .unwrap()
                    .push((message.topic.clone(), message.payload.clone()));
                Ok(())
            })
            .unwrap();
    }

    runtime.register("m", probe_factory("m", &log), ModuleConfig::default());
    runtime.init_all().await;
    runtime.modules_mut().destroy("m").await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], (TOPIC_INITIALIZED.to_string(), json!({"id": "m"})));
    assert_eq!(seen[1], (TOPIC_DESTROYED.to_string(), json!({"id": "m"})));
}

#[tokio::test]
async fn modules_reach_state_and_events_through_their_context() {
    struct Announcer;

    #[async_trait]
    impl Module for Announcer {
        async fn init(&mut self, ctx: &ModuleContext) -> RuntimeResult<()> {
            ctx.store.set("announcer.ready", json!(true))?;
            ctx.events.publish("announcer:up", json!({"ok": true}));
            Ok(())
        }
    }

    let mut runtime = runtime();
    let seen: Arc<Mutex<usize>> = Default::default();
    let seen_clone = seen.clone();
    runtime
        .events()
        .subscribe("announcer:up", move |_| {
            *seen_clone.lock().unwrap() += 1;
            Ok(())
        })
        .unwrap();

    runtime.register(
        "announcer",
        ModuleDefinition::instance(Announcer),
        ModuleConfig::default(),
    );
    let report = runtime.init_all().await;

    assert!(report.all_ok());
    assert_eq!(runtime.store().get("announcer.ready"), Some(json!(true)));
    assert_eq!(*seen.lock().unwrap(), 1);
}
