//! Batch resolution tests

mod common;

use common::*;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use using_core::module::{
    export, Argument, ConstructError, Definition, ErrorKind, Export, Invocation, Loader,
    LoaderFactory, LoaderState, Module, ModuleError, ModuleSystem, RegistryLoader, Request,
    SystemEvent, SystemEventKind, UsingError, UsingEvent, UsingEventKind,
};

#[test]
fn test_zero_requests_succeed_immediately() {
    let system = system_with_registry();
    let results = outcomes();
    let (on_success, on_fail) = recording(&results);

    let using = system.using(Vec::<&str>::new());
    using.then(on_success, on_fail);

    let results = results.lock().unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].values().is_empty());
    assert!(using.loaders().is_empty());
    assert!(using.is_settled());
}

#[test]
fn test_exact_and_wildcard_requests() {
    let system = system_with_registry();
    constant(&system, "pkg.a", "a");
    constant(&system, "pkg.v1", "v1");
    constant(&system, "pkg.v2", "v2");
    constant(&system, "a.2", "two");
    constant(&system, "a.10", "ten");

    let results = outcomes();
    let (on_success, on_fail) = recording(&results);
    system.using(["pkg.a", "pkg.v*", "a.*"]).then(on_success, on_fail);

    let results = results.lock().unwrap();
    let values: Vec<&str> = results[0].values().iter().map(text).collect();
    assert_eq!(values, vec!["a", "v2", "ten"]);
}

#[test]
fn test_results_keep_request_order() {
    let system = Arc::new(ModuleSystem::new());
    let backend = DeferredBackend::accepting("remote.");
    system.register_loader("remote", backend.clone()).unwrap();
    let first = constant(&system, "local.first", "first");
    let second = constant(&system, "local.second", "second");

    let results = outcomes();
    let (on_success, on_fail) = recording(&results);
    let using = system.using(["remote.first", "remote.second"]);
    using.then(on_success, on_fail);
    assert_eq!(backend.pending(), 2);

    backend.take("remote.second").resolve(second);
    assert!(results.lock().unwrap().is_empty());
    backend.take("remote.first").resolve(first);

    let results = results.lock().unwrap();
    let values: Vec<&str> = results[0].values().iter().map(text).collect();
    assert_eq!(values, vec!["first", "second"]);
}

#[test]
fn test_mixed_outcome_fails_once() {
    let system = Arc::new(ModuleSystem::new());
    let backend = DeferredBackend::accepting("req");
    system.register_loader("deferred", backend.clone()).unwrap();
    let good = constant(&system, "good", "ok");

    let results = outcomes();
    let (on_success, on_fail) = recording(&results);
    let using = system.using(["reqGood", "reqBad"]);
    using.then(on_success, on_fail);

    backend.take("reqBad").fail(anyhow::anyhow!("404 not found"));
    assert!(results.lock().unwrap().is_empty());
    backend.take("reqGood").resolve(good);

    let results = results.lock().unwrap();
    assert_eq!(results.len(), 1);
    let failure = results[0].failure();
    assert!(!failure.is_empty());
    assert_eq!(failure.requests.len(), 1);
    assert_eq!(failure.requests[0].request, Request::from("reqBad"));
    assert!(failure.messages()[0].contains("404 not found"));
}

#[test]
fn test_every_loader_failing_still_fails_once() {
    let system = Arc::new(ModuleSystem::new());
    let backend = DeferredBackend::accepting("bad");
    system.register_loader("deferred", backend.clone()).unwrap();

    let results = outcomes();
    let (on_success, on_fail) = recording(&results);
    system.using(["bad.1", "bad.2"]).then(on_success, on_fail);

    backend.take("bad.1").fail(anyhow::anyhow!("first"));
    backend.take("bad.2").fail(anyhow::anyhow!("second"));

    let results = results.lock().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].failure().len(), 2);
}

#[test]
fn test_progress_is_the_mean() {
    let system = Arc::new(ModuleSystem::new());
    let backend = DeferredBackend::accepting("asset.");
    system.register_loader("deferred", backend.clone()).unwrap();

    let using = system.using(["asset.a", "asset.b"]);
    let reported = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&reported);
    using.events().on(UsingEventKind::Progress, move |_, event| {
        if let UsingEvent::Progress(value) = event {
            log.lock().unwrap().push(*value);
        }
        false
    });
    using.then(|_| {}, |_| {});

    backend.set_progress("asset.a", 0.5);
    backend.set_progress("asset.b", 1.0);

    assert_eq!(*reported.lock().unwrap(), vec![0.25, 0.75]);
    assert_eq!(using.progress(), 0.75);
}

#[test]
fn test_assembly_fault_fails_the_batch() {
    let system = system_with_registry();
    system
        .define(Definition::new(|_| Err(anyhow::anyhow!("factory exploded"))).id("broken"))
        .unwrap();

    let results = outcomes();
    let (on_success, on_fail) = recording(&results);
    let using = system.using(["broken"]);
    using.then(on_success, on_fail);

    assert_eq!(using.loaders()[0].state(), LoaderState::Success);
    let results = results.lock().unwrap();
    let failure = results[0].failure();
    assert_eq!(failure.errors.len(), 1);
    assert!(matches!(
        failure.errors[0].as_ref(),
        UsingError::Module { source: ModuleError::Factory { .. }, .. }
    ));
    assert_eq!(failure.errors[0].kind(), ErrorKind::Module);
}

#[test]
fn test_bypass_returns_modules_without_invoking() {
    let system = system_with_registry();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let declared = system
        .define(
            Definition::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(export(()))
            })
            .id("lazy"),
        )
        .unwrap();

    let modules = Arc::new(Mutex::new(Vec::new()));
    let slot = Arc::clone(&modules);
    system.using(["lazy"]).then_modules(
        move |resolved| *slot.lock().unwrap() = resolved,
        |failure| panic!("{}", failure),
    );

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    let modules = modules.lock().unwrap();
    assert!(Arc::ptr_eq(&modules[0], &declared));
}

#[test]
fn test_factories_are_not_memoized() {
    let system = system_with_registry();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    system
        .define(
            Definition::new(move |_| Ok(export(counter.fetch_add(1, Ordering::SeqCst))))
                .id("counter"),
        )
        .unwrap();

    system.using(["counter"]).then(|_| {}, |_| {});
    system.using(["counter"]).then(|_| {}, |_| {});
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_unsupported_request_fails_without_fetch() {
    let system = system_with_registry();

    let results = outcomes();
    let (on_success, on_fail) = recording(&results);
    let using = system.using(["nobody.handles.this"]);
    using.then(on_success, on_fail);

    assert!(using.loaders().is_empty());
    assert_eq!(using.warnings().len(), 1);
    let results = results.lock().unwrap();
    let failure = results[0].failure();
    assert_eq!(failure.errors[0].kind(), ErrorKind::UnsupportedRequest);
}

#[test]
fn test_rejections_are_warnings_only() {
    let system = Arc::new(ModuleSystem::new());
    system
        .loaders()
        .register_fn("picky", |_: &Arc<ModuleSystem>, _: &Request| {
            Err(ConstructError::rejected("not mine"))
        })
        .unwrap();
    system
        .register_loader(RegistryLoader::NAME, Arc::new(RegistryLoader))
        .unwrap();
    constant(&system, "pkg.a", "a");

    let results = outcomes();
    let (on_success, on_fail) = recording(&results);
    let using = system.using(["pkg.a"]);
    using.then(on_success, on_fail);

    assert_eq!(using.warnings().len(), 1);
    assert_eq!(using.warnings()[0].system, "picky");
    assert_eq!(using.warnings()[0].kind(), ErrorKind::RequestNotAccepted);
    assert_eq!(text(&results.lock().unwrap()[0].values()[0]), "a");
}

#[test]
fn test_faulted_constructor_is_recorded() {
    let system = Arc::new(ModuleSystem::new());
    system
        .loaders()
        .register_fn("flaky", |_: &Arc<ModuleSystem>, _: &Request| {
            Err(ConstructError::Faulted(anyhow::anyhow!("backend offline")))
        })
        .unwrap();
    system
        .register_loader(RegistryLoader::NAME, Arc::new(RegistryLoader))
        .unwrap();
    constant(&system, "pkg.a", "a");

    let results = outcomes();
    let (on_success, on_fail) = recording(&results);
    let using = system.using(["pkg.a"]);

    // The next factory still accepted the request
    assert_eq!(using.loaders().len(), 1);
    using.then(on_success, on_fail);

    assert_eq!(using.loaders()[0].state(), LoaderState::Initial);
    let results = results.lock().unwrap();
    let failure = results[0].failure();
    assert!(matches!(
        failure.errors[0].as_ref(),
        UsingError::ConstructorFaulted { system, .. } if system == "flaky"
    ));
    assert_eq!(failure.errors[0].kind(), ErrorKind::Unexpected);
}

#[test]
fn test_malformed_value_fails_without_fetch() {
    let system = system_with_registry();
    constant(&system, "pkg.a", "a");

    let results = outcomes();
    let (on_success, on_fail) = recording(&results);
    let using = system.using_values([json!(5), json!("pkg.a")]);
    using.then(on_success, on_fail);

    assert_eq!(using.loaders().len(), 1);
    assert_eq!(using.loaders()[0].state(), LoaderState::Initial);
    let results = results.lock().unwrap();
    assert_eq!(results[0].failure().errors[0].kind(), ErrorKind::InvalidRequest);
}

#[test]
fn test_descriptor_request_reaches_factory() {
    let system = system_with_registry();
    system
        .define(
            Definition::new(|invocation: &Invocation<'_>| {
                let theme = invocation
                    .request()
                    .and_then(|request| request.get("theme"))
                    .and_then(|value| value.as_str())
                    .unwrap_or("default")
                    .to_string();
                Ok(export(theme))
            })
            .id("widget"),
        )
        .unwrap();

    let values = Arc::new(Mutex::new(Vec::new()));
    let slot = Arc::clone(&values);
    system
        .using_values([json!({"id": "widget", "theme": "dark"})])
        .then(move |resolved| *slot.lock().unwrap() = resolved, |f| panic!("{}", f));

    let values = values.lock().unwrap();
    assert_eq!(values[0].downcast_ref::<String>().map(String::as_str), Some("dark"));
}

#[test]
fn test_bare_success_is_missing_module() {
    let system = Arc::new(ModuleSystem::new());
    let backend = DeferredBackend::accepting("script.");
    system.register_loader("deferred", backend.clone()).unwrap();

    let results = outcomes();
    let (on_success, on_fail) = recording(&results);
    system.using(["script.js"]).then(on_success, on_fail);
    backend.take("script.js").succeed();

    let results = results.lock().unwrap();
    assert!(matches!(
        results[0].failure().errors[0].as_ref(),
        UsingError::MissingModule { .. }
    ));
}

#[test]
fn test_terminal_event_fires_before_continuation() {
    let system = system_with_registry();
    constant(&system, "pkg.a", "a");
    let order = Arc::new(Mutex::new(Vec::new()));

    let using = system.using(["pkg.a"]);
    let log = Arc::clone(&order);
    using.events().on_any(move |_, event| {
        log.lock().unwrap().push(format!("{:?}", event));
        false
    });
    let log = Arc::clone(&order);
    using.then(move |_| log.lock().unwrap().push("continuation".to_string()), |_| {});

    assert_eq!(
        *order.lock().unwrap(),
        vec!["Success".to_string(), "continuation".to_string()]
    );
}

#[test]
fn test_system_events_for_batches_and_requests() {
    let system = system_with_registry();
    constant(&system, "pkg.a", "a");
    constant(&system, "pkg.b", "b");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    system.events().on_each(
        &[SystemEventKind::Using, SystemEventKind::Request],
        move |_, event| {
            let entry = match event {
                SystemEvent::Using(using) => format!("using:{}", using.loaders().len()),
                SystemEvent::Request(loader) => format!("request:{}", loader.request()),
                SystemEvent::Defined(_) => unreachable!(),
            };
            log.lock().unwrap().push(entry);
            false
        },
    );

    system.using(["pkg.a", "pkg.b"]).then(|_| {}, |_| {});
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            "using:2".to_string(),
            "request:\"pkg.a\"".to_string(),
            "request:\"pkg.b\"".to_string()
        ]
    );
}

#[test]
fn test_second_then_is_ignored() {
    let system = system_with_registry();
    constant(&system, "pkg.a", "a");
    let calls = Arc::new(AtomicUsize::new(0));

    let using = system.using(["pkg.a"]);
    let first = Arc::clone(&calls);
    using.then(move |_| {
        first.fetch_add(1, Ordering::SeqCst);
    }, |_| {});
    let second = Arc::clone(&calls);
    using.then(move |_| {
        second.fetch_add(10, Ordering::SeqCst);
    }, |_| {});

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Pipeline that wraps the raw factory value
struct Wrapping;

impl LoaderFactory for Wrapping {
    fn create(&self, _: &Arc<ModuleSystem>, _: &Request) -> Result<Arc<Loader>, ConstructError> {
        Err(ConstructError::rejected("pipeline only"))
    }

    fn pipeline(
        &self,
        system: &ModuleSystem,
        module: &Arc<Module>,
        request: Option<&Request>,
    ) -> Result<Export, ModuleError> {
        let arguments = module.resolve_arguments(system, request)?;
        let raw = module.call_raw(system, request, &arguments)?;
        let inner = raw.downcast_ref::<&'static str>().copied().unwrap_or("?");
        Ok(export(format!("wrapped({})", inner)))
    }
}

#[test]
fn test_system_tag_routes_through_pipeline() {
    let system = system_with_registry();
    system.register_loader("wrap", Arc::new(Wrapping)).unwrap();
    constant(&system, "dep", "dep-value");
    system
        .define(
            Definition::new(|invocation: &Invocation<'_>| match invocation.argument(0) {
                Some(Argument::Value(value)) => Ok(export(text(value))),
                other => Err(anyhow::anyhow!("unexpected argument {:?}", other)),
            })
            .id("wrapped")
            .dependencies(["dep"])
            .system("wrap"),
        )
        .unwrap();

    let values = Arc::new(Mutex::new(Vec::new()));
    let slot = Arc::clone(&values);
    system
        .using(["wrapped"])
        .then(move |resolved| *slot.lock().unwrap() = resolved, |f| panic!("{}", f));

    let values = values.lock().unwrap();
    assert_eq!(
        values[0].downcast_ref::<String>().map(String::as_str),
        Some("wrapped(dep-value)")
    );
}

#[test]
fn test_unresolved_dependency_never_reaches_factory() {
    let system = system_with_registry();
    system.register_loader("wrap", Arc::new(Wrapping)).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    system
        .define(
            Definition::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(export("never"))
            })
            .id("needs.missing")
            .dependencies(["missing"])
            .system("wrap"),
        )
        .unwrap();

    let results = outcomes();
    let (on_success, on_fail) = recording(&results);
    system.using(["needs.missing"]).then(on_success, on_fail);

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    let results = results.lock().unwrap();
    assert!(matches!(
        results[0].failure().errors[0].as_ref(),
        UsingError::Module { source: ModuleError::UnresolvedDependency(id), .. } if id == "missing"
    ));
}

#[tokio::test]
async fn test_resolve_awaits_completion_from_a_task() {
    let system = Arc::new(ModuleSystem::new());
    let backend = DeferredBackend::accepting("slow.");
    system.register_loader("deferred", backend.clone()).unwrap();
    let module = constant(&system, "local", "eventually");

    let using = system.using(["slow.asset"]);
    let pending = {
        let using = Arc::clone(&using);
        tokio::spawn(async move { using.resolve().await })
    };

    tokio::time::sleep(Duration::from_millis(10)).await;
    while backend.pending() == 0 {
        tokio::task::yield_now().await;
    }
    backend.take("slow.asset").resolve(module);

    let values = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .expect("batch never settled")
        .unwrap()
        .unwrap();
    assert_eq!(text(&values[0]), "eventually");
}

#[tokio::test]
async fn test_resolve_reports_failure() {
    let system = system_with_registry();
    let failure = system.using(["absent"]).resolve().await.unwrap_err();
    assert_eq!(failure.errors[0].kind(), ErrorKind::UnsupportedRequest);
}

#[tokio::test]
async fn test_pending_loader_needs_a_caller_deadline() {
    let system = Arc::new(ModuleSystem::new());
    let backend = DeferredBackend::accepting("never.");
    system.register_loader("deferred", backend.clone()).unwrap();

    let using = system.using(["never.done"]);
    let outcome = tokio::time::timeout(Duration::from_millis(50), using.resolve()).await;
    assert!(outcome.is_err());
    assert_eq!(backend.pending(), 1);
}

#[test]
fn test_loader_can_be_completed_from_another_thread() {
    let system = Arc::new(ModuleSystem::new());
    let backend = DeferredBackend::accepting("thread.");
    system.register_loader("deferred", backend.clone()).unwrap();
    let module = constant(&system, "local", "threaded");

    let results = outcomes();
    let (on_success, on_fail) = recording(&results);
    system.using(["thread.job"]).then(on_success, on_fail);

    let done = backend.take("thread.job");
    std::thread::spawn(move || done.resolve(module)).join().unwrap();

    assert_eq!(text(&results.lock().unwrap()[0].values()[0]), "threaded");
}

#[test]
fn test_loader_built_by_closure_factory() {
    let system = Arc::new(ModuleSystem::new());
    let answer = constant(&system, "answer", "42");
    system
        .loaders()
        .register_fn("inline", move |_: &Arc<ModuleSystem>, request: &Request| {
            let module = Arc::clone(&answer);
            Ok(Loader::new(request.clone(), move |done| {
                done.set_progress(1.0);
                done.resolve(module);
                Ok(())
            }))
        })
        .unwrap();

    let results = outcomes();
    let (on_success, on_fail) = recording(&results);
    let using = system.using(["anything"]);
    using.then(on_success, on_fail);

    assert_eq!(using.progress(), 1.0);
    assert_eq!(text(&results.lock().unwrap()[0].values()[0]), "42");
}
