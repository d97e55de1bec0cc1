//! Registrar behaviour: install lifecycle, registration protocol, teardown.
//! Everything runs against a plugin instance; the process-wide handle is
//! covered in global_test.rs.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use xwire_engine::emitters::{StoreEmitter, StoreEmitters};
use xwire_engine::wire::{debounce, map_wire, module_path};
use xwire_engine::{
    create_wiring, with_module, Bus, Lifecycle, MemoryAdapter, ModuleOptions, PluginError,
    PrivateModuleOptions, StoreModuleOverride, Wire, WireMetadata, XModule, XPlugin,
    XPluginOptions,
};
use xwire_state::mutations::set_field;
use xwire_state::{ModulePath, Store, StoreModule};

fn options() -> XPluginOptions {
    XPluginOptions::new(Arc::new(MemoryAdapter::new()))
}

fn search_box() -> XModule {
    let wires = with_module("searchBox");
    XModule::new(
        "searchBox",
        StoreModule::with_state(json!({"query": "", "config": {"instant": true}}))
            .mutation("setQuery", set_field("query")),
    )
    .with_store_emitters(
        StoreEmitters::new().emitter("SearchBoxQueryChanged", StoreEmitter::state("query")),
    )
    .with_wiring(
        create_wiring([(
            "UserAcceptedAQuery",
            vec![("setSearchBoxQuery", wires.wire_commit("setQuery"))],
        )])
        .unwrap(),
    )
}

fn empty_module(name: &str) -> XModule {
    XModule::new(name, StoreModule::default())
}

fn record(bus: &Bus, event: &str) -> Arc<Mutex<Vec<Value>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    bus.on(event).subscribe(move |e| {
        sink.lock().unwrap().push(e.payload.clone());
        Ok(())
    });
    log
}

fn installed(options: XPluginOptions) -> XPlugin {
    let plugin = XPlugin::new(Bus::new());
    plugin.install(options).unwrap();
    plugin
}

// =========================================================================
// Install lifecycle
// =========================================================================

#[test]
fn api_is_unavailable_before_install() {
    let plugin = XPlugin::new(Bus::new());
    assert!(matches!(plugin.store(), Err(PluginError::NotInstalled)));
    assert!(matches!(plugin.adapter(), Err(PluginError::NotInstalled)));
    assert!(!plugin.is_installed());
}

#[test]
fn second_install_is_rejected_and_first_is_kept() {
    let store = Store::new();
    let plugin = installed(options().with_store(store.clone()).with_initial_module(search_box()));

    let err = plugin
        .install(options().with_initial_module(empty_module("facets")))
        .unwrap_err();
    assert!(matches!(err, PluginError::AlreadyInstalled));
    assert_eq!(plugin.lifecycle(), Lifecycle::Installed);
    assert_eq!(plugin.installed_modules(), vec!["searchBox"]);
    assert!(store.has_module(&module_path("searchBox")));
    assert!(!store.has_module(&module_path("facets")));
}

#[test]
fn invalid_options_leave_plugin_uninstalled() {
    let plugin = XPlugin::new(Bus::new());
    let err = plugin.install(XPluginOptions::default()).unwrap_err();
    assert!(matches!(err, PluginError::InvalidOptions(_)));
    assert_eq!(plugin.lifecycle(), Lifecycle::Uninstalled);

    plugin.install(options()).unwrap();
    assert!(plugin.is_installed());
}

#[test]
fn module_state_is_nested_under_the_root_namespace() {
    let plugin = installed(options().with_initial_module(search_box()));
    assert_eq!(
        plugin.store().unwrap().root_state(),
        json!({"x": {"searchBox": {"query": "", "config": {"instant": true}}}})
    );
}

#[test]
fn install_hooks_run_once_with_the_store_bound() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let sink = calls.clone();
    let plugin = installed(
        options()
            .with_initial_module(search_box())
            .with_install_hook(move |plugin| {
                let store = plugin.store()?;
                sink.lock().unwrap().push(store.has_module(&module_path("searchBox")));
                // Registered right away; the store is bound.
                plugin.register_module(empty_module("hooked"))?;
                Ok(())
            }),
    );

    assert_eq!(*calls.lock().unwrap(), vec![false]);
    assert_eq!(plugin.installed_modules(), vec!["hooked", "searchBox"]);
}

#[test]
fn helpers_are_available_after_install() {
    let plugin = installed(options().with_helper("truncate", |value| {
        json!(value.as_str().unwrap_or_default().chars().take(3).collect::<String>())
    }));
    let truncate = plugin.helper("truncate").unwrap();
    assert_eq!(truncate(&json!("lampshade")), json!("lam"));
    assert!(plugin.helper("missing").is_none());
}

// =========================================================================
// Registration protocol
// =========================================================================

#[test]
fn registering_the_same_module_twice_wires_it_once() {
    let plugin = installed(options());
    plugin.register_module(search_box()).unwrap();
    plugin.register_module(search_box()).unwrap();

    assert_eq!(plugin.installed_modules(), vec!["searchBox"]);
    assert_eq!(plugin.bus().subscriber_count("UserAcceptedAQuery"), 1);
    assert_eq!(plugin.store().unwrap().watcher_count(), 1);
}

#[test]
fn immediate_emitters_fire_after_state_and_wiring_are_in_place() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let module = XModule::new(
        "nextQueries",
        StoreModule::with_state(json!({"query": "lamp", "nextQueries": []})),
    )
    .with_store_emitters(
        StoreEmitters::new().emitter("NextQueriesQueryChanged", StoreEmitter::state("query").immediate()),
    )
    .with_wiring(
        create_wiring([(
            "NextQueriesQueryChanged",
            vec![(
                "readState",
                Wire::new(move |ctx, event| {
                    let state = ctx.store.state(&module_path("nextQueries"))?;
                    sink.lock().unwrap().push((event.payload.clone(), state));
                    Ok(())
                }),
            )],
        )])
        .unwrap(),
    );

    installed(options().with_initial_module(module));
    assert_eq!(
        *seen.lock().unwrap(),
        vec![(json!("lamp"), json!({"query": "lamp", "nextQueries": []}))]
    );
}

#[test]
fn pending_modules_drain_once_in_order_after_initial_modules() {
    let bus = Bus::new();
    let registered = record(&bus, "ModuleRegistered");
    let plugin = XPlugin::new(bus);

    for name in ["empathize", "facets", "history"] {
        plugin.register_module(empty_module(name)).unwrap();
    }
    assert!(registered.lock().unwrap().is_empty());

    plugin
        .install(options().with_initial_module(empty_module("searchBox")))
        .unwrap();
    plugin.register_module(empty_module("facets")).unwrap();

    assert_eq!(
        *registered.lock().unwrap(),
        vec![json!("searchBox"), json!("empathize"), json!("facets"), json!("history")]
    );
    assert!(plugin.pending_modules().is_empty());
}

#[test]
fn reentrant_registration_is_at_most_once() {
    let bus = Bus::new();
    let plugin = Arc::new(XPlugin::new(bus.clone()));
    let handle = Arc::downgrade(&plugin);
    bus.on("ModuleRegistered").subscribe(move |event| {
        if let Some(plugin) = handle.upgrade() {
            // Registering again from inside the announcement is ignored.
            plugin.register_module(empty_module(event.payload.as_str().unwrap_or_default()))?;
            plugin.register_module(empty_module("recommendations"))?;
        }
        Ok(())
    });

    plugin
        .install(options().with_initial_module(empty_module("searchBox")))
        .unwrap();
    assert_eq!(plugin.installed_modules(), vec!["searchBox", "recommendations"]);
    assert_eq!(
        plugin.store().unwrap().module_paths(),
        vec![
            ModulePath::new(["x"]),
            module_path("recommendations"),
            module_path("searchBox"),
        ]
    );
}

#[test]
fn events_cascade_across_modules() {
    let related = with_module("relatedTags");
    let related_tags = XModule::new(
        "relatedTags",
        StoreModule::with_state(json!({"query": ""})).mutation("setQuery", set_field("query")),
    )
    .with_wiring(
        create_wiring([(
            "SearchBoxQueryChanged",
            vec![("setRelatedTagsQuery", related.wire_commit("setQuery"))],
        )])
        .unwrap(),
    );
    let plugin = installed(
        options()
            .with_initial_module(search_box())
            .with_initial_module(related_tags),
    );

    plugin
        .bus()
        .emit("UserAcceptedAQuery", json!("lamp"), WireMetadata::default())
        .unwrap();
    let store = plugin.store().unwrap();
    assert_eq!(
        store.get(&module_path("relatedTags"), "query").unwrap(),
        Some(json!("lamp"))
    );
}

/// A wire that normalizes the query commits again while the first commit is
/// still notifying emitters.
fn normalizing_search_box() -> XModule {
    let wires = with_module("searchBox");
    XModule::new(
        "searchBox",
        StoreModule::with_state(json!({"query": ""})).mutation("setQuery", set_field("query")),
    )
    .with_store_emitters(
        StoreEmitters::new()
            .emitter("SearchBoxQueryChanged", StoreEmitter::state("query"))
            .emitter("SearchBoxQueryEcho", StoreEmitter::state("query")),
    )
    .with_wiring(
        create_wiring([
            (
                "UserTypedAQuery",
                vec![("setSearchBoxQuery", wires.wire_commit("setQuery"))],
            ),
            (
                "SearchBoxQueryChanged",
                vec![(
                    "lowercaseSearchBoxQuery",
                    map_wire(wires.wire_commit("setQuery"), |query| {
                        json!(query.as_str().unwrap_or_default().to_lowercase())
                    }),
                )],
            ),
        ])
        .unwrap(),
    )
}

#[test]
fn cascading_commits_emit_the_settled_value_last() {
    // Listeners attached before install run ahead of the module's wires.
    let bus = Bus::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    for event in ["SearchBoxQueryChanged", "SearchBoxQueryEcho"] {
        let sink = log.clone();
        bus.on(event).subscribe(move |e| {
            sink.lock().unwrap().push((e.name.clone(), e.payload.clone()));
            Ok(())
        });
    }
    let plugin = XPlugin::new(bus.clone());
    plugin
        .install(options().with_initial_module(normalizing_search_box()))
        .unwrap();

    bus.emit("UserTypedAQuery", json!("LAMP"), WireMetadata::default())
        .unwrap();

    let store = plugin.store().unwrap();
    let query = store.get(&module_path("searchBox"), "query").unwrap();
    assert_eq!(query, Some(json!("lamp")));
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            ("SearchBoxQueryChanged".to_string(), json!("LAMP")),
            ("SearchBoxQueryChanged".to_string(), json!("lamp")),
            ("SearchBoxQueryEcho".to_string(), json!("lamp")),
        ]
    );
}

#[test]
fn every_emitter_ends_on_the_stored_value() {
    let bus = Bus::new();
    let changed = record(&bus, "SearchBoxQueryChanged");
    let echoes = record(&bus, "SearchBoxQueryEcho");
    let plugin = XPlugin::new(bus.clone());
    plugin
        .install(options().with_initial_module(normalizing_search_box()))
        .unwrap();

    for query in ["LAMP", "desk", "Sofa"] {
        bus.emit("UserTypedAQuery", json!(query), WireMetadata::default())
            .unwrap();
    }

    let stored = plugin
        .store()
        .unwrap()
        .get(&module_path("searchBox"), "query")
        .unwrap();
    assert_eq!(stored, Some(json!("sofa")));
    assert_eq!(*echoes.lock().unwrap(), vec![json!("lamp"), json!("desk"), json!("sofa")]);
    assert_eq!(changed.lock().unwrap().last().cloned(), stored);
}

#[test]
fn wire_errors_reach_the_emitter() {
    let failing = XModule::new("identifierResults", StoreModule::default()).with_wiring(
        create_wiring([(
            "UserAcceptedAQuery",
            vec![("saveQuery", with_module("identifierResults").wire_commit("missing"))],
        )])
        .unwrap(),
    );
    let plugin = installed(options().with_initial_module(failing));
    let err = plugin
        .bus()
        .emit("UserAcceptedAQuery", json!("lamp"), WireMetadata::default())
        .unwrap_err();
    assert!(err.to_string().contains("missing"));
}

// =========================================================================
// Customization
// =========================================================================

#[test]
fn module_options_customize_state_and_wiring() {
    let replacement = with_module("searchBox").wire_commit_with("setQuery", json!("fixed"));
    let plugin = installed(
        options()
            .with_initial_module(search_box())
            .with_module_options(
                "searchBox",
                ModuleOptions::default()
                    .with_config(json!({"config": {"instant": false}}))
                    .with_wiring(
                        create_wiring([(
                            "UserAcceptedAQuery",
                            vec![("setSearchBoxQuery", replacement)],
                        )])
                        .unwrap(),
                    ),
            ),
    );

    let store = plugin.store().unwrap();
    let path = module_path("searchBox");
    assert_eq!(store.get(&path, "config.instant").unwrap(), Some(json!(false)));

    plugin
        .bus()
        .emit("UserAcceptedAQuery", json!("lamp"), WireMetadata::default())
        .unwrap();
    assert_eq!(store.get(&path, "query").unwrap(), Some(json!("fixed")));
    assert_eq!(plugin.bus().subscriber_count("UserAcceptedAQuery"), 1);
}

#[test]
fn config_wins_over_private_state_override() {
    let module = XModule::new("facets", StoreModule::with_state(json!({"a": 1, "b": 1})));
    let plugin = installed(
        options()
            .with_initial_module(module)
            .with_module_options("facets", ModuleOptions::default().with_config(json!({"c": 3})))
            .with_private_module_options(
                "facets",
                PrivateModuleOptions::default()
                    .with_store_module(StoreModuleOverride::default().with_state(json!({"b": 2, "c": 2}))),
            ),
    );
    assert_eq!(
        plugin.store().unwrap().state(&module_path("facets")).unwrap(),
        json!({"a": 1, "b": 2, "c": 3})
    );
}

// =========================================================================
// Adapter and teardown
// =========================================================================

#[test]
fn adapter_config_changes_are_relayed_until_teardown() {
    let adapter = Arc::new(MemoryAdapter::new());
    let bus = Bus::new();
    let changes = record(&bus, "AdapterConfigChanged");
    let plugin = XPlugin::new(bus);
    plugin
        .install(XPluginOptions::new(adapter.clone()).with_initial_module(search_box()))
        .unwrap();

    adapter.set_config(json!({"lang": "es"}));
    assert_eq!(*changes.lock().unwrap(), vec![json!({"lang": "es"})]);

    plugin.teardown();
    adapter.set_config(json!({"lang": "en"}));
    assert_eq!(changes.lock().unwrap().len(), 1);
}

#[test]
fn teardown_detaches_wires_and_emitters() {
    let store = Store::new();
    let plugin = installed(options().with_store(store.clone()).with_initial_module(search_box()));
    assert_eq!(plugin.bus().subscriber_count("UserAcceptedAQuery"), 1);
    assert_eq!(store.watcher_count(), 1);

    plugin.teardown();
    assert_eq!(plugin.bus().subscriber_count("UserAcceptedAQuery"), 0);
    assert_eq!(store.watcher_count(), 0);
    assert_eq!(plugin.lifecycle(), Lifecycle::Uninstalled);
    // State survives for inspection.
    assert_eq!(store.get(&module_path("searchBox"), "query").unwrap(), Some(json!("")));
}

#[tokio::test(start_paused = true)]
async fn debounced_wire_runs_once_with_the_last_event() {
    let module = XModule::new(
        "querySuggestions",
        StoreModule::with_state(json!({"query": "", "requests": 0}))
            .mutation("setQuery", |state, payload| {
                state["query"] = payload;
                let requests = state["requests"].as_i64().unwrap_or(0);
                state["requests"] = json!(requests + 1);
            }),
    )
    .with_wiring(
        create_wiring([(
            "UserIsTypingAQuery",
            vec![(
                "setQuerySuggestionsQueryDebounced",
                debounce(
                    with_module("querySuggestions").wire_commit("setQuery"),
                    Duration::from_millis(200),
                )
                .unwrap(),
            )],
        )])
        .unwrap(),
    );
    let plugin = installed(options().with_initial_module(module));
    let bus = plugin.bus().clone();

    for query in ["l", "la", "lam", "lamp"] {
        bus.emit("UserIsTypingAQuery", json!(query), WireMetadata::default())
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let path = module_path("querySuggestions");
    let store = plugin.store().unwrap();
    assert_eq!(store.get(&path, "requests").unwrap(), Some(json!(0)));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(store.state(&path).unwrap(), json!({"query": "lamp", "requests": 1}));
}

#[tokio::test(start_paused = true)]
async fn debounced_emitters_registered_by_install_collapse_bursts() {
    let module = XModule::new(
        "searchBox",
        StoreModule::with_state(json!({"query": ""})).mutation("setQuery", set_field("query")),
    )
    .with_store_emitters(StoreEmitters::new().emitter(
        "SearchBoxQueryChanged",
        StoreEmitter::state("query").with_debounce(Duration::from_millis(100)),
    ));
    let plugin = installed(options().with_initial_module(module));
    let changed = record(plugin.bus(), "SearchBoxQueryChanged");

    let store = plugin.store().unwrap();
    for query in ["l", "la", "lam"] {
        store
            .commit(&module_path("searchBox"), "setQuery", json!(query))
            .unwrap();
    }
    assert!(changed.lock().unwrap().is_empty());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(*changed.lock().unwrap(), vec![json!("lam")]);
}

#[test]
fn debounced_emitters_need_a_runtime_to_install() {
    let module = XModule::new("searchBox", StoreModule::with_state(json!({"query": ""})))
        .with_store_emitters(StoreEmitters::new().emitter(
            "SearchBoxQueryChanged",
            StoreEmitter::state("query").with_debounce(Duration::from_millis(100)),
        ));
    let store = Store::new();
    let plugin = XPlugin::new(Bus::new());

    let err = plugin
        .install(options().with_store(store.clone()).with_initial_module(module))
        .unwrap_err();
    assert!(matches!(err, PluginError::NoRuntime { .. }));
    assert!(!plugin.is_installed());
    assert_eq!(store.root_state(), json!({}));
}
