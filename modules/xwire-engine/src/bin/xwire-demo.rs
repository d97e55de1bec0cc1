use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

use xwire_engine::emitters::{StoreEmitter, StoreEmitters};
use xwire_engine::wire::filter_truthy_payload;
use xwire_engine::{
    create_wiring, global, load_install_config, with_module, InstallConfig, MemoryAdapter,
    WireMetadata, XModule, XPluginOptions,
};
use xwire_state::mutations::set_field;
use xwire_state::StoreModule;

fn search_box() -> Result<XModule> {
    let wires = with_module("searchBox");
    Ok(XModule::new(
        "searchBox",
        StoreModule::with_state(json!({"query": ""})).mutation("setQuery", set_field("query")),
    )
    .with_store_emitters(
        StoreEmitters::new().emitter("SearchBoxQueryChanged", StoreEmitter::state("query")),
    )
    .with_wiring(create_wiring([(
        "UserAcceptedAQuery",
        vec![("setSearchBoxQuery", wires.wire_commit("setQuery"))],
    )])?))
}

fn related_tags() -> Result<XModule> {
    let wires = with_module("relatedTags");
    let store_module = StoreModule::with_state(json!({
        "query": "",
        "relatedTags": [],
        "status": "initial",
        "config": {"maxItemsToRequest": 10},
    }))
    .mutation("setQuery", set_field("query"))
    .mutation("setRelatedTags", set_field("relatedTags"))
    .mutation("setStatus", set_field("status"))
    .getter("request", |state| {
        match state["query"].as_str() {
            Some(query) if !query.is_empty() => json!({
                "query": query,
                "rows": state["config"]["maxItemsToRequest"],
            }),
            _ => Value::Null,
        }
    })
    .action("fetchAndSaveRelatedTags", |ctx, request| {
        if request.is_null() {
            return ctx.commit("setRelatedTags", json!([])).map_err(Into::into);
        }
        ctx.commit("setStatus", json!("loading"))?;
        let adapter = global::adapter()?;
        let store = ctx.store().clone();
        let path = ctx.path().clone();
        tokio::spawn(async move {
            let result = match adapter.request("relatedTags", request).await {
                Ok(response) => store
                    .commit(&path, "setRelatedTags", response["relatedTags"].clone())
                    .and_then(|()| store.commit(&path, "setStatus", json!("success"))),
                Err(e) => {
                    tracing::error!(error = %e, "Related tags request failed");
                    store.commit(&path, "setStatus", json!("error"))
                }
            };
            if let Err(e) = result {
                tracing::error!(error = %e, "Failed to save related tags");
            }
        });
        Ok(())
    });

    Ok(XModule::new("relatedTags", store_module)
        .with_store_emitters(
            StoreEmitters::new()
                .emitter(
                    "RelatedTagsRequestChanged",
                    StoreEmitter::getter("request").with_debounce(Duration::from_millis(50)),
                )
                .emitter("RelatedTagsChanged", StoreEmitter::state("relatedTags")),
        )
        .with_wiring(create_wiring([
            (
                "UserAcceptedAQuery",
                vec![("setRelatedTagsQuery", wires.wire_commit("setQuery"))],
            ),
            (
                "RelatedTagsRequestChanged",
                vec![(
                    "fetchAndSaveRelatedTags",
                    wires.wire_dispatch("fetchAndSaveRelatedTags"),
                )],
            ),
            (
                "UserClearedQuery",
                vec![(
                    "clearRelatedTagsQuery",
                    filter_truthy_payload(wires.wire_commit_with("setQuery", json!(""))),
                )],
            ),
        ])?))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("xwire=info".parse()?))
        .init();

    info!("xwire demo starting...");

    // Optional TOML config path, plus an optional JSON override after it
    let config = match std::env::args().nth(1) {
        Some(path) => load_install_config(&PathBuf::from(path))?,
        None => InstallConfig::default(),
    };
    let config = match std::env::args().nth(2) {
        Some(json) => config.merged_with(InstallConfig::from_json_str(&json)?),
        None => config,
    };

    let adapter = Arc::new(MemoryAdapter::new().with_response(
        "relatedTags",
        json!({"relatedTags": [
            {"tag": "desk lamp", "query": "lamp desk"},
            {"tag": "floor lamp", "query": "lamp floor"},
        ]}),
    ));

    // Queued until the plugin is installed
    global::register_module(search_box()?)?;

    let plugin = global::install(
        XPluginOptions::new(adapter.clone())
            .with_initial_module(related_tags()?)
            .with_helper("lowercase", |value| {
                value
                    .as_str()
                    .map_or_else(|| value.clone(), |s| json!(s.to_lowercase()))
            })
            .with_install_config(config),
    )?;
    info!(modules = ?plugin.installed_modules(), "Plugin ready");

    let bus = global::bus()?;
    let _config_log = bus.on("AdapterConfigChanged").subscribe(|event| {
        info!(config = %event.payload, "Adapter config changed");
        Ok(())
    });
    let mut related = bus.on("RelatedTagsChanged").into_stream();

    let query = plugin
        .helper("lowercase")
        .map_or_else(|| json!("LAMP"), |lowercase| lowercase(&json!("LAMP")));
    bus.emit("UserAcceptedAQuery", query, WireMetadata::from_module("searchBox"))?;

    let event = tokio::time::timeout(Duration::from_secs(1), related.next())
        .await
        .context("Timed out waiting for related tags")?
        .context("Related tags stream closed")?;
    info!(tags = %event.payload, "Related tags received");

    adapter.set_config(json!({"lang": "es"}));

    let state = global::store()?.root_state();
    println!("{}", serde_json::to_string_pretty(&state)?);

    global::reset_instance();
    Ok(())
}
