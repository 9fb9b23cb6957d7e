//! End-to-end flows: request parameters in, enveloped document out.

mod common;

use common::{ScriptedManager, ok_response};
use std::time::Instant;
use tokio::io::duplex;
use vmp_console::query::{FetchManyOptions, created_resource_id};
use vmp_console::{
    CapabilitySet, Command, CommandBuilder, Credentials, Entity, EnvelopeBuilder,
    ManagerConnection, Params, QueryEngine, error_envelope,
};

#[tokio::test]
async fn list_page_round_trip_produces_one_envelope() {
    let start = Instant::now();
    let (client, server) = duplex(64 * 1024);
    let manager = ScriptedManager::spawn(
        server,
        vec![
            r#"<get_tasks_response status="200" status_text="OK"><task id="t1"><name>Weekly scan</name></task></get_tasks_response>"#.to_string(),
            ok_response("get_filters"),
            ok_response("get_settings"),
        ],
    );
    let mut conn = ManagerConnection::new(client);
    let mut creds = Credentials::new(
        "alice",
        "Admin",
        CapabilitySet::new(["get_tasks", "get_filters"]),
    );

    let mut params = Params::new();
    params.add("filt_id", b"0");
    params.add("filter", b"");
    let fragment = QueryEngine::new(&mut conn, &mut creds)
        .fetch_many("task", &params, FetchManyOptions::default())
        .await
        .unwrap();

    let page = EnvelopeBuilder::new(&creds, start)
        .with_params(&params)
        .with_caller("cmd=get_task&filt_id=0&filter=", "get_tasks")
        .build(&fragment);

    let envelope = Entity::parse(page.as_bytes()).unwrap();
    assert_eq!(envelope.name(), "envelope");
    assert_eq!(envelope.child("login").unwrap().text(), "alice");
    assert_eq!(
        envelope.child("caller").unwrap().text(),
        "?cmd=get_tasks&filt_id=0&filter="
    );

    let tasks = envelope.child("get_tasks_response").unwrap();
    assert_eq!(
        tasks.child("task").unwrap().child("name").unwrap().text(),
        "Weekly scan"
    );
    assert!(envelope.child("get_filters_response").is_some());
    assert!(envelope.child("get_settings_response").is_some());

    manager.finish().await;
}

#[tokio::test]
async fn a_mid_batch_failure_yields_exactly_one_error_document() {
    let start = Instant::now();
    let (client, server) = duplex(64 * 1024);
    let manager = ScriptedManager::spawn(server, vec![ok_response("get_tasks")]);
    let mut conn = ManagerConnection::new(client);
    let mut creds = Credentials::new(
        "alice",
        "Admin",
        CapabilitySet::new(["get_tasks", "get_filters"]),
    );

    let mut params = Params::new();
    params.add("filt_id", b"0");
    let result = QueryEngine::new(&mut conn, &mut creds)
        .fetch_many("task", &params, FetchManyOptions::default())
        .await;

    let err = result.unwrap_err();
    let (page, status) = error_envelope(&creds, Some(&params), start, &err);
    assert_eq!(status, 500);

    // Envelope-shaped, with the error page and no partial fragments.
    let envelope = Entity::parse(page.as_bytes()).unwrap();
    assert_eq!(envelope.name(), "envelope");
    assert!(envelope.child("error_page").is_some());
    assert!(envelope.child("get_tasks_response").is_none());

    manager.finish().await;
}

#[tokio::test]
async fn delete_then_show_next_reuses_the_id_parameter() {
    let (client, server) = duplex(64 * 1024);
    let manager = ScriptedManager::spawn(
        server,
        vec![
            ok_response("delete_asset"),
            r#"<get_assets_response status="200" status_text="OK"><asset id="a-2"/></get_assets_response>"#.to_string(),
            ok_response("get_tags"),
        ],
    );
    let mut conn = ManagerConnection::new(client);
    let mut creds = Credentials::new(
        "alice",
        "Admin",
        CapabilitySet::new(["get_assets", "get_tags"]),
    );

    let mut params = Params::new();
    params.add("asset_id", b"a-1");
    params.add("next_id", b"a-2");

    let mut engine = QueryEngine::new(&mut conn, &mut creds);
    let delete = CommandBuilder::new("delete_asset")
        .attr("asset_id", params.value("asset_id").unwrap())
        .build();
    engine.run(&delete, "deleting an asset").await.unwrap();

    // The asset_id parameter doubles as "the asset to show next".
    params.promote_next_id("asset_id");
    let fragment = engine.fetch_one("asset", &params, &[]).await.unwrap();
    assert!(fragment.contains(r#"<asset id="a-2"/>"#));

    let commands = manager.finish().await;
    assert_eq!(commands[0], r#"<delete_asset asset_id="a-1"/>"#);
    assert_eq!(commands[1], r#"<get_assets asset_id="a-2" details="1"/>"#);
}

#[tokio::test]
async fn create_flow_surfaces_the_new_resource_id() {
    let (client, server) = duplex(64 * 1024);
    let manager = ScriptedManager::spawn(
        server,
        vec![
            r#"<create_target_response status="201" status_text="OK, resource created" id="new-7"/>"#.to_string(),
        ],
    );
    let mut conn = ManagerConnection::new(client);
    let mut creds = Credentials::new("alice", "Admin", CapabilitySet::new(["create_target"]));

    let command = CommandBuilder::new("create_target")
        .child(CommandBuilder::new("name").text("DMZ & lab"))
        .child(CommandBuilder::new("hosts").text("192.0.2.0/24"))
        .build();
    let response = QueryEngine::new(&mut conn, &mut creds)
        .run(&command, "creating a target")
        .await
        .unwrap();
    assert_eq!(created_resource_id(&response), Some("new-7"));

    let commands = manager.finish().await;
    // The & in the caller-supplied name went over the wire escaped.
    assert_eq!(
        commands[0],
        "<create_target><name>DMZ &amp; lab</name><hosts>192.0.2.0/24</hosts></create_target>"
    );
}

#[tokio::test]
async fn session_capabilities_come_from_the_help_response() {
    let (client, server) = duplex(64 * 1024);
    let manager = ScriptedManager::spawn(
        server,
        vec![
            r#"<help_response status="200" status_text="OK"><schema><command><name>GET_TASKS</name></command><command><name>GET_SETTINGS</name></command></schema></help_response>"#.to_string(),
            ok_response("get_tasks"),
            ok_response("get_settings"),
        ],
    );
    let mut conn = ManagerConnection::new(client);

    // A protocol literal with no caller data goes through Command::raw.
    let help = Command::raw("help", r#"<help format="xml"/>"#);
    let mut creds = Credentials::new("alice", "Admin", CapabilitySet::default());
    let response = QueryEngine::new(&mut conn, &mut creds)
        .run(&help, "reading capabilities")
        .await
        .unwrap();
    creds.capabilities = CapabilitySet::from_help_response(&response);
    assert!(creds.capabilities.may("get_tasks"));
    assert!(!creds.capabilities.may("get_filters"));

    // The gated sub-steps now follow the parsed capability set.
    let mut params = Params::new();
    params.add("filt_id", b"0");
    QueryEngine::new(&mut conn, &mut creds)
        .fetch_many("task", &params, FetchManyOptions::default())
        .await
        .unwrap();

    let commands = manager.finish().await;
    assert_eq!(commands.len(), 3);
    assert!(commands[1].starts_with("<get_tasks "));
    assert!(commands[2].starts_with("<get_settings "));
}
