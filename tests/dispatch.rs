//! End-to-end dispatch: detection, routing, controller lifecycle, nested
//! requests, and transmission through a buffered transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use hmvc::cache::MemoryCache;
use hmvc::context::Context;
use hmvc::controller::{Controller, ControllerDef, Controllers};
use hmvc::dispatch::{Dispatcher, Interaction};
use hmvc::http::{BufferTransport, Environment, FileSource, SendFileOptions, StatusCode};
use hmvc::router::{Route, Routes};
use hmvc::{Config, Error, Result};
use tracing_subscriber::EnvFilter;

/// Wraps the action output in markers from `before` and `after`.
#[derive(Default)]
struct Pages {
    title: String,
}

impl Controller for Pages {
    fn before(&mut self, cx: &mut Context<'_>) -> Result<()> {
        if cx.request().query().contains("deny") {
            return Err(Error::action("denied in before"));
        }
        self.title = "pages".to_owned();
        cx.response_mut().write("[");
        Ok(())
    }

    fn after(&mut self, cx: &mut Context<'_>) -> Result<()> {
        cx.response_mut().write("]");
        Ok(())
    }
}

impl Pages {
    fn show(&mut self, cx: &mut Context<'_>, params: &[String]) -> Result<()> {
        cx.response_mut()
            .write(format!("{} {}", self.title, params.join("/")));
        Ok(())
    }

    fn parent(&mut self, cx: &mut Context<'_>, _: &[String]) -> Result<()> {
        let before = cx.ambient().clone();
        assert_eq!(cx.stack().depth(), 1);

        let mut child = cx.factory("pages/boom")?;
        let err = cx.execute(&mut child).unwrap_err();
        assert!(matches!(err, Error::Action(_)));
        assert_eq!(
            child.response().map(|r| r.status()),
            Some(StatusCode::InternalServerError)
        );

        assert_eq!(cx.stack().depth(), 1);
        assert_eq!(cx.ambient(), &before);
        cx.response_mut().write("recovered");
        Ok(())
    }

    fn boom(&mut self, cx: &mut Context<'_>, _: &[String]) -> Result<()> {
        assert_eq!(cx.stack().depth(), 2);
        assert!(!cx.stack().current().unwrap().initial);
        assert_eq!(cx.ambient().server.get("REQUEST_URI"), Some("/pages/boom"));
        Err(Error::action("boom"))
    }

    fn outer(&mut self, cx: &mut Context<'_>, _: &[String]) -> Result<()> {
        let mut child = cx
            .factory("pages/inner")?
            .with_query([("page", "2")].into_iter().collect());
        let response = cx.execute(&mut child)?;
        assert_eq!(cx.ambient().query.get("page"), None);
        cx.response_mut().write(response.bytes());
        Ok(())
    }

    fn inner(&mut self, cx: &mut Context<'_>, _: &[String]) -> Result<()> {
        let page = cx.ambient().query.get("page").unwrap_or("none").to_owned();
        let agent = cx.request().header("user-agent").unwrap_or_default();
        cx.response_mut().write(format!("page {page} for {agent}"));
        Ok(())
    }

    fn orphan(&mut self, cx: &mut Context<'_>, _: &[String]) -> Result<()> {
        let mut child = cx.factory("nothere/x")?;
        let outcome = cx.execute(&mut child);
        assert_eq!(
            child.response().map(|r| r.status()),
            Some(StatusCode::NotFound)
        );
        outcome?;
        Ok(())
    }

    fn stray(&mut self, cx: &mut Context<'_>, _: &[String]) -> Result<()> {
        let body = cx.fetch("one/two/three/four")?;
        cx.response_mut().write(body);
        Ok(())
    }

    fn negotiate(&mut self, cx: &mut Context<'_>, _: &[String]) -> Result<()> {
        let mut child = cx
            .factory("pages/preferred")?
            .with_header("Accept", "text/plain;q=0.2, application/json");
        let response = cx.execute(&mut child)?;
        cx.response_mut().write(response.bytes());
        Ok(())
    }

    fn preferred(&mut self, cx: &mut Context<'_>, _: &[String]) -> Result<()> {
        let first = cx
            .request()
            .headers()
            .first("accept")
            .map(|v| v.value().to_owned())
            .unwrap_or_default();
        cx.response_mut().write(first);
        Ok(())
    }

    fn cached(&mut self, cx: &mut Context<'_>, _: &[String]) -> Result<()> {
        cx.check_cache(Some("\"v1\""))?;
        cx.response_mut().write("fresh");
        Ok(())
    }

    fn wrapper(&mut self, cx: &mut Context<'_>, _: &[String]) -> Result<()> {
        let body = cx.fetch("pages/cached")?;
        cx.response_mut().write(body);
        Ok(())
    }

    fn moved(&mut self, cx: &mut Context<'_>, _: &[String]) -> Result<()> {
        cx.redirect("login", StatusCode::Found)?;
        Ok(())
    }

    fn export(&mut self, cx: &mut Context<'_>, _: &[String]) -> Result<()> {
        cx.response_mut().set_body("id,name\n1,widget\n");
        cx.send_file(FileSource::Body, Some("report.csv"), SendFileOptions::default())?;
        Ok(())
    }
}

struct Items;

impl Controller for Items {}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn dispatcher() -> Dispatcher {
    init_tracing();

    let mut routes = Routes::new();
    routes
        .set(
            "legacy",
            Route::new("archive/:id")
                .unwrap()
                .defaults([("controller", "pages"), ("action", "show")]),
        )
        .unwrap()
        .set(
            "default",
            Route::new("(:controller(/:action(/:id)))")
                .unwrap()
                .defaults([("controller", "pages"), ("action", "index")]),
        )
        .unwrap();

    let mut controllers = Controllers::new();
    controllers
        .register(
            "pages",
            ControllerDef::new(Pages::default)
                .action("show", Pages::show)
                .action("parent", Pages::parent)
                .action("boom", Pages::boom)
                .action("outer", Pages::outer)
                .action("inner", Pages::inner)
                .action("orphan", Pages::orphan)
                .action("stray", Pages::stray)
                .action("negotiate", Pages::negotiate)
                .action("preferred", Pages::preferred)
                .action("cached", Pages::cached)
                .action("wrapper", Pages::wrapper)
                .action("moved", Pages::moved)
                .action("export", Pages::export),
        )
        .register(
            "items",
            ControllerDef::new(|| Items)
                .action("index", |_, cx, _| {
                    cx.response_mut().write("all items");
                    Ok(())
                })
                .action("update", |_, cx, params| {
                    let title = cx.request().post().get("title").unwrap_or_default().to_owned();
                    cx.response_mut()
                        .write(format!("updated {} to {title}", params.join("")));
                    Ok(())
                })
                .restful(),
        )
        .register_abstract("", "template");

    Dispatcher::new(Config::default(), routes, controllers)
}

fn serve(dispatcher: &Dispatcher, vars: &[(&str, &str)]) -> (StatusCode, BufferTransport) {
    let env = Environment::from_server_vars(vars.iter().copied());
    let mut out = BufferTransport::new();
    let status = dispatcher.serve(&env, &mut out).unwrap();
    (status, out)
}

fn body(out: &BufferTransport) -> String {
    String::from_utf8_lossy(out.body()).into_owned()
}

#[test]
fn lifecycle_wraps_the_action() {
    let (status, out) = serve(&dispatcher(), &[("PATH_INFO", "/pages/show/7")]);
    assert_eq!(status, StatusCode::Ok);
    assert_eq!(body(&out), "[pages 7]");
    assert!(out.head().contains(&"Content-Type: text/html; charset=utf-8".to_owned()));
}

#[test]
fn failing_before_skips_action_and_after() {
    let (status, out) = serve(
        &dispatcher(),
        &[("PATH_INFO", "/pages/show/7"), ("QUERY_STRING", "deny=1")],
    );
    assert_eq!(status, StatusCode::InternalServerError);
    assert_eq!(out.head()[0], "HTTP/1.1 500 Internal Server Error");
    assert!(!body(&out).contains("pages"));
}

#[test]
fn routes_are_tried_in_registration_order() {
    let (_, out) = serve(&dispatcher(), &[("PATH_INFO", "/archive/42")]);
    assert_eq!(body(&out), "[pages 42]");

    let dispatcher = dispatcher();
    let request = dispatcher.factory("archive/42").unwrap();
    assert_eq!(request.route_name(), Some("legacy"));
    let request = dispatcher.factory("pages/show/42").unwrap();
    assert_eq!(request.route_name(), Some("default"));
}

#[test]
fn nested_failure_restores_parent_state() {
    let (status, out) = serve(&dispatcher(), &[("PATH_INFO", "/pages/parent")]);
    assert_eq!(status, StatusCode::Ok);
    assert_eq!(body(&out), "[recovered]");
}

#[test]
fn unresolved_child_fails_the_parent_with_server_error() {
    let dispatcher = dispatcher();

    let (status, out) = serve(&dispatcher, &[("PATH_INFO", "/pages/orphan")]);
    assert_eq!(status, StatusCode::InternalServerError);
    assert!(out.head()[0].starts_with("HTTP/1.1 500 "));
    assert_eq!(body(&out), "Internal Server Error");

    let (status, _) = serve(&dispatcher, &[("PATH_INFO", "/pages/stray")]);
    assert_eq!(status, StatusCode::InternalServerError);
}

#[test]
fn nested_headers_are_sorted_by_quality() {
    let (status, out) = serve(&dispatcher(), &[("PATH_INFO", "/pages/negotiate")]);
    assert_eq!(status, StatusCode::Ok);
    assert_eq!(body(&out), "[[application/json]]");
}

#[test]
fn hostile_accept_header_is_served() {
    let accept = (0..40)
        .map(|i| {
            let q = ["NaN", "inf", "0.5", "-inf"][i % 4];
            format!("text/x{i};q={q}")
        })
        .collect::<Vec<_>>()
        .join(", ");
    let (status, out) = serve(
        &dispatcher(),
        &[("PATH_INFO", "/pages/show/1"), ("HTTP_ACCEPT", &accept)],
    );
    assert_eq!(status, StatusCode::Ok);
    assert_eq!(body(&out), "[pages 1]");
}

#[test]
fn nested_request_sees_its_own_environment() {
    let (status, out) = serve(
        &dispatcher(),
        &[
            ("PATH_INFO", "/pages/outer"),
            ("QUERY_STRING", "debug=1"),
            ("HTTP_USER_AGENT", "curl/8.0"),
        ],
    );
    assert_eq!(status, StatusCode::Ok);
    assert_eq!(body(&out), "[[page 2 for curl/8.0]]");
}

#[test]
fn matching_etag_halts_with_not_modified() {
    let (status, out) = serve(
        &dispatcher(),
        &[("PATH_INFO", "/pages/cached"), ("HTTP_IF_NONE_MATCH", "\"v1\"")],
    );
    assert_eq!(status, StatusCode::NotModified);
    assert_eq!(out.head()[0], "HTTP/1.1 304 Not Modified");
    assert!(out.head().contains(&"ETag: \"v1\"".to_owned()));
    assert!(out.body().is_empty());

    let (status, out) = serve(&dispatcher(), &[("PATH_INFO", "/pages/cached")]);
    assert_eq!(status, StatusCode::Ok);
    assert_eq!(body(&out), "[fresh]");
}

#[test]
fn nested_check_cache_uses_inherited_validators() {
    let (status, out) = serve(
        &dispatcher(),
        &[("PATH_INFO", "/pages/wrapper"), ("HTTP_IF_NONE_MATCH", "\"v1\"")],
    );
    assert_eq!(status, StatusCode::NotModified);
    assert!(out.body().is_empty());
}

#[test]
fn redirect_sends_location() {
    let (status, out) = serve(&dispatcher(), &[("PATH_INFO", "/pages/moved")]);
    assert_eq!(status, StatusCode::Found);
    assert_eq!(out.head()[0], "HTTP/1.1 302 Found");
    assert!(out.head().contains(&"Location: /index.php/login".to_owned()));
    assert!(out.body().is_empty());
}

#[test]
fn body_download_streams_attachment() {
    let (status, out) = serve(&dispatcher(), &[("PATH_INFO", "/pages/export")]);
    assert_eq!(status, StatusCode::Ok);
    assert!(
        out.head()
            .contains(&"Content-Disposition: attachment; filename=\"report.csv\"".to_owned())
    );
    assert!(out.head().contains(&"Content-Type: text/csv".to_owned()));
    assert_eq!(body(&out), "id,name\n1,widget\n");
}

#[test]
fn restful_controller_maps_methods() {
    let dispatcher = dispatcher();

    let (_, out) = serve(&dispatcher, &[("PATH_INFO", "/items"), ("REQUEST_METHOD", "GET")]);
    assert_eq!(body(&out), "all items");

    let env = Environment::from_server_vars([
        ("PATH_INFO", "/items/anything/9"),
        ("REQUEST_METHOD", "PUT"),
    ])
    .with_body("title=Gadget");
    let mut out = BufferTransport::new();
    assert_eq!(dispatcher.serve(&env, &mut out).unwrap(), StatusCode::Ok);
    assert_eq!(body(&out), "updated 9 to Gadget");

    let (status, out) = serve(&dispatcher, &[("PATH_INFO", "/items"), ("REQUEST_METHOD", "PATCH")]);
    assert_eq!(status, StatusCode::MethodNotAllowed);
    assert!(out.head().contains(&"Allow: GET, PUT, POST, DELETE".to_owned()));
}

#[test]
fn unknown_targets_are_not_found() {
    let dispatcher = dispatcher();
    let (status, _) = serve(&dispatcher, &[("PATH_INFO", "/nobody")]);
    assert_eq!(status, StatusCode::NotFound);
    let (status, _) = serve(&dispatcher, &[("PATH_INFO", "/pages/nothing")]);
    assert_eq!(status, StatusCode::NotFound);

    let mut out = BufferTransport::new();
    let mut interaction = Interaction::new(&mut out);
    let mut request = dispatcher.factory("template").unwrap();
    let err = dispatcher.execute(&mut request, &mut interaction).unwrap_err();
    assert!(matches!(err, Error::ControllerNotFound { .. }));
    assert!(request.response().is_none());
}

#[test]
fn cached_responses_skip_dispatch() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let mut routes = Routes::new();
    routes
        .set("default", Route::new("(:controller(/:action))").unwrap())
        .unwrap();
    let mut controllers = Controllers::new();
    controllers.register(
        "clock",
        ControllerDef::new(|| Items).action("index", move |_, cx, _| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            cx.response_mut().write(format!("tick {n}"));
            Ok(())
        }),
    );

    let cache = Arc::new(MemoryCache::new());
    let dispatcher = Dispatcher::new(Config::default(), routes, controllers).with_cache(cache.clone());

    let mut out = BufferTransport::new();
    let mut interaction = Interaction::new(&mut out);
    for _ in 0..3 {
        let mut request = dispatcher.factory("clock").unwrap();
        let response = dispatcher.execute(&mut request, &mut interaction).unwrap();
        assert_eq!(response.bytes(), b"tick 1");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.len(), 1);
}
