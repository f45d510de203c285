//! End-to-end tests against a live Chrome.
//!
//! Chrome/Chromium is auto-downloaded via the fetcher if not in PATH.

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::session::SessionManager;
use crate::tools::{Dispatcher, ToolContent, ToolResult};

fn test_dispatcher() -> Dispatcher {
    Dispatcher::new(SessionManager::new())
}

async fn call(dispatcher: &Dispatcher, tool: &str, args: Value) -> ToolResult {
    dispatcher.dispatch(tool, &args).await
}

/// Simple HTTP test server that serves static content
struct TestServer {
    addr: std::net::SocketAddr,
    shutdown: tokio::sync::oneshot::Sender<()>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Start a test server with the given HTML content
    async fn start(html: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let html = html.to_string();
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    accept = listener.accept() => {
                        if let Ok((mut socket, _)) = accept {
                            let html = html.clone();
                            tokio::spawn(async move {
                                let mut buf = [0u8; 1024];
                                let _ = socket.read(&mut buf).await;

                                let response = format!(
                                    "HTTP/1.1 200 OK\r\n\
                                     Content-Type: text/html\r\n\
                                     Content-Length: {}\r\n\
                                     Connection: close\r\n\
                                     \r\n\
                                     {}",
                                    html.len(),
                                    html
                                );
                                let _ = socket.write_all(response.as_bytes()).await;
                            });
                        }
                    }
                }
            }
        });

        Self {
            addr,
            shutdown: shutdown_tx,
            handle,
        }
    }

    fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    async fn shutdown(self) {
        let _ = self.shutdown.send(());
        let _ = self.handle.await;
    }
}

// ============================================================================
// Navigation and session lifecycle
// ============================================================================

#[tokio::test]
async fn navigate_creates_session_and_reports_url() {
    let server = TestServer::start(
        r#"<!DOCTYPE html>
        <html>
        <head><title>Nav Test</title></head>
        <body><h1>Hello Browser Test</h1></body>
        </html>"#,
    )
    .await;

    let dispatcher = test_dispatcher();
    let result = call(&dispatcher, "navigate", json!({"url": server.url()})).await;

    assert!(!result.is_error, "Navigate failed: {}", result.text_content());
    let text = result.text_content();
    assert!(text.contains("Navigated to"), "Unexpected output: {text}");
    assert!(
        text.contains("Hello Browser Test"),
        "Text preview missing: {text}"
    );

    dispatcher.session_manager().close_all().await;
    server.shutdown().await;
}

#[tokio::test]
async fn tool_calls_before_any_session_fail_cleanly() {
    let dispatcher = test_dispatcher();

    for (tool, args) in [
        ("click", json!({"selector": "a"})),
        ("get_text_content", json!({})),
        ("list_pages", json!({})),
        ("screenshot", json!({"name": "s"})),
    ] {
        let result = call(&dispatcher, tool, args).await;
        assert!(result.is_error, "{tool} should fail without a session");
        assert!(
            result.text_content().contains("no active session"),
            "{tool}: {}",
            result.text_content()
        );
    }
}

#[tokio::test]
async fn new_session_replaces_active_session() {
    let server = TestServer::start(
        r#"<html><head><title>First</title></head><body><p>first session</p></body></html>"#,
    )
    .await;

    let dispatcher = test_dispatcher();
    call(&dispatcher, "navigate", json!({"url": server.url()})).await;

    let result = call(&dispatcher, "new_session", json!({})).await;
    assert!(!result.is_error, "{}", result.text_content());
    assert!(result.text_content().contains("Created new browser session"));

    // The fresh session starts on about:blank, not the old page
    let pages = call(&dispatcher, "list_pages", json!({})).await;
    assert!(!pages.is_error);
    assert!(
        pages.text_content().contains("about:blank"),
        "New session should start blank: {}",
        pages.text_content()
    );

    dispatcher.session_manager().close_all().await;
    server.shutdown().await;
}

// ============================================================================
// DOM tools
// ============================================================================

#[tokio::test]
async fn fill_then_read_text_content() {
    let server = TestServer::start(
        r#"<!DOCTYPE html>
        <html>
        <head><title>Fill Test</title></head>
        <body>
            <input type="text" id="user" />
            <div id="mirror"></div>
            <script>
                document.getElementById('user').addEventListener('input', (e) => {
                    document.getElementById('mirror').textContent = 'Got: ' + e.target.value;
                });
            </script>
        </body>
        </html>"#,
    )
    .await;

    let dispatcher = test_dispatcher();
    call(&dispatcher, "navigate", json!({"url": server.url()})).await;

    let result = call(
        &dispatcher,
        "fill",
        json!({"selector": "#user", "value": "alice"}),
    )
    .await;
    assert!(!result.is_error, "Fill failed: {}", result.text_content());

    // The input event fired, so the mirror div picked the value up
    let text = call(&dispatcher, "get_text_content", json!({})).await;
    assert!(!text.is_error);
    assert!(
        text.text_content().contains("Got: alice"),
        "Fill did not dispatch input events: {}",
        text.text_content()
    );

    dispatcher.session_manager().close_all().await;
    server.shutdown().await;
}

#[tokio::test]
async fn fill_missing_element_reports_not_found() {
    let server = TestServer::start("<html><body><div>No inputs here</div></body></html>").await;
    let dispatcher = test_dispatcher();
    call(&dispatcher, "navigate", json!({"url": server.url()})).await;

    let result = call(
        &dispatcher,
        "fill",
        json!({"selector": "#nonexistent", "value": "x"}),
    )
    .await;
    assert!(result.is_error, "Should fail when element not found");
    assert!(
        result.text_content().contains("no element matched"),
        "Should mention element not found: {}",
        result.text_content()
    );

    dispatcher.session_manager().close_all().await;
    server.shutdown().await;
}

#[tokio::test]
async fn click_runs_the_handler() {
    let server = TestServer::start(
        r#"<!DOCTYPE html>
        <html>
        <head><title>Click Test</title></head>
        <body>
            <button id="btn" onclick="document.getElementById('result').textContent = 'clicked'">Click me</button>
            <div id="result">not clicked</div>
        </body>
        </html>"#,
    )
    .await;

    let dispatcher = test_dispatcher();
    call(&dispatcher, "navigate", json!({"url": server.url()})).await;

    let result = call(&dispatcher, "click", json!({"selector": "#btn"})).await;
    assert!(!result.is_error, "Click failed: {}", result.text_content());

    let check = call(
        &dispatcher,
        "evaluate",
        json!({"script": "document.getElementById('result').textContent"}),
    )
    .await;
    assert!(
        check.text_content().contains("clicked"),
        "Button click didn't run: {}",
        check.text_content()
    );

    dispatcher.session_manager().close_all().await;
    server.shutdown().await;
}

#[tokio::test]
async fn click_text_picks_the_most_specific_match() {
    // "Submit order" appears in both the wrapper div and the button; the
    // button's own text is shorter, so the button must receive the click.
    let server = TestServer::start(
        r#"<!DOCTYPE html>
        <html>
        <head><title>ClickText Test</title></head>
        <body>
            <div id="wrapper">
                Please Submit order below
                <button onclick="document.getElementById('result').textContent = 'button'">Submit order</button>
            </div>
            <div id="result">none</div>
        </body>
        </html>"#,
    )
    .await;

    let dispatcher = test_dispatcher();
    call(&dispatcher, "navigate", json!({"url": server.url()})).await;

    let result = call(&dispatcher, "click_text", json!({"text": "Submit order"})).await;
    assert!(!result.is_error, "{}", result.text_content());

    let check = call(
        &dispatcher,
        "evaluate",
        json!({"script": "document.getElementById('result').textContent"}),
    )
    .await;
    assert!(
        check.text_content().contains("button"),
        "Wrong element clicked: {}",
        check.text_content()
    );

    dispatcher.session_manager().close_all().await;
    server.shutdown().await;
}

#[tokio::test]
async fn get_html_content_returns_inner_markup() {
    let server = TestServer::start(
        r#"<html><head><title>Html Test</title></head>
        <body><div id="box"><span class="inner">payload</span></div></body></html>"#,
    )
    .await;

    let dispatcher = test_dispatcher();
    call(&dispatcher, "navigate", json!({"url": server.url()})).await;

    let result = call(&dispatcher, "get_html_content", json!({"selector": "#box"})).await;
    assert!(!result.is_error, "{}", result.text_content());
    assert!(
        result.text_content().contains(r#"<span class="inner">payload</span>"#),
        "Inner HTML missing: {}",
        result.text_content()
    );

    dispatcher.session_manager().close_all().await;
    server.shutdown().await;
}

#[tokio::test]
async fn get_text_content_skips_hidden_elements() {
    let server = TestServer::start(
        r#"<html><head><title>Text Test</title></head>
        <body>
            <p>visible text</p>
            <p style="display: none;">hidden text</p>
            <input type="text" value="prefilled" />
        </body></html>"#,
    )
    .await;

    let dispatcher = test_dispatcher();
    call(&dispatcher, "navigate", json!({"url": server.url()})).await;

    let result = call(&dispatcher, "get_text_content", json!({})).await;
    assert!(!result.is_error);
    let text = result.text_content();
    assert!(text.contains("visible text"), "{text}");
    assert!(!text.contains("hidden text"), "{text}");
    assert!(text.contains("prefilled"), "value attribute missing: {text}");

    dispatcher.session_manager().close_all().await;
    server.shutdown().await;
}

// ============================================================================
// evaluate
// ============================================================================

#[tokio::test]
async fn evaluate_returns_serialized_value() {
    let server = TestServer::start(
        r#"<html><head><title>Eval Test</title></head>
        <body><div id="data" data-value="42"></div></body></html>"#,
    )
    .await;

    let dispatcher = test_dispatcher();
    call(&dispatcher, "navigate", json!({"url": server.url()})).await;

    let result = call(&dispatcher, "evaluate", json!({"script": "document.title"})).await;
    assert!(!result.is_error);
    assert!(
        result.text_content().contains("Eval Test"),
        "Title not found: {}",
        result.text_content()
    );

    let result = call(&dispatcher, "evaluate", json!({"script": "2 + 2"})).await;
    assert!(result.text_content().contains('4'));

    dispatcher.session_manager().close_all().await;
    server.shutdown().await;
}

#[tokio::test]
async fn evaluate_throw_is_reported_and_session_survives() {
    let server = TestServer::start("<html><head><title>Throw Test</title></head><body></body></html>").await;
    let dispatcher = test_dispatcher();
    call(&dispatcher, "navigate", json!({"url": server.url()})).await;

    let result = call(
        &dispatcher,
        "evaluate",
        json!({"script": "throw new Error('boom')"}),
    )
    .await;
    assert!(result.is_error, "Throw should be an error result");
    assert!(
        result.text_content().contains("evaluate:"),
        "Error should name the tool: {}",
        result.text_content()
    );

    // The session is still usable afterwards
    let result = call(&dispatcher, "evaluate", json!({"script": "1 + 1"})).await;
    assert!(!result.is_error, "{}", result.text_content());
    assert!(result.text_content().contains('2'));

    dispatcher.session_manager().close_all().await;
    server.shutdown().await;
}

// ============================================================================
// screenshot
// ============================================================================

#[tokio::test]
async fn screenshot_returns_png_image_content() {
    let server = TestServer::start(
        r#"<html><head><title>Shot Test</title></head>
        <body style="background: red; width: 100vw; height: 100vh;">
            <div id="target" style="width: 50px; height: 50px; background: blue;"></div>
        </body></html>"#,
    )
    .await;

    let dispatcher = test_dispatcher();
    call(&dispatcher, "navigate", json!({"url": server.url()})).await;

    for args in [
        json!({"name": "full"}),
        json!({"name": "element", "selector": "#target"}),
    ] {
        let result = call(&dispatcher, "screenshot", args.clone()).await;
        assert!(!result.is_error, "Screenshot failed: {}", result.text_content());
        match &result.content[0] {
            ToolContent::Image { data, mime_type } => {
                assert_eq!(mime_type, "image/png");
                // PNG magic bytes after base64 encoding
                assert!(data.starts_with("iVBORw0KGgo"), "Not valid PNG data");
            }
            other => panic!("Expected image content for {args}, got {other:?}"),
        }
    }

    dispatcher.session_manager().close_all().await;
    server.shutdown().await;
}

// ============================================================================
// Pages: listing, switching, post-click reconciliation
// ============================================================================

#[tokio::test]
async fn list_pages_shows_index_url_and_title() {
    let server = TestServer::start(
        r#"<html><head><title>List Test</title></head><body></body></html>"#,
    )
    .await;

    let dispatcher = test_dispatcher();
    call(&dispatcher, "navigate", json!({"url": server.url()})).await;

    let result = call(&dispatcher, "list_pages", json!({})).await;
    assert!(!result.is_error);
    let text = result.text_content();
    assert!(text.contains("Available pages:"), "{text}");
    assert!(text.contains("Page 0: URL="), "{text}");
    assert!(text.contains("Title=List Test"), "{text}");

    dispatcher.session_manager().close_all().await;
    server.shutdown().await;
}

#[tokio::test]
async fn switch_to_page_rejects_out_of_range_index() {
    let server = TestServer::start("<html><body></body></html>").await;
    let dispatcher = test_dispatcher();
    call(&dispatcher, "navigate", json!({"url": server.url()})).await;

    let result = call(&dispatcher, "switch_to_page", json!({"index": 99})).await;
    assert!(result.is_error);
    assert!(
        result.text_content().contains("invalid page index: 99"),
        "{}",
        result.text_content()
    );

    dispatcher.session_manager().close_all().await;
    server.shutdown().await;
}

#[tokio::test]
async fn click_that_opens_a_tab_switches_to_it() {
    let server = TestServer::start(
        r#"<!DOCTYPE html>
        <html>
        <head><title>Popup Test</title></head>
        <body>
            <a id="popup" href="/child" target="_blank">Open child</a>
        </body>
        </html>"#,
    )
    .await;

    let dispatcher = test_dispatcher();
    call(&dispatcher, "navigate", json!({"url": server.url()})).await;

    let result = call(&dispatcher, "click", json!({"selector": "#popup"})).await;
    assert!(!result.is_error, "Click failed: {}", result.text_content());

    // A second page is open now
    let pages = call(&dispatcher, "list_pages", json!({})).await;
    assert!(
        pages.text_content().contains("Page 1:"),
        "New tab missing from: {}",
        pages.text_content()
    );

    // And the new tab is the active one: its URL carries the /child path
    let url = call(
        &dispatcher,
        "evaluate",
        json!({"script": "window.location.pathname"}),
    )
    .await;
    assert!(
        url.text_content().contains("/child"),
        "Active page should be the popup: {}",
        url.text_content()
    );

    dispatcher.session_manager().close_all().await;
    server.shutdown().await;
}

#[tokio::test]
async fn click_without_navigation_keeps_the_page() {
    let server = TestServer::start(
        r#"<html><head><title>Stay Test</title></head>
        <body><button id="noop" onclick="void 0">Do nothing</button></body></html>"#,
    )
    .await;

    let dispatcher = test_dispatcher();
    call(&dispatcher, "navigate", json!({"url": server.url()})).await;

    let before = call(&dispatcher, "list_pages", json!({})).await.text_content();
    let result = call(&dispatcher, "click", json!({"selector": "#noop"})).await;
    assert!(!result.is_error);
    let after = call(&dispatcher, "list_pages", json!({})).await.text_content();

    assert_eq!(before, after, "Page set changed after a no-op click");

    dispatcher.session_manager().close_all().await;
    server.shutdown().await;
}

#[tokio::test]
async fn click_in_place_navigation_settles_before_returning() {
    let server = TestServer::start(
        r##"<!DOCTYPE html>
        <html>
        <head><title>InPlace Test</title></head>
        <body><a id="go" href="/next">Go</a></body>
        </html>"##,
    )
    .await;

    let dispatcher = test_dispatcher();
    call(&dispatcher, "navigate", json!({"url": server.url()})).await;

    let result = call(&dispatcher, "click", json!({"selector": "#go"})).await;
    assert!(!result.is_error, "{}", result.text_content());

    // Immediately after the call returns, the page is already on /next
    let url = call(
        &dispatcher,
        "evaluate",
        json!({"script": "window.location.pathname"}),
    )
    .await;
    assert!(
        url.text_content().contains("/next"),
        "In-place navigation not settled: {}",
        url.text_content()
    );

    dispatcher.session_manager().close_all().await;
    server.shutdown().await;
}

// ============================================================================
// Frames
// ============================================================================

#[tokio::test]
async fn frame_tool_scopes_dom_operations() {
    // srcdoc iframe is same-origin, so its document is scriptable
    let server = TestServer::start(
        r#"<!DOCTYPE html>
        <html>
        <head><title>Frame Test</title></head>
        <body>
            <p id="outer">outer paragraph</p>
            <iframe name="inner" srcdoc="&lt;p id='inner-p'&gt;inner paragraph&lt;/p&gt;&lt;input id='inner-input' /&gt;"></iframe>
        </body>
        </html>"#,
    )
    .await;

    let dispatcher = test_dispatcher();
    call(&dispatcher, "navigate", json!({"url": server.url()})).await;

    let result = call(&dispatcher, "frame", json!({"name": "inner"})).await;
    assert!(!result.is_error, "{}", result.text_content());
    assert!(result.text_content().contains("Switched to frame with name 'inner'"));

    // DOM reads now see the frame's document, not the outer one
    let html = call(
        &dispatcher,
        "get_html_content",
        json!({"selector": "#inner-p"}),
    )
    .await;
    assert!(!html.is_error, "{}", html.text_content());
    assert!(html.text_content().contains("inner paragraph"));

    let fill = call(
        &dispatcher,
        "fill",
        json!({"selector": "#inner-input", "value": "framed"}),
    )
    .await;
    assert!(!fill.is_error, "{}", fill.text_content());

    // Reset returns operations to the main document
    let reset = call(&dispatcher, "frame", json!({})).await;
    assert!(reset.text_content().contains("Reset to main frame"));
    let html = call(&dispatcher, "get_html_content", json!({"selector": "#outer"})).await;
    assert!(html.text_content().contains("outer paragraph"));

    dispatcher.session_manager().close_all().await;
    server.shutdown().await;
}

#[tokio::test]
async fn switching_pages_clears_the_frame_override() {
    let server = TestServer::start(
        r#"<!DOCTYPE html>
        <html>
        <head><title>Frame Clear Test</title></head>
        <body>
            <p id="outer">main document text</p>
            <iframe name="inner" srcdoc="&lt;p&gt;frame document text&lt;/p&gt;"></iframe>
        </body>
        </html>"#,
    )
    .await;

    let dispatcher = test_dispatcher();
    call(&dispatcher, "navigate", json!({"url": server.url()})).await;

    let result = call(&dispatcher, "frame", json!({"name": "inner"})).await;
    assert!(!result.is_error, "{}", result.text_content());

    // Switching pages (even to the same index) drops the override
    let result = call(&dispatcher, "switch_to_page", json!({"index": 0})).await;
    assert!(!result.is_error, "{}", result.text_content());

    let text = call(&dispatcher, "get_text_content", json!({})).await;
    assert!(
        text.text_content().contains("main document text"),
        "Frame override survived the switch: {}",
        text.text_content()
    );

    dispatcher.session_manager().close_all().await;
    server.shutdown().await;
}

#[tokio::test]
async fn frame_tool_rejects_missing_frame() {
    let server = TestServer::start("<html><body><p>no frames</p></body></html>").await;
    let dispatcher = test_dispatcher();
    call(&dispatcher, "navigate", json!({"url": server.url()})).await;

    let result = call(&dispatcher, "frame", json!({"name": "ghost"})).await;
    assert!(result.is_error, "Missing frame should fail");
    assert!(
        result.text_content().contains("not found"),
        "{}",
        result.text_content()
    );

    // The rejected override must not poison later calls
    let text = call(&dispatcher, "get_text_content", json!({})).await;
    assert!(!text.is_error, "{}", text.text_content());
    assert!(text.text_content().contains("no frames"));

    dispatcher.session_manager().close_all().await;
    server.shutdown().await;
}
