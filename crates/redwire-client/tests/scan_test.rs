//! Integration tests for cursor-based key enumeration.

mod common;

use bytes::Bytes;

use common::{keys_to_strings, Delivery, Response, TestContext};
use redwire_client::proto::{Command, CommandFlags, RawReply, ServerVersion};
use redwire_client::{ClientConfig, Error, KeySequence, ScanOptions, ScanPosition};

const LETTERS: [&str; 5] = ["a", "b", "c", "d", "e"];

fn collect(keys: KeySequence) -> Vec<String> {
    let keys: Vec<Bytes> = keys.collect::<Result<_, _>>().unwrap();
    keys_to_strings(&keys)
}

fn numbered(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("key:{:03}", i)).collect()
}

#[test]
fn test_pages_in_server_order() {
    let ctx = TestContext::new(Delivery::Immediate);
    ctx.server.seed(0, &LETTERS);

    let keys = ctx
        .master_server()
        .keys_with(ScanOptions::new(0).with_page_size(2))
        .unwrap();
    assert!(keys.is_cursor());
    assert_eq!(collect(keys), LETTERS);
    assert_eq!(
        ctx.server.sent_lines(),
        ["SCAN 0 COUNT 2", "SCAN 2 COUNT 2", "SCAN 4 COUNT 2"]
    );
}

#[test]
fn test_every_page_size_yields_every_key() {
    let ctx = TestContext::new(Delivery::Immediate);
    let expected = numbered(23);
    let names: Vec<&str> = expected.iter().map(String::as_str).collect();
    ctx.server.seed(0, &names);

    for page_size in 1..=25 {
        let keys = ctx
            .master_server()
            .keys_with(ScanOptions::new(0).with_page_size(page_size))
            .unwrap();
        assert_eq!(collect(keys), expected, "page size {}", page_size);
    }
}

#[test]
fn test_resume_yields_the_remaining_suffix() {
    let ctx = TestContext::new(Delivery::Immediate);
    let expected = numbered(10);
    let names: Vec<&str> = expected.iter().map(String::as_str).collect();
    ctx.server.seed(0, &names);
    let server = ctx.master_server();

    for taken in 0..=10 {
        let mut keys = server
            .keys_with(ScanOptions::new(0).with_page_size(3))
            .unwrap();
        let head: Vec<Bytes> = keys.by_ref().take(taken).map(Result::unwrap).collect();
        assert_eq!(keys_to_strings(&head), expected[..taken].to_vec());

        let position = keys.position().unwrap();
        let resumed = server
            .keys_with(ScanOptions::new(0).resume_from(position))
            .unwrap();
        assert_eq!(collect(resumed), expected[taken..].to_vec(), "resumed after {}", taken);
    }
}

#[test]
fn test_resume_at_cursor_with_offset() {
    let ctx = TestContext::new(Delivery::Immediate);
    ctx.server.seed(0, &LETTERS);

    let options = ScanOptions::new(0)
        .with_page_size(2)
        .with_cursor(2)
        .with_page_offset(1);
    let keys = ctx.master_server().keys_with(options).unwrap();
    assert_eq!(collect(keys), ["d", "e"]);
}

#[test]
fn test_position_tracks_the_current_page() {
    let ctx = TestContext::new(Delivery::Immediate);
    ctx.server.seed(0, &LETTERS);

    let mut keys = ctx
        .master_server()
        .keys_with(ScanOptions::new(0).with_page_size(2))
        .unwrap();
    assert_eq!(
        keys.position(),
        Some(ScanPosition {
            cursor: 0,
            page_size: 2,
            page_offset: 0
        })
    );

    keys.next();
    keys.next();
    keys.next();
    assert_eq!(
        keys.position(),
        Some(ScanPosition {
            cursor: 2,
            page_size: 2,
            page_offset: 1
        })
    );

    // Exhausted cursors still report where they ended.
    assert_eq!(keys.by_ref().count(), 2);
    let end = keys.position().unwrap();
    assert_eq!((end.cursor, end.page_offset), (4, 1));
}

#[test]
fn test_one_page_in_flight() {
    let ctx = TestContext::new(Delivery::Immediate);
    ctx.server.seed(0, &LETTERS);

    let mut keys = ctx
        .master_server()
        .keys_with(ScanOptions::new(0).with_page_size(2))
        .unwrap();
    assert!(ctx.server.sent().is_empty(), "enumeration is lazy");

    keys.next();
    keys.next();
    assert_eq!(ctx.server.sent().len(), 1);
    keys.next();
    assert_eq!(ctx.server.sent().len(), 2);
}

#[test]
fn test_scan_message_shape() {
    let ctx = TestContext::new(Delivery::Immediate);
    ctx.server.seed(3, &["user:1", "user:2", "order:1"]);
    let server = ctx.master_server();

    let keys = server
        .keys_with(ScanOptions::new(3).with_pattern("user:*"))
        .unwrap();
    assert_eq!(collect(keys), ["user:1", "user:2"]);

    let keys = server
        .keys_with(ScanOptions::new(3).with_page_size(100))
        .unwrap();
    assert_eq!(collect(keys).len(), 3);

    let sent = ctx.server.sent();
    assert_eq!(sent[0].line(), "SCAN 0 MATCH user:*");
    assert_eq!(sent[0].database, 3);
    assert_eq!(sent[1].line(), "SCAN 0 COUNT 100");
}

#[test]
fn test_keys_uses_configured_page_size() {
    let config = ClientConfig::default().with_default_page_size(4);
    let ctx = TestContext::with_config(config, Delivery::Immediate);
    ctx.server.seed(0, &LETTERS);

    let keys = ctx
        .master_server()
        .keys(0, Some("?"), CommandFlags::NONE)
        .unwrap();
    assert_eq!(collect(keys), LETTERS);
    assert_eq!(ctx.server.sent_lines()[0], "SCAN 0 MATCH ? COUNT 4");
}

#[test]
fn test_falls_back_to_keys_without_scan_support() {
    let ctx = TestContext::admin(Delivery::Immediate);
    ctx.server.seed(0, &["user:1", "user:2", "order:1", "user:3"]);
    let server = ctx.master_server();

    let scanned = collect(
        server
            .keys_with(ScanOptions::new(0).with_pattern("user:*").with_page_size(1))
            .unwrap(),
    );

    ctx.master.reconnect(ServerVersion::new(2, 6, 0));
    ctx.server.clear_log();
    let keys = server
        .keys_with(ScanOptions::new(0).with_pattern("user:*").with_page_size(1))
        .unwrap();
    assert!(!keys.is_cursor());
    assert!(keys.position().is_none());
    assert_eq!(collect(keys), scanned);
    assert_eq!(ctx.server.sent_lines(), ["KEYS user:*"]);

    ctx.server.clear_log();
    let all = server.keys(0, None, CommandFlags::NONE).unwrap();
    assert_eq!(collect(all).len(), 4);
    assert_eq!(ctx.server.sent_lines(), ["KEYS *"]);
}

#[test]
fn test_disabled_scan_falls_back() {
    let config = ClientConfig::default()
        .with_allow_admin(true)
        .with_disabled_command(Command::Scan);
    let ctx = TestContext::with_config(config, Delivery::Immediate);
    ctx.server.seed(0, &LETTERS);

    let keys = ctx.master_server().keys_with(ScanOptions::new(0)).unwrap();
    assert!(!keys.is_cursor());
    assert_eq!(collect(keys), LETTERS);
    assert_eq!(ctx.server.sent_commands(), [Command::Keys]);
}

#[test]
fn test_resume_without_scan_support() {
    let ctx = TestContext::admin(Delivery::Immediate);
    ctx.master.reconnect(ServerVersion::new(2, 6, 0));
    let server = ctx.master_server();

    for options in [
        ScanOptions::new(0).with_cursor(7),
        ScanOptions::new(0).with_page_offset(1),
    ] {
        let err = server.keys_with(options).unwrap_err();
        assert!(matches!(
            err,
            Error::NoCursorSupport {
                command: Command::Scan
            }
        ));
    }
    assert!(ctx.server.sent().is_empty());
}

#[test]
fn test_zero_page_size() {
    let ctx = TestContext::new(Delivery::Immediate);
    let err = ctx
        .master_server()
        .keys_with(ScanOptions::new(0).with_page_size(0))
        .unwrap_err();
    assert!(matches!(err, Error::Usage(_)));
    assert!(ctx.server.sent().is_empty());
}

#[test]
fn test_page_failure_surfaces_lazily() {
    let ctx = TestContext::new(Delivery::Immediate);
    ctx.server.seed(0, &LETTERS);

    let mut keys = ctx
        .master_server()
        .keys_with(ScanOptions::new(0).with_page_size(2))
        .unwrap();
    assert_eq!(keys.next().unwrap().unwrap(), "a");

    ctx.server.script(
        Command::Scan,
        Response::Reply(RawReply::error("ERR invalid cursor")),
    );
    assert_eq!(keys.next().unwrap().unwrap(), "b");
    assert!(matches!(keys.next(), Some(Err(Error::Server(_)))));
    assert!(keys.next().is_none());
    assert!(keys.next().is_none());

    // The last good page is still a valid resume point.
    let position = keys.position().unwrap();
    assert_eq!((position.cursor, position.page_offset), (0, 2));
}

#[test]
fn test_malformed_page() {
    let ctx = TestContext::new(Delivery::Immediate);
    ctx.server.script(
        Command::Scan,
        Response::Reply(RawReply::array(vec![RawReply::bulk("0")])),
    );

    let mut keys = ctx.master_server().keys_with(ScanOptions::new(0)).unwrap();
    assert!(matches!(keys.next(), Some(Err(Error::Protocol(_)))));
    assert!(keys.next().is_none());
}

#[test]
fn test_scan_on_disconnected_endpoint() {
    let ctx = TestContext::new(Delivery::Immediate);
    ctx.master
        .set_status(redwire_client::ConnectionStatus::Disconnected);

    let mut keys = ctx.master_server().keys_with(ScanOptions::new(0)).unwrap();
    assert!(matches!(
        keys.next(),
        Some(Err(Error::NoConnectionAvailable { .. }))
    ));
}

#[tokio::test]
async fn test_async_enumeration() {
    let ctx = TestContext::new(Delivery::Immediate);
    ctx.server.seed(0, &LETTERS);
    let server = ctx.master_server();

    let mut keys = server
        .keys_with_async(ScanOptions::new(0).with_page_size(2))
        .await
        .unwrap();
    let mut seen = Vec::new();
    while let Some(key) = keys.next_async().await {
        seen.push(key.unwrap());
    }
    assert_eq!(keys_to_strings(&seen), LETTERS);

    let resumed = server
        .keys_with_async(ScanOptions::new(0).with_page_size(2).with_cursor(2))
        .await
        .unwrap();
    assert_eq!(
        keys_to_strings(&resumed.collect_async().await.unwrap()),
        ["c", "d", "e"]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_fallback() {
    let ctx = TestContext::admin(Delivery::Threaded);
    ctx.server.seed(0, &LETTERS);
    ctx.master.reconnect(ServerVersion::new(2, 4, 0));

    let keys = ctx
        .master_server()
        .keys_with_async(ScanOptions::new(0))
        .await
        .unwrap();
    assert!(!keys.is_cursor());
    assert_eq!(keys_to_strings(&keys.collect_async().await.unwrap()), LETTERS);
}
