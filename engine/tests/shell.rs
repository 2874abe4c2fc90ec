//! # guestrs Remote Shell Integration Tests
//!
//! File: engine/tests/shell.rs
//!
//! Runs `RemoteShell` against the in-memory guest from `common` and checks
//! the redirection round trip, temp-file cleanup on success and failure,
//! no-output execution and the warm-up retry.
//!
mod common;

use common::{FakeGuest, FakeKiller, FakeQuery, GuestRun, MemoryTransfer};
use guestrs_engine::core::error::GuestError;
use guestrs_engine::core::retry::RetryPolicy;
use guestrs_engine::remote::{DiagnosticScrape, RemoteShell};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::Span;

const TIMEOUT: Duration = Duration::from_secs(30);

fn shell_with(transfer: Arc<MemoryTransfer>, guest: Arc<FakeGuest>) -> RemoteShell {
    let control = common::control(guest.clone(), FakeQuery::new("6.1.7601"), FakeKiller::new(vec![]));
    let correlator = Arc::new(DiagnosticScrape::new(guest.clone(), Duration::from_secs(2), Span::none()));
    RemoteShell::new(guest, transfer, correlator, control, r"C:\TMP1\", Span::none())
}

#[tokio::test]
async fn test_execute_returns_guest_output_and_cleans_up() {
    let transfer = MemoryTransfer::new();
    let guest = FakeGuest::new(transfer.clone(), |cmd| match cmd {
        "dir C:\\" => GuestRun {
            stdout: " Volume in drive C has no label.\r\n".to_string(),
            stderr: "warning: slow disk\r\n".to_string(),
            exit_code: Some(3),
        },
        other => panic!("unexpected command {other}"),
    });
    let shell = shell_with(transfer.clone(), guest.clone());

    let output = shell.execute("dir C:\\", TIMEOUT, Some(TIMEOUT)).await.unwrap();

    assert_eq!(output.stdout, " Volume in drive C has no label.\r\n");
    assert_eq!(output.stderr, "warning: slow disk\r\n");
    assert_eq!(output.exit_code, Some(3));
    assert_eq!(guest.commands(), vec!["dir C:\\".to_string()]);
    assert!(transfer.paths().is_empty(), "left behind: {:?}", transfer.paths());
}

#[tokio::test]
async fn test_execute_cleans_up_when_reading_back_fails() {
    let transfer = MemoryTransfer::new();
    let guest = FakeGuest::new(transfer.clone(), |_| GuestRun::ok("hello\r\n"));
    let shell = shell_with(transfer.clone(), guest);
    transfer.fail_copy_from();

    let err = shell.execute("echo hello", TIMEOUT, None).await.unwrap_err();

    assert!(matches!(err, GuestError::Transient { .. }));
    assert!(transfer.paths().is_empty(), "left behind: {:?}", transfer.paths());
}

#[tokio::test]
async fn test_execute_cleans_up_when_batch_copy_fails() {
    let transfer = MemoryTransfer::new();
    let guest = FakeGuest::new(transfer.clone(), |_| GuestRun::ok(""));
    let shell = shell_with(transfer.clone(), guest.clone());
    // The two output files are created, the batch copy fails.
    transfer.fail_copy_to_after(2);

    assert!(shell.execute("echo x", TIMEOUT, None).await.is_err());
    assert!(guest.commands().is_empty());
    assert!(transfer.paths().is_empty(), "left behind: {:?}", transfer.paths());
}

#[tokio::test]
async fn test_execute_reports_tool_timeout_as_missing_exit_code() {
    let transfer = MemoryTransfer::new();
    let guest = FakeGuest::new(transfer.clone(), |_| GuestRun::timed_out());
    let shell = shell_with(transfer.clone(), guest);

    let output = shell
        .execute("ping -n 100 127.0.0.1", TIMEOUT, Some(Duration::from_secs(1)))
        .await
        .unwrap();
    assert_eq!(output.exit_code, None);
    assert_eq!(output.stdout, "");
    assert!(transfer.paths().is_empty());
}

#[tokio::test]
async fn test_execute_no_output_uses_exit_code_only() {
    let transfer = MemoryTransfer::new();
    let guest = FakeGuest::new(transfer.clone(), |cmd| {
        if cmd.starts_with("del") {
            GuestRun::exit(2)
        } else {
            GuestRun::timed_out()
        }
    });
    let shell = shell_with(transfer.clone(), guest.clone());

    assert_eq!(
        shell.execute_no_output(r"del C:\missing.txt", TIMEOUT, None).await.unwrap(),
        2
    );
    // No temp files were involved at all.
    assert_eq!(guest.commands(), vec![r"del C:\missing.txt".to_string()]);
    assert!(transfer.paths().is_empty());

    let err = shell
        .execute_no_output("hang.exe", TIMEOUT, Some(Duration::from_secs(5)))
        .await
        .unwrap_err();
    assert!(matches!(err, GuestError::Timeout { timeout, .. } if timeout == Duration::from_secs(5)));
}

#[tokio::test]
async fn test_execute_with_args_quotes_program_path() {
    let transfer = MemoryTransfer::new();
    let guest = FakeGuest::new(transfer.clone(), |_| GuestRun::ok(""));
    let shell = shell_with(transfer, guest.clone());

    shell
        .execute_with_args(r"C:\Program Files\App\app.exe", &["/quiet", "/log x.txt"], TIMEOUT, None)
        .await
        .unwrap();
    assert_eq!(
        guest.commands(),
        vec![r#""C:\Program Files\App\app.exe" /quiet /log x.txt"#.to_string()]
    );
}

#[tokio::test]
async fn test_environment_and_file_reading() {
    let transfer = MemoryTransfer::new();
    let guest = FakeGuest::new(transfer.clone(), |cmd| match cmd {
        "set" => GuestRun::ok("APPDATA=C:\\Users\\u\\AppData\\Roaming\r\nOS=Windows_NT\r\n"),
        _ => GuestRun::exit(1),
    });
    let shell = shell_with(transfer.clone(), guest);

    let env = shell.get_environment_variables(TIMEOUT).await.unwrap();
    assert_eq!(env["OS"], "Windows_NT");
    assert_eq!(env["APPDATA"], r"C:\Users\u\AppData\Roaming");

    transfer.put(r"C:\logs\app.log", b"first\r\nsecond\r\n");
    assert_eq!(
        shell.read_file_lines(r"C:\logs\app.log").await.unwrap(),
        vec!["first".to_string(), "second".to_string()]
    );
    assert_eq!(shell.read_file_bytes(r"C:\logs\app.log").await.unwrap().len(), 15);
}

#[tokio::test]
async fn test_create_temp_file_in_guest() {
    let transfer = MemoryTransfer::new();
    let guest = FakeGuest::new(transfer.clone(), |_| GuestRun::ok(""));
    let shell = shell_with(transfer.clone(), guest);

    let first = shell.create_temp_file_in_guest().await.unwrap();
    let second = shell.create_temp_file_in_guest().await.unwrap();
    assert!(first.starts_with(r"C:\TMP1\"));
    assert_ne!(first, second);
    assert_eq!(transfer.get(&first), Some(Vec::new()));
}

#[tokio::test(start_paused = true)]
async fn test_warm_up_retries_until_the_guest_answers() {
    let transfer = MemoryTransfer::new();
    let attempts = Arc::new(AtomicU32::new(0));
    let seen = attempts.clone();
    let guest = FakeGuest::new(transfer.clone(), move |_| {
        if seen.fetch_add(1, Ordering::SeqCst) < 2 {
            GuestRun::timed_out()
        } else {
            GuestRun::ok("\"cmd was run ok.\"\r\n")
        }
    });
    let shell = shell_with(transfer.clone(), guest);

    shell
        .warm_up(Duration::from_secs(180), RetryPolicy::bounded(5, Duration::from_secs(2)))
        .await
        .unwrap();
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert!(transfer.paths().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_warm_up_exhaustion_is_startup_failure() {
    let transfer = MemoryTransfer::new();
    let guest = FakeGuest::new(transfer.clone(), |_| GuestRun::timed_out());
    let shell = shell_with(transfer, guest);

    let err = shell
        .warm_up(Duration::from_secs(180), RetryPolicy::bounded(3, Duration::from_secs(2)))
        .await
        .unwrap_err();
    assert!(matches!(err, GuestError::Startup { ref stage, attempts: 3, .. } if stage == "warm-up"));
}
