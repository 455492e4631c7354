//! CurlTransfer against a local HTTP server.

mod common;

use std::sync::atomic::Ordering;

use batchget_core::transfer::{
    CancelReason, CurlTransfer, Transfer, TransferError, TransferOutcome, TransferRequest,
    TransferSignal,
};
use common::http_server;

fn body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn downloads_whole_file() {
    let data = body(64 * 1024);
    let server = http_server::start(&[("a.bin", data.clone())]);
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("a.bin");
    let url = server.url("a.bin");

    let mut last = None;
    let outcome = CurlTransfer::new()
        .download(
            &TransferRequest {
                url: &url,
                destination: &dest,
                known_size: None,
            },
            &TransferSignal::new(),
            &mut |p| last = Some(p),
        )
        .unwrap();

    assert_eq!(outcome, TransferOutcome::Completed);
    assert_eq!(std::fs::read(&dest).unwrap(), data);
    let last = last.unwrap();
    assert_eq!(last.downloaded, data.len() as u64);
    assert_eq!(last.total, Some(data.len() as u64));
    assert_eq!(*server.served.ranges.lock().unwrap(), vec![0]);
}

#[test]
fn resumes_partial_file_with_range() {
    let data = body(10_000);
    let server = http_server::start(&[("b.bin", data.clone())]);
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("b.bin");
    std::fs::write(&dest, &data[..4_000]).unwrap();
    let url = server.url("b.bin");

    let outcome = CurlTransfer::new()
        .download(
            &TransferRequest {
                url: &url,
                destination: &dest,
                known_size: Some(data.len() as u64),
            },
            &TransferSignal::new(),
            &mut |_| {},
        )
        .unwrap();

    assert_eq!(outcome, TransferOutcome::Completed);
    assert_eq!(std::fs::read(&dest).unwrap(), data);
    assert_eq!(*server.served.ranges.lock().unwrap(), vec![4_000]);
}

#[test]
fn restarts_from_zero_when_the_server_ignores_ranges() {
    let data = body(10_000);
    let server = http_server::start_ignoring_ranges(&[("r.bin", data.clone())]);
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("r.bin");
    std::fs::write(&dest, &data[..4_000]).unwrap();
    let url = server.url("r.bin");

    let mut last = None;
    let outcome = CurlTransfer::new()
        .download(
            &TransferRequest {
                url: &url,
                destination: &dest,
                known_size: Some(data.len() as u64),
            },
            &TransferSignal::new(),
            &mut |p| last = Some(p),
        )
        .unwrap();

    assert_eq!(outcome, TransferOutcome::Completed);
    assert_eq!(std::fs::read(&dest).unwrap(), data);
    assert_eq!(last.unwrap().downloaded, data.len() as u64);
    assert_eq!(*server.served.ranges.lock().unwrap(), vec![4_000, 0]);
}

#[test]
fn complete_file_is_not_fetched_again() {
    let data = body(2_048);
    let server = http_server::start(&[("c.bin", data.clone())]);
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("c.bin");
    std::fs::write(&dest, &data).unwrap();
    let url = server.url("c.bin");

    let outcome = CurlTransfer::new()
        .download(
            &TransferRequest {
                url: &url,
                destination: &dest,
                known_size: Some(data.len() as u64),
            },
            &TransferSignal::new(),
            &mut |_| {},
        )
        .unwrap();

    assert_eq!(outcome, TransferOutcome::Completed);
    assert!(server.served.ranges.lock().unwrap().is_empty());
}

#[test]
fn resolves_size_with_head() {
    let server = http_server::start(&[("d.bin", body(12_345))]);
    let size = CurlTransfer::new()
        .resolve_remote_size(&server.url("d.bin"))
        .unwrap();
    assert_eq!(size, 12_345);
    assert_eq!(server.served.heads.load(Ordering::SeqCst), 1);
}

#[test]
fn missing_file_is_http_404() {
    let server = http_server::start(&[]);
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("nope.bin");
    let url = server.url("nope.bin");

    let err = CurlTransfer::new()
        .download(
            &TransferRequest {
                url: &url,
                destination: &dest,
                known_size: None,
            },
            &TransferSignal::new(),
            &mut |_| {},
        )
        .unwrap_err();
    assert!(matches!(err, TransferError::Http(404)), "{err:?}");

    let err = CurlTransfer::new().resolve_remote_size(&url).unwrap_err();
    assert!(matches!(err, TransferError::Http(404)), "{err:?}");
}

#[test]
fn cancelled_signal_stops_transfer() {
    let server = http_server::start(&[("e.bin", body(256 * 1024))]);
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("e.bin");
    let url = server.url("e.bin");
    let signal = TransferSignal::new();
    signal.cancel(CancelReason::User);

    let outcome = CurlTransfer::new()
        .download(
            &TransferRequest {
                url: &url,
                destination: &dest,
                known_size: None,
            },
            &signal,
            &mut |_| {},
        )
        .unwrap();
    assert_eq!(outcome, TransferOutcome::Cancelled(CancelReason::User));
    assert!(std::fs::metadata(&dest).unwrap().len() < 256 * 1024);
}
