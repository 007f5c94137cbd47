//! Chunk transfer engine against a local range server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::range_server::{self, RangeServerOptions};
use common::{body, fast_policy, RecordingSleeper};
use mdm_core::control::AbortToken;
use mdm_core::error::EngineError;
use mdm_core::manifest::Manifest;
use mdm_core::planner::MIB;
use mdm_core::transfer::{transfer_stream, TransferOptions};

fn opts(chunk_size: u64, concurrency: usize) -> TransferOptions {
    TransferOptions {
        chunk_size,
        concurrency,
        policy: fast_policy(5),
        sleeper: Arc::new(RecordingSleeper::default()),
        ..TransferOptions::default()
    }
}

#[test]
fn small_file_single_part() {
    let data = body(10 * MIB as usize);
    let server = range_server::start(data.clone());
    let dir = tempfile::tempdir().unwrap();
    let stream_dir = dir.path().join("video");

    let out = transfer_stream(
        &server.url,
        &stream_dir,
        &opts(64 * MIB, 4),
        &AbortToken::new(),
        &mut |_, _| {},
    )
    .unwrap();

    assert_eq!(out.length, 10 * MIB);
    assert_eq!(std::fs::read(&out.path).unwrap(), data);
    let gets = server.get_requests();
    assert_eq!(gets.len(), 1, "one part, one GET: {:?}", gets);
    assert_eq!(gets[0].range, Some((0, 10 * MIB - 1)));
    let manifest = Manifest::load(&stream_dir).unwrap().unwrap();
    assert_eq!(manifest.parts.len(), 1);
    assert!(manifest.is_complete());
}

#[test]
fn many_parts_respect_concurrency_cap() {
    let data = body(1024 * 1024);
    let server = range_server::start_with_options(
        data.clone(),
        RangeServerOptions {
            write_delay: Some(Duration::from_millis(2)),
            ..RangeServerOptions::default()
        },
    );
    let dir = tempfile::tempdir().unwrap();

    let out = transfer_stream(
        &server.url,
        dir.path(),
        &opts(64 * 1024, 3),
        &AbortToken::new(),
        &mut |_, _| {},
    )
    .unwrap();

    assert_eq!(std::fs::read(&out.path).unwrap(), data);
    assert_eq!(server.get_requests().len(), 16);
    assert!(server.max_in_flight() <= 3, "max in flight {}", server.max_in_flight());
    assert!(server.max_in_flight() >= 2, "fetchers should overlap");
}

#[test]
fn pool_never_exceeds_part_count() {
    let data = body(200 * 1024);
    let server = range_server::start(data.clone());
    let dir = tempfile::tempdir().unwrap();
    transfer_stream(&server.url, dir.path(), &opts(128 * 1024, 16), &AbortToken::new(), &mut |_, _| {})
        .unwrap();
    assert_eq!(server.get_requests().len(), 2);
    assert!(server.max_in_flight() <= 2);
}

#[test]
fn head_refused_falls_back_to_range_probe() {
    let data = body(300 * 1024);
    let server = range_server::start_with_options(
        data.clone(),
        RangeServerOptions {
            head_allowed: false,
            ..RangeServerOptions::default()
        },
    );
    let dir = tempfile::tempdir().unwrap();
    let out = transfer_stream(&server.url, dir.path(), &opts(100 * 1024, 2), &AbortToken::new(), &mut |_, _| {})
        .unwrap();
    assert_eq!(std::fs::read(&out.path).unwrap(), data);
    let reqs = server.requests();
    assert_eq!(reqs[0].method, "HEAD");
    assert_eq!(reqs[1].range, Some((0, 0)), "one-byte range probe");
}

#[test]
fn no_range_support_restarts_from_zero_after_disconnect() {
    let data = body(512 * 1024);
    let server = range_server::start_with_options(
        data.clone(),
        RangeServerOptions {
            support_ranges: false,
            truncate_first_full_get: true,
            ..RangeServerOptions::default()
        },
    );
    let dir = tempfile::tempdir().unwrap();
    let sleeper = Arc::new(RecordingSleeper::default());
    let mut o = opts(64 * 1024, 4);
    o.sleeper = sleeper.clone();

    let out = transfer_stream(&server.url, dir.path(), &o, &AbortToken::new(), &mut |_, _| {}).unwrap();

    assert_eq!(std::fs::read(&out.path).unwrap(), data);
    let gets = server.get_requests();
    assert_eq!(gets.len(), 2, "{:?}", gets);
    assert!(gets.iter().all(|r| r.range.is_none()), "whole-body GETs only");
    assert_eq!(*sleeper.slept.lock().unwrap(), vec![Duration::from_millis(800)]);
}

#[test]
fn retry_resumes_from_bytes_on_disk() {
    let data = body(400 * 1024);
    let fail_at = 150 * 1024;
    let server = range_server::start_with_options(
        data.clone(),
        RangeServerOptions {
            fail_at: Some(fail_at),
            fail_times: 1,
            ..RangeServerOptions::default()
        },
    );
    let dir = tempfile::tempdir().unwrap();
    let sleeper = Arc::new(RecordingSleeper::default());
    let mut o = opts(100 * 1024, 1);
    o.sleeper = sleeper.clone();

    let out = transfer_stream(&server.url, dir.path(), &o, &AbortToken::new(), &mut |_, _| {}).unwrap();

    assert_eq!(std::fs::read(&out.path).unwrap(), data);
    let ranges: Vec<(u64, u64)> = server.get_requests().iter().filter_map(|r| r.range).collect();
    assert!(
        ranges.contains(&(fail_at, 200 * 1024 - 1)),
        "retry continues at the cut offset: {:?}",
        ranges
    );
    assert_eq!(sleeper.slept.lock().unwrap().len(), 1);
}

#[test]
fn exhausted_retries_fail_the_stream() {
    let data = body(200 * 1024);
    let server = range_server::start_with_options(
        data,
        RangeServerOptions {
            fail_at: Some(50 * 1024),
            fail_times: usize::MAX,
            ..RangeServerOptions::default()
        },
    );
    let dir = tempfile::tempdir().unwrap();
    let sleeper = Arc::new(RecordingSleeper::default());
    let mut o = opts(100 * 1024, 2);
    o.policy = fast_policy(3);
    o.sleeper = sleeper.clone();

    let err = transfer_stream(&server.url, dir.path(), &o, &AbortToken::new(), &mut |_, _| {}).unwrap_err();
    match err.downcast_ref::<EngineError>() {
        Some(EngineError::TransferFailed { part, .. }) => assert_eq!(*part, 0),
        other => panic!("expected TransferFailed, got {:?}", other),
    }
    assert_eq!(
        *sleeper.slept.lock().unwrap(),
        vec![Duration::from_millis(800), Duration::from_millis(1600)]
    );
    assert!(!dir.path().join("stream.bin").exists());
}

#[test]
fn version_change_discards_prior_progress() {
    let old = body(300 * 1024);
    let server = range_server::start_with_options(
        old,
        RangeServerOptions {
            etag: Some("v1".into()),
            fail_at: Some(250 * 1024),
            fail_times: usize::MAX,
            ..RangeServerOptions::default()
        },
    );
    let dir = tempfile::tempdir().unwrap();
    let mut o = opts(100 * 1024, 1);
    o.policy = fast_policy(1);

    // First run: parts 0 and 1 complete, part 2 fails for good.
    assert!(transfer_stream(&server.url, dir.path(), &o, &AbortToken::new(), &mut |_, _| {}).is_err());
    let stale = Manifest::load(dir.path()).unwrap().unwrap();
    assert!(stale.parts[0].is_complete());
    assert_eq!(stale.version_token.as_deref(), Some("v1"));

    let new: Vec<u8> = body(300 * 1024).into_iter().map(|b| b.wrapping_add(1)).collect();
    server.replace_body(new.clone(), Some("v2"));
    server.clear_requests();

    // Part 2 is still being cut, so this run fails too, but none of the old bytes survive.
    assert!(transfer_stream(&server.url, dir.path(), &o, &AbortToken::new(), &mut |_, _| {}).is_err());
    let ranges: Vec<(u64, u64)> = server.get_requests().iter().filter_map(|r| r.range).collect();
    assert!(ranges.contains(&(0, 100 * 1024 - 1)), "part 0 fetched again: {:?}", ranges);
    assert!(ranges.contains(&(100 * 1024, 200 * 1024 - 1)));
    let m = Manifest::load(dir.path()).unwrap().unwrap();
    assert_eq!(m.version_token.as_deref(), Some("v2"));
    assert_eq!(std::fs::read(&m.parts[0].path).unwrap(), new[..100 * 1024].to_vec());
}

#[test]
fn abort_then_resume_fetches_only_missing_bytes() {
    let data = body(1024 * 1024);
    let server = range_server::start_with_options(
        data.clone(),
        RangeServerOptions {
            write_delay: Some(Duration::from_millis(20)),
            ..RangeServerOptions::default()
        },
    );
    let dir = tempfile::tempdir().unwrap();
    let mut o = opts(128 * 1024, 2);
    o.progress_interval = Duration::from_millis(50);

    let abort = AbortToken::new();
    let trigger = abort.clone();
    let err = transfer_stream(&server.url, dir.path(), &o, &abort, &mut |done, _| {
        if done >= 300 * 1024 {
            trigger.abort();
        }
    })
    .unwrap_err();
    assert!(EngineError::is_aborted(&err));
    assert!(!dir.path().join("stream.bin").exists());

    let first = Manifest::load(dir.path()).unwrap().unwrap();
    let done_before = first.written_total();
    assert!(done_before > 0 && !first.is_complete());
    let complete_starts: Vec<u64> = first.parts.iter().filter(|p| p.is_complete()).map(|p| p.start).collect();

    server.clear_requests();
    let out = transfer_stream(&server.url, dir.path(), &o, &AbortToken::new(), &mut |_, _| {}).unwrap();
    assert!(out.resumed);
    assert_eq!(std::fs::read(&out.path).unwrap(), data, "byte-identical after resume");

    let ranges: Vec<(u64, u64)> = server.get_requests().iter().filter_map(|r| r.range).collect();
    for start in complete_starts {
        assert!(ranges.iter().all(|r| r.0 != start), "completed part at {} refetched", start);
    }
    let refetched: u64 = ranges.iter().map(|(s, e)| e + 1 - s).sum();
    assert!(refetched <= data.len() as u64 - done_before);
}

#[test]
fn progress_reports_are_coalesced() {
    let data = body(1024 * 1024);
    let server = range_server::start_with_options(
        data,
        RangeServerOptions {
            write_delay: Some(Duration::from_millis(10)),
            ..RangeServerOptions::default()
        },
    );
    let dir = tempfile::tempdir().unwrap();
    let started = std::time::Instant::now();
    let mut reports = Vec::new();
    transfer_stream(&server.url, dir.path(), &opts(256 * 1024, 4), &AbortToken::new(), &mut |d, t| {
        reports.push((d, t))
    })
    .unwrap();
    let elapsed = started.elapsed();

    let max_expected = (elapsed.as_millis() / 250) as usize + 3;
    assert!(reports.len() <= max_expected, "{} reports in {:?}", reports.len(), elapsed);
    assert_eq!(reports.first().copied(), Some((0, 1024 * 1024)));
    assert_eq!(reports.last().copied(), Some((1024 * 1024, 1024 * 1024)));
    assert!(reports.windows(2).all(|w| w[0].0 <= w[1].0), "monotonic");
}

#[test]
fn repeated_manifest_rewrite_failures_fail_the_stream() {
    let data = body(400 * 1024);
    let server = range_server::start(data);
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("manifest.json.tmp");

    // The first report comes right after reconciliation; from then on every
    // atomic rewrite hits a directory where its temp file should go.
    let mut blocked = false;
    let err = transfer_stream(&server.url, dir.path(), &opts(100 * 1024, 1), &AbortToken::new(), &mut |_, _| {
        if !blocked {
            std::fs::create_dir(&blocker).unwrap();
            blocked = true;
        }
    })
    .unwrap_err();

    assert!(!EngineError::is_aborted(&err));
    assert!(format!("{:#}", err).contains("manifest rewrite failed 2 times"), "{:#}", err);
    assert!(server.get_requests().len() < 4, "queue stops after the second failure");
    assert!(!dir.path().join("stream.bin").exists());
}
