// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! End-to-end tests: remote source pipes driven by the reference pipe driver.

mod common;

use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::*;
use novarocks_remote::exec::operators::{
    create_remote_source_pipe, create_remote_source_pipe_with_default_read_mode,
};
use novarocks_remote::exec::pipeline::driver::PipeDriver;
use novarocks_remote::exec::pipeline::pipe::PipeOutput;
use novarocks_remote::runtime::profile::RuntimeProfile;
use novarocks_remote::runtime::remote_executor::RemoteQueryExecutorRef;

fn executor_of(mock: &Arc<MockExecutor>) -> RemoteQueryExecutorRef {
    mock.clone()
}

#[test]
fn pipe_shares_one_executor_between_sources() {
    setup();
    let mock = MockExecutor::new(int_header(), vec![]).into_ref();
    let pipe = create_remote_source_pipe(executor_of(&mock), false, true, true, true, test_group_id());

    assert_eq!(pipe.num_processors(), 3);
    assert!(pipe.has_totals());
    assert!(pipe.has_extremes());
    assert!(pipe.output_header(PipeOutput::Totals).is_some());
    // The test handle plus one reference per source.
    assert_eq!(Arc::strong_count(&mock), 4);

    let bare = create_remote_source_pipe(executor_of(&mock), false, false, false, true, test_group_id());
    assert_eq!(bare.num_processors(), 1);
    assert!(!bare.has_totals());
    assert!(bare.output_header(PipeOutput::Extremes).is_none());
}

#[test]
fn sync_pipe_delivers_rows_totals_and_extremes() {
    setup();
    let mock = MockExecutor::new(
        int_header(),
        vec![Step::Data(int_block(10)), Step::Data(int_block(5)), Step::End],
    )
    .with_totals(int_block(1))
    .with_extremes(int_block(2))
    .into_ref();
    let pipe = create_remote_source_pipe(executor_of(&mock), false, true, true, false, test_group_id());

    let mut driver = PipeDriver::new();
    let sinks = assert_ok!(driver.attach_pipe(pipe, None));
    let stats = assert_ok!(driver.run());

    let main = driver.sink(sinks.main).expect("main sink");
    let main_rows: Vec<usize> = main.chunks().iter().map(|c| c.len()).collect();
    assert_eq!(main_rows, vec![10, 5]);
    let totals = driver.sink(sinks.totals.expect("totals")).expect("totals sink");
    assert_eq!(totals.chunks().len(), 1);
    assert_eq!(totals.rows(), 1);
    let extremes = driver.sink(sinks.extremes.expect("extremes")).expect("extremes sink");
    assert_eq!(extremes.chunks().len(), 1);
    assert_eq!(extremes.rows(), 2);

    assert_eq!(CallCounts::get(&mock.calls.send_query), 1);
    assert_eq!(CallCounts::get(&mock.calls.finish), 1);
    assert_eq!(CallCounts::get(&mock.calls.totals), 1);
    assert_eq!(CallCounts::get(&mock.calls.extremes), 1);
    assert!(!stats.canceled);
    assert_eq!(stats.async_waits, 0);
}

#[test]
fn async_pipe_waits_on_readable_descriptor() {
    setup();
    let (mut writer, reader) = UnixStream::pair().expect("socket pair");
    writer.write_all(b"ready").expect("write");
    let fd = reader.as_raw_fd();

    let mock = MockExecutor::new(
        int_header(),
        vec![
            Step::Fd(fd),
            Step::Data(int_block(4)),
            Step::Token,
            Step::Fd(fd),
            Step::Data(int_block(6)),
            Step::End,
        ],
    )
    .into_ref();
    let pipe = create_remote_source_pipe(executor_of(&mock), false, false, false, true, test_group_id());

    let profile = RuntimeProfile::new("remote pipe");
    let mut driver = PipeDriver::new().with_profile(profile.clone());
    let sinks = assert_ok!(driver.attach_pipe(pipe, None));
    let stats = run_with_timeout(Duration::from_secs(10), move || {
        let stats = driver.run();
        (stats, driver)
    });
    let (stats, driver) = stats;
    let stats = assert_ok!(stats);

    assert_eq!(stats.async_waits, 2);
    assert_eq!(driver.sink(sinks.main).expect("main sink").rows(), 10);
    assert_eq!(CallCounts::get(&mock.calls.read_async), 6);
    assert_eq!(CallCounts::get(&mock.calls.finish), 1);

    let source_profile = profile
        .get_child("RemoteSource (id=0)")
        .expect("source profile");
    let unique = source_profile
        .get_child("UniqueMetrics")
        .expect("unique metrics");
    assert_eq!(unique.counter_value("AsyncWaitCount"), Some(2));
    assert_eq!(unique.counter_value("RowsReceived"), Some(10));
    drop(writer);
}

#[test]
fn cancel_during_wait_finishes_pipe() {
    setup();
    // Nothing is ever written, so the descriptor never becomes readable.
    let (_writer, reader) = UnixStream::pair().expect("socket pair");
    let mock = MockExecutor::new(
        int_header(),
        vec![Step::Fd(reader.as_raw_fd()), Step::Data(int_block(1))],
    )
    .into_ref();
    let pipe = create_remote_source_pipe(executor_of(&mock), false, true, false, true, test_group_id());

    let mut driver = PipeDriver::new().with_wait_timeout(Duration::from_secs(30));
    let sinks = assert_ok!(driver.attach_pipe(pipe, None));
    let cancel = driver.cancel_flag();
    let canceler = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        cancel.store(true, Ordering::Release);
    });

    let (stats, driver) = run_with_timeout(Duration::from_secs(10), move || {
        let stats = driver.run();
        (stats, driver)
    });
    canceler.join().expect("canceler");
    let stats = assert_ok!(stats);

    assert!(stats.canceled);
    assert_eq!(driver.sink(sinks.main).expect("main sink").rows(), 0);
    assert_eq!(CallCounts::get(&mock.calls.read_async), 1);
    assert_eq!(CallCounts::get(&mock.calls.cancel), 1);
    assert_eq!(CallCounts::get(&mock.calls.finish), 0);
    drop(reader);
}

#[test]
fn wait_timeout_is_reported() {
    setup();
    let (_writer, reader) = UnixStream::pair().expect("socket pair");
    let mock = MockExecutor::new(int_header(), vec![Step::Fd(reader.as_raw_fd())]).into_ref();
    let pipe = create_remote_source_pipe(executor_of(&mock), false, false, false, true, test_group_id());

    let mut driver = PipeDriver::new().with_wait_timeout(Duration::from_millis(50));
    assert_ok!(driver.attach_pipe(pipe, None));
    let err = assert_err!(driver.run());
    assert!(err.contains("timed out"), "err={err}");
    drop(reader);
}

#[test]
fn downstream_limit_finishes_remote_query_early() {
    setup();
    let mock = MockExecutor::new(
        int_header(),
        vec![
            Step::Data(int_block(10)),
            Step::Data(int_block(10)),
            Step::Data(int_block(10)),
            Step::End,
        ],
    )
    .into_ref();
    let pipe = create_remote_source_pipe(executor_of(&mock), false, false, false, false, test_group_id());

    let mut driver = PipeDriver::new();
    let sinks = assert_ok!(driver.attach_pipe(pipe, Some(10)));
    assert_ok!(driver.run());

    assert_eq!(driver.sink(sinks.main).expect("main sink").rows(), 10);
    assert_eq!(CallCounts::get(&mock.calls.read_block), 1);
    assert_eq!(CallCounts::get(&mock.calls.finish), 1);
    assert_eq!(CallCounts::get(&mock.calls.cancel), 0);
}

#[test]
fn remote_error_aborts_driver() {
    setup();
    let mock = MockExecutor::new(
        int_header(),
        vec![
            Step::Data(int_block(3)),
            Step::Fail("Code: 210. Connection refused".to_string()),
        ],
    )
    .into_ref();
    let pipe = create_remote_source_pipe(executor_of(&mock), false, false, false, true, test_group_id());

    let mut driver = PipeDriver::new();
    assert_ok!(driver.attach_pipe(pipe, None));
    let err = assert_err!(driver.run());
    assert_eq!(err, "Code: 210. Connection refused");
}

#[test]
fn default_read_mode_comes_from_config() {
    let cfg = setup();
    let loaded = assert_ok!(cfg.load_config());
    assert!(loaded.remote.async_read);

    // A replica token is only legal on the non-blocking read path.
    let mock = MockExecutor::new(
        int_header(),
        vec![Step::Token, Step::Data(int_block(2)), Step::End],
    )
    .into_ref();
    let pipe = create_remote_source_pipe_with_default_read_mode(
        executor_of(&mock),
        false,
        false,
        false,
        test_group_id(),
    );
    let mut driver = PipeDriver::new();
    let sinks = assert_ok!(driver.attach_pipe(pipe, None));
    assert_ok!(driver.run());

    assert_eq!(driver.sink(sinks.main).expect("main sink").rows(), 2);
    assert_eq!(CallCounts::get(&mock.calls.read_block), 0);
}
