// SPDX-License-Identifier: MIT
// Copyright(c) 2024 Darek Stojaczyk

pub mod channel;
pub mod field_boss;
pub mod global_portal;
pub mod listener;
pub mod locked_vec;
pub mod packet_stream;
pub mod scheduler;
pub mod service;

use log::LevelFilter;

pub fn setup_log(is_test: bool) {
    let timestamp_fmt = match is_test {
        false => Some(env_logger::fmt::TimestampPrecision::Millis),
        true => None,
    };

    env_logger::Builder::new()
        .filter_module("polling", LevelFilter::Info)
        .filter_module("async_io", LevelFilter::Info)
        .parse_default_env()
        .format_timestamp(timestamp_fmt)
        .is_test(is_test)
        .init();
}

/// Seconds since the unix epoch.
pub fn now_secs() -> i64 {
    std::time::UNIX_EPOCH.elapsed().unwrap().as_secs() as i64
}
