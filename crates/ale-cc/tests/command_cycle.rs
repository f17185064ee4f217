// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::unreadable_literal)] // Large test constants
#![allow(clippy::too_many_lines)] // Example/test code

//! Command cycle integration tests
//!
//! Drives whole cycles through the in-memory reader and checks both the
//! delivered reports and the resulting tag memory.

use ale_cc::iso::{bank_payload, CompactCodec, ItemCodec, ItemEntry};
use ale_cc::reader::{BANK_EPC, BANK_USER};
use ale_cc::report::envelope::{CommandReport, StatRecord};
use ale_cc::spec::FilterPatternSpec;
use ale_cc::{
    ChannelSubscriber, CommandCycle, Context, CycleReport, CycleSpec, DataSpec, DeliveryMode,
    EngineConfig, MemoryReader, OperationSpec, Population, ReportSpec, ResultState,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const LOT: &str = "@3.urn:oid:1.0.15961.9.1";
const WAIT: Duration = Duration::from_secs(10);

fn reader(population: &str) -> MemoryReader {
    let population = Population::from_toml(population).unwrap();
    MemoryReader::with_population("dock-1", &population).unwrap()
}

fn run_cycle(
    spec: CycleSpec,
    ctx: Context,
    reader: &mut MemoryReader,
    mode: DeliveryMode,
) -> (Vec<Arc<CycleReport>>, Arc<ChannelSubscriber>) {
    let mut cycle =
        CommandCycle::define(spec, &HashMap::new(), ctx, &EngineConfig::default()).unwrap();
    let subscriber = Arc::new(ChannelSubscriber::new("test", mode));
    cycle.subscribe(subscriber.clone());
    cycle.start();
    cycle.round(reader).unwrap();
    cycle.complete("REQUESTED", "COUNT").unwrap();
    let delivered = subscriber.drain(WAIT);
    cycle.dispose();
    (delivered, subscriber)
}

fn only_report(delivered: &[Arc<CycleReport>]) -> &CommandReport {
    assert_eq!(delivered.len(), 1);
    let reports = delivered[0].reports.as_ref().unwrap();
    assert_eq!(reports.len(), 1);
    &reports[0]
}

#[test]
fn test_commission_user_bank() {
    let mut reader = reader(
        r#"
        [[tags]]
        epc = "30083008"
        user_words = 32
        "#,
    );
    let spec = CycleSpec::new("commission").report(
        ReportSpec::new("lots")
            .operation(
                OperationSpec::new("INITIALIZE")
                    .name("init")
                    .field("userBank")
                    .data(DataSpec::literal("urn:epcglobal:ale:init:iso15962:x03")),
            )
            .operation(
                OperationSpec::new("WRITE")
                    .name("lot")
                    .field(LOT)
                    .data(DataSpec::literal("LOT-42")),
            )
            .operation(OperationSpec::new("READ").name("check-lot").field(LOT)),
    );

    let (delivered, _) = run_cycle(spec, Context::new(), &mut reader, DeliveryMode::Subscription);
    let report = only_report(&delivered);
    assert_eq!(report.tags.len(), 1);
    let operations = &report.tags[0].operations;
    assert_eq!(operations[0].status, ResultState::Success);
    assert_eq!(operations[1].status, ResultState::Success);
    assert_eq!(operations[2].data.as_deref(), Some("LOT-42"));

    let user = reader.tags()[0].bank(BANK_USER).unwrap();
    let item = CompactCodec
        .decode(BANK_USER, bank_payload(BANK_USER, user).unwrap())
        .unwrap();
    assert_eq!(item.dsfid, 0x03);
    assert_eq!(item.entries, vec![ItemEntry::new("1.0.15961.9.1", "LOT-42")]);
}

#[test]
fn test_write_then_read_in_one_batch() {
    let mut reader = reader(
        r#"
        [[tags]]
        epc = "3008"
        "#,
    );
    let spec = CycleSpec::new("afi").report(
        ReportSpec::new("afi")
            .operation(
                OperationSpec::new("WRITE")
                    .name("set")
                    .field("afi")
                    .data(DataSpec::literal("x42")),
            )
            .operation(OperationSpec::new("READ").name("get").field("afi")),
    );

    let (delivered, _) = run_cycle(spec, Context::new(), &mut reader, DeliveryMode::Subscription);
    let operations = &only_report(&delivered).tags[0].operations;
    assert_eq!(operations[0].status, ResultState::Success);
    assert_eq!(operations[1].data.as_deref(), Some("x42"));
    assert_eq!(reader.tags()[0].bank(BANK_EPC).map(|b| b[3]), Some(0x42));
}

#[test]
fn test_empty_report_withheld_but_settled() {
    let mut reader = reader(
        r#"
        [[tags]]
        epc = "3008"

        [[tags]]
        epc = "3009"
        "#,
    );
    let spec = CycleSpec::new("tid-only").report(
        ReportSpec::new("e2")
            .filter(FilterPatternSpec::include("E2*"))
            .operation(OperationSpec::new("READ").name("epc").field("epc"))
            .report_if_empty(false),
    );

    let (delivered, subscriber) =
        run_cycle(spec, Context::new(), &mut reader, DeliveryMode::Subscription);
    assert!(delivered.is_empty());
    assert_eq!(subscriber.pending(), 0);
}

#[test]
fn test_poll_gets_empty_report_set() {
    let mut reader = reader("tags = []");
    let spec = CycleSpec::new("nothing").report(
        ReportSpec::new("epcs").operation(OperationSpec::new("READ").name("epc").field("epc")),
    );
    let (delivered, _) = run_cycle(spec, Context::new(), &mut reader, DeliveryMode::Poll);
    assert_eq!(delivered.len(), 1);
    assert!(delivered[0].is_empty());
    assert_eq!(delivered[0].spec_name, "nothing");
}

#[test]
fn test_epc_cache_assignment() {
    let mut reader = reader(
        r#"
        [[tags]]
        epc = "3008"
        epc_spare_words = 2

        [[tags]]
        epc = "3009"
        epc_spare_words = 2
        "#,
    );
    let ctx = Context::new();
    ctx.sources.define_cache("serials", ["3000AAAA"]);
    let spec = CycleSpec::new("encode").report(
        ReportSpec::new("encode").operation(
            OperationSpec::new("WRITE")
                .name("epc")
                .field("epc")
                .data(DataSpec::Cache("serials".into())),
        ),
    );

    let (delivered, _) = run_cycle(spec, ctx.clone(), &mut reader, DeliveryMode::Subscription);
    let report = only_report(&delivered);
    let statuses: Vec<_> = report.tags.iter().map(|t| t.operations[0].status).collect();
    assert_eq!(
        statuses,
        vec![ResultState::Success, ResultState::EpcCacheDepletedError]
    );
    assert_eq!(reader.tags()[0].key().epc, vec![0x30, 0x00, 0xAA, 0xAA]);
    assert_eq!(reader.tags()[1].key().epc, vec![0x30, 0x09]);
    assert_eq!(ctx.sources.cache_len("serials"), Some(0));
    assert_eq!(ctx.sources.cache_uses("serials"), Some(0));
}

#[test]
fn test_statistics_attached() {
    let mut reader = reader(
        r#"
        [[tags]]
        epc = "3008"
        antenna = 2
        rssi = -61
        "#,
    );
    let spec = CycleSpec::new("stats").report(
        ReportSpec::new("seen")
            .stat("TagCount")
            .stat("ReaderSightingSignals"),
    );
    let (delivered, _) = run_cycle(spec, Context::new(), &mut reader, DeliveryMode::Subscription);
    let tag = &only_report(&delivered).tags[0];
    assert_eq!(tag.id, "3008");
    assert!(tag.operations.is_empty());
    assert_eq!(tag.stats[0], StatRecord::TagCount { count: 1 });
    let StatRecord::ReaderSightingSignals { sightings } = &tag.stats[1] else {
        panic!("unexpected record {:?}", tag.stats[1]);
    };
    assert_eq!(sightings[0].reader, "dock-1");
    assert_eq!(sightings[0].antenna, 2);
    assert_eq!(sightings[0].rssi, Some(-61));
}

#[test]
fn test_report_serializes_to_json() {
    let mut reader = reader(
        r#"
        [[tags]]
        epc = "3008"
        "#,
    );
    let spec = CycleSpec::new("json").report(
        ReportSpec::new("epcs").operation(OperationSpec::new("READ").name("epc").field("epc")),
    );
    let (delivered, _) = run_cycle(spec, Context::new(), &mut reader, DeliveryMode::Subscription);
    let json = serde_json::to_value(delivered[0].as_ref()).unwrap();
    assert_eq!(json["specName"], "json");
    assert_eq!(json["aleId"], "ale-cc");
    assert_eq!(json["reports"][0]["tags"][0]["operations"][0]["status"], "SUCCESS");
    assert_eq!(json["reports"][0]["tags"][0]["operations"][0]["data"], "3008");
}
