use std::time::{Duration, Instant};

use derivation::{
    cell_extremes, current_from_power, time_to_go, DerivationConfig, DerivationEngine,
    TIME_TO_GO_IDLE_SECS,
};
use payload_normalizer::{normalize, PayloadUpdate};
use property_table::schema::paths;
use property_table::PropertyTable;
use types::Scalar;

fn ingest(table: &mut PropertyTable, payload: &str) -> PayloadUpdate {
    let update = normalize(payload.as_bytes(), table)
        .expect("normalize")
        .expect("non-empty");
    update.apply(table).expect("apply");
    update
}

fn engine() -> DerivationEngine {
    DerivationEngine::new(DerivationConfig::default())
}

#[test]
fn current_derives_from_power_and_voltage() {
    let mut table = PropertyTable::battery().expect("table");
    let update = ingest(&mut table, r#"{"Dc":{"Power":321.6,"Voltage":52.7},"Soc":63}"#);
    let mut last = None;

    engine()
        .apply(&update, &mut table, &mut last, Instant::now())
        .expect("derive");

    let expected = (321.6f64 / 52.7 * 1000.0).round() / 1000.0;
    assert_eq!(table.number(paths::DC_CURRENT), Some(expected));
}

#[test]
fn current_is_zero_without_voltage() {
    assert_eq!(current_from_power(Some(100.0), None), 0.0);
    assert_eq!(current_from_power(Some(100.0), Some(0.0)), 0.0);
    assert_eq!(current_from_power(None, Some(50.0)), 0.0);
    assert_eq!(current_from_power(Some(-512.4), Some(52.31)), -9.795);
}

#[test]
fn supplied_current_is_kept() {
    let mut table = PropertyTable::battery().expect("table");
    let update = ingest(
        &mut table,
        r#"{"Dc":{"Power":100,"Voltage":50,"Current":1.5},"Soc":63}"#,
    );
    let mut last = None;
    engine()
        .apply(&update, &mut table, &mut last, Instant::now())
        .expect("derive");
    assert_eq!(table.number(paths::DC_CURRENT), Some(1.5));
}

#[test]
fn capacity_is_complement_of_consumed() {
    let mut table = PropertyTable::battery().expect("table");
    let update = ingest(
        &mut table,
        r#"{"Dc":{"Power":100,"Voltage":50},"Soc":63,"InstalledCapacity":280,"ConsumedAmphours":84.5}"#,
    );
    let mut last = None;
    engine()
        .apply(&update, &mut table, &mut last, Instant::now())
        .expect("derive");
    assert_eq!(table.number(paths::CAPACITY), Some(195.5));
}

#[test]
fn consumed_is_complement_of_capacity() {
    let mut table = PropertyTable::battery().expect("table");
    let update = ingest(
        &mut table,
        r#"{"Dc":{"Power":100,"Voltage":50},"Soc":63,"InstalledCapacity":100,"Capacity":62.25}"#,
    );
    let mut last = None;
    engine()
        .apply(&update, &mut table, &mut last, Instant::now())
        .expect("derive");
    assert_eq!(table.number(paths::CONSUMED_AMPHOURS), Some(37.75));
}

#[test]
fn installed_is_sum_of_capacity_and_consumed() {
    let mut table = PropertyTable::battery().expect("table");
    let update = ingest(
        &mut table,
        r#"{"Dc":{"Power":100,"Voltage":50},"Soc":63,"Capacity":150,"ConsumedAmphours":50}"#,
    );
    let mut last = None;
    engine()
        .apply(&update, &mut table, &mut last, Instant::now())
        .expect("derive");
    assert_eq!(table.number(paths::INSTALLED_CAPACITY), Some(200.0));
}

#[test]
fn capacities_follow_soc_when_neither_supplied() {
    let mut table = PropertyTable::battery().expect("table");
    let update = ingest(
        &mut table,
        r#"{"Dc":{"Power":100,"Voltage":50},"Soc":63,"InstalledCapacity":280}"#,
    );
    let mut last = None;
    engine()
        .apply(&update, &mut table, &mut last, Instant::now())
        .expect("derive");
    assert_eq!(table.number(paths::CAPACITY), Some(176.4));
    assert_eq!(table.number(paths::CONSUMED_AMPHOURS), Some(103.6));
}

#[test]
fn time_to_go_formulas() {
    // charging 10 A, 100 Ah missing
    assert_eq!(time_to_go(10.0, 280.0, 180.0, 10.0), 36_000);
    // discharging 20 A down to 10 % of 280 Ah = 28 Ah
    assert_eq!(time_to_go(-20.0, 280.0, 128.0, 10.0), 18_000);
    assert_eq!(time_to_go(0.0, 280.0, 128.0, 10.0), TIME_TO_GO_IDLE_SECS);
}

#[test]
fn time_to_go_respects_recalculation_interval() {
    let mut table = PropertyTable::battery().expect("table");
    let engine = engine();
    let start = Instant::now();
    let mut last = None;
    let payload = r#"{"Dc":{"Power":-1000,"Voltage":50},"Soc":50,"InstalledCapacity":280}"#;

    let update = ingest(&mut table, payload);
    let first = engine
        .apply(&update, &mut table, &mut last, start)
        .expect("derive");
    assert!(first.time_to_go_recalculated);
    assert_eq!(last, Some(start));
    let first_value = table.get(paths::TIME_TO_GO).cloned();
    assert!(matches!(first_value, Some(Scalar::Int(_))));

    let update = ingest(&mut table, payload);
    let second = engine
        .apply(&update, &mut table, &mut last, start + Duration::from_secs(59))
        .expect("derive");
    assert!(!second.time_to_go_recalculated);
    assert_eq!(last, Some(start));

    let update = ingest(&mut table, payload);
    let third = engine
        .apply(&update, &mut table, &mut last, start + Duration::from_secs(60))
        .expect("derive");
    assert!(third.time_to_go_recalculated);
    assert_eq!(last, Some(start + Duration::from_secs(60)));
}

#[test]
fn time_to_go_skipped_when_supplied_or_disabled() {
    let mut table = PropertyTable::battery().expect("table");
    let mut last = None;
    let update = ingest(
        &mut table,
        r#"{"Dc":{"Power":-1000,"Voltage":50},"Soc":50,"InstalledCapacity":280,"TimeToGo":1234}"#,
    );
    let out = engine()
        .apply(&update, &mut table, &mut last, Instant::now())
        .expect("derive");
    assert!(!out.time_to_go_recalculated);
    assert_eq!(table.get(paths::TIME_TO_GO), Some(&Scalar::Int(1234)));

    let disabled = DerivationEngine::new(DerivationConfig {
        time_to_go_enabled: false,
        ..DerivationConfig::default()
    });
    let mut table = PropertyTable::battery().expect("table");
    let update = ingest(
        &mut table,
        r#"{"Dc":{"Power":-1000,"Voltage":50},"Soc":50,"InstalledCapacity":280}"#,
    );
    let out = disabled
        .apply(&update, &mut table, &mut last, Instant::now())
        .expect("derive");
    assert!(!out.time_to_go_recalculated);
    assert_eq!(table.get(paths::TIME_TO_GO), None);
}

#[test]
fn cell_aggregates_use_first_occurrence_on_ties() {
    let stats = cell_extremes(&[(1, 3.271), (2, 3.268), (3, 3.274), (4, 3.268)]).expect("stats");
    assert_eq!(stats.min_index, 2);
    assert_eq!(stats.max_index, 3);
    assert!(cell_extremes(&[]).is_none());
}

#[test]
fn cell_aggregates_written_unless_supplied() {
    let mut table = PropertyTable::battery().expect("table");
    let update = ingest(
        &mut table,
        r#"{"Dc":{"Power":100,"Voltage":13.1},"Soc":63,
            "System":{"MaxCellVoltage":3.5,"MaxVoltageCellId":"C9"},
            "Voltages":{"Cell1":3.271,"Cell2":3.268,"Cell3":3.274,"Cell4":3.268}}"#,
    );
    let mut last = None;
    engine()
        .apply(&update, &mut table, &mut last, Instant::now())
        .expect("derive");

    assert_eq!(table.number(paths::MIN_CELL_VOLTAGE), Some(3.268));
    assert_eq!(table.get(paths::MIN_VOLTAGE_CELL_ID), Some(&Scalar::from("C2")));
    assert_eq!(table.number(paths::MAX_CELL_VOLTAGE), Some(3.5));
    assert_eq!(table.get(paths::MAX_VOLTAGE_CELL_ID), Some(&Scalar::from("C9")));
    assert_eq!(table.number(paths::VOLTAGES_SUM), Some(13.081));
    assert_eq!(table.number(paths::VOLTAGES_DIFF), Some(0.232));
}

#[test]
fn alarms_follow_thresholds() {
    let mut table = PropertyTable::battery().expect("table");
    let engine = engine();
    let mut last = None;

    let update = ingest(&mut table, r#"{"Dc":{"Power":100,"Voltage":45.0},"Soc":15}"#);
    engine
        .apply(&update, &mut table, &mut last, Instant::now())
        .expect("derive");
    assert_eq!(table.get(paths::ALARM_LOW_VOLTAGE), Some(&Scalar::Int(2)));
    assert_eq!(table.get(paths::ALARM_HIGH_VOLTAGE), Some(&Scalar::Int(0)));
    assert_eq!(table.get(paths::ALARM_LOW_SOC), Some(&Scalar::Int(1)));

    let update = ingest(&mut table, r#"{"Dc":{"Power":100,"Voltage":57.0},"Soc":5}"#);
    engine
        .apply(&update, &mut table, &mut last, Instant::now())
        .expect("derive");
    assert_eq!(table.get(paths::ALARM_LOW_VOLTAGE), Some(&Scalar::Int(0)));
    assert_eq!(table.get(paths::ALARM_HIGH_VOLTAGE), Some(&Scalar::Int(1)));
    assert_eq!(table.get(paths::ALARM_LOW_SOC), Some(&Scalar::Int(2)));

    // zero voltage and SoC read as "no data yet"
    let update = ingest(&mut table, r#"{"Dc":{"Power":100,"Voltage":0},"Soc":0}"#);
    engine
        .apply(&update, &mut table, &mut last, Instant::now())
        .expect("derive");
    assert_eq!(table.get(paths::ALARM_LOW_VOLTAGE), Some(&Scalar::Int(0)));
    assert_eq!(table.get(paths::ALARM_LOW_SOC), Some(&Scalar::Int(0)));
}
