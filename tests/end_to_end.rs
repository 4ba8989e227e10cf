//! Whole-run tests driving the serializer with in-memory containers.

use daq_nexus::container::memory::{MemoryContainer, MemoryOpener};
use daq_nexus::document::Document;
use daq_nexus::error::ExportError;
use daq_nexus::export::{export, ExportOptions, OutputLocation};
use daq_nexus::manager::{sanitize_label, MemoryManager};
use daq_nexus::plot::{Fit, FitIteration, PlotBinding};
use daq_nexus::serializer::{Serializer, SerializerOptions};
use daq_nexus::time::iso8601;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

const FILE: &str = "/out/abc-.nxs";

fn doc(kind: &str, payload: Value) -> Document {
    Document::from_pair(kind, payload).unwrap()
}

fn serializer(options: SerializerOptions) -> (Serializer<MemoryManager>, MemoryOpener) {
    let manager = MemoryManager::in_memory("/out");
    let opener = manager.opener().clone();
    (Serializer::new(manager, options), opener)
}

fn buffer(opener: &MemoryOpener) -> MemoryContainer {
    opener.get(Path::new(FILE)).unwrap()
}

fn scenario() -> Vec<Document> {
    vec![
        doc("start", json!({"uid": "abc", "time": 1000.0, "session_name": "s1"})),
        doc(
            "descriptor",
            json!({"uid": "d1", "name": "primary", "data_keys": {"x": {"dtype": "number", "units": "V"}}}),
        ),
        doc("event_page", json!({"descriptor": "d1", "time": [1000.5], "data": {"x": [3.3]}})),
        doc("event_page", json!({"descriptor": "d1", "time": [1001.5], "data": {"x": [4.4]}})),
        doc("stop", json!({"time": 1002.0, "exit_status": "success"})),
    ]
}

#[test]
fn test_reference_scenario() {
    let (mut s, opener) = serializer(SerializerOptions::default());
    for document in scenario() {
        s.handle(document).unwrap();
    }

    let c = buffer(&opener);
    let entry = format!("/s1_{}", iso8601(1000.0));
    assert_eq!(c.children("/"), vec![entry[1..].to_string()]);

    let data = format!("{entry}/data");
    let time = c.dataset(&format!("{data}/time")).unwrap();
    assert_eq!(
        time.as_texts().unwrap(),
        &[iso8601(1000.5), iso8601(1001.5)]
    );
    assert_eq!(
        c.dataset(&format!("{data}/time_since_start")).unwrap().as_floats().unwrap(),
        &[0.5, 1.5]
    );
    assert_eq!(c.dataset(&format!("{data}/x")).unwrap().as_floats().unwrap(), &[3.3, 4.4]);
    assert_eq!(c.attr(&format!("{data}/x"), "units").unwrap().as_text(), Some("V"));
    assert_eq!(
        c.dataset(&format!("{entry}/end_time")).unwrap().as_text(),
        Some(iso8601(1002.0).as_str())
    );
    assert!(c.is_closed());
    assert_eq!(
        s.artifacts()[&format!("s1_{}", iso8601(1000.0))],
        vec![PathBuf::from(FILE)]
    );
}

#[test]
fn test_end_time_only_after_stop() {
    let (mut s, opener) = serializer(SerializerOptions::default());
    let mut documents = scenario();
    let stop = documents.pop().unwrap();
    for document in documents {
        s.handle(document).unwrap();
    }
    let entry = s.entry().unwrap().to_string();
    assert!(buffer(&opener).node(&format!("{entry}/end_time")).is_none());
    assert!(!buffer(&opener).is_closed());

    s.handle(stop).unwrap();
    assert!(buffer(&opener).node(&format!("{entry}/end_time")).is_some());
}

#[test]
fn test_column_length_is_sum_of_batch_records() {
    let (mut s, opener) = serializer(SerializerOptions::default());
    s.handle(doc("start", json!({"uid": "abc", "time": 10.0}))).unwrap();
    s.handle(doc("descriptor", json!({"uid": "d1", "name": "primary"}))).unwrap();
    s.handle(doc(
        "event_page",
        json!({"descriptor": "d1", "time": [11.0, 11.1], "data": {"n": [1, 2]}}),
    ))
    .unwrap();
    s.handle(doc(
        "event_page",
        json!({"descriptor": "d1", "time": [12.0, 12.1, 12.2], "data": {"n": [3, 4, 5]}}),
    ))
    .unwrap();

    let c = buffer(&opener);
    let data = format!("{}/data", s.entry().unwrap());
    assert_eq!(c.dataset(&format!("{data}/n")).unwrap().as_ints().unwrap(), &[1, 2, 3, 4, 5]);
    // One time sample per batch, not per record.
    assert_eq!(c.dataset(&format!("{data}/time")).unwrap().shape(), &[2]);
    assert_eq!(
        c.dataset(&format!("{data}/time_since_start")).unwrap().as_floats().unwrap(),
        &[1.0, 2.0]
    );
}

#[test]
fn test_secondary_streams_live_under_data() {
    let (mut s, opener) = serializer(SerializerOptions::default());
    s.handle(doc("start", json!({"uid": "abc", "time": 10.0}))).unwrap();
    s.handle(doc("descriptor", json!({"uid": "d1", "name": "primary"}))).unwrap();
    s.handle(doc(
        "descriptor",
        json!({"uid": "d2", "name": "baseline", "data_keys": {"temp": {"units": "K"}}}),
    ))
    .unwrap();
    s.handle(doc("event_page", json!({"descriptor": "d2", "time": [10.5], "data": {"temp": [293.1]}})))
        .unwrap();

    let c = buffer(&opener);
    let baseline = format!("{}/data/baseline", s.entry().unwrap());
    assert_eq!(c.dataset(&format!("{baseline}/temp")).unwrap().as_floats().unwrap(), &[293.1]);
    assert_eq!(c.attr(&format!("{baseline}/temp"), "units").unwrap().as_text(), Some("K"));
    assert!(c.node(&format!("{}/data/temp", s.entry().unwrap())).is_none());
}

#[test]
fn test_duplicate_stream_name_aborts() {
    let (mut s, _) = serializer(SerializerOptions::default());
    s.handle(doc("start", json!({"uid": "abc", "time": 10.0}))).unwrap();
    s.handle(doc("descriptor", json!({"uid": "d1", "name": "primary"}))).unwrap();
    let err = s
        .handle(doc("descriptor", json!({"uid": "d9", "name": "primary"})))
        .unwrap_err();
    assert!(matches!(err, ExportError::DuplicateStream { .. }), "{err}");
}

#[test]
fn test_unknown_stream_batch_is_ignored() {
    let (mut s, opener) = serializer(SerializerOptions::default());
    s.handle(doc("start", json!({"uid": "abc", "time": 10.0}))).unwrap();
    s.handle(doc("event_page", json!({"descriptor": "ghost", "time": [11.0], "data": {"x": [1.0]}})))
        .unwrap();
    s.handle(doc("stop", json!({"time": 12.0}))).unwrap();
    let c = buffer(&opener);
    assert!(c.children(&format!("{}/data", s.entry().unwrap())).is_empty());
}

#[test]
fn test_record_shape_change_is_fatal() {
    let (mut s, opener) = serializer(SerializerOptions::default());
    s.handle(doc("start", json!({"uid": "abc", "time": 10.0}))).unwrap();
    s.handle(doc("descriptor", json!({"uid": "d1", "name": "primary"}))).unwrap();
    s.handle(doc("event_page", json!({"descriptor": "d1", "time": [11.0], "data": {"img": [[1, 2]]}})))
        .unwrap();
    let err = s
        .handle(doc("event_page", json!({"descriptor": "d1", "time": [12.0], "data": {"img": [[1, 2, 3]]}})))
        .unwrap_err();
    assert!(matches!(err, ExportError::ShapeMismatch { .. }), "{err}");

    let c = buffer(&opener);
    let data = format!("{}/data", s.entry().unwrap());
    assert_eq!(c.dataset(&format!("{data}/img")).unwrap().shape(), &[1, 2]);
    assert_eq!(c.dataset(&format!("{data}/time")).unwrap().shape(), &[1]);
    assert_eq!(c.dataset(&format!("{data}/time_since_start")).unwrap().shape(), &[1]);

    // A valid page afterwards keeps the time axis in step with the columns.
    s.handle(doc("event_page", json!({"descriptor": "d1", "time": [13.0], "data": {"img": [[5, 6]]}})))
        .unwrap();
    let c = buffer(&opener);
    assert_eq!(c.dataset(&format!("{data}/img")).unwrap().shape(), &[2, 2]);
    assert_eq!(c.dataset(&format!("{data}/time")).unwrap().shape(), &[2]);
}

#[test]
fn test_text_columns_use_fixed_width() {
    let (mut s, opener) = serializer(SerializerOptions::default());
    s.handle(doc("start", json!({"uid": "abc", "time": 10.0}))).unwrap();
    s.handle(doc("descriptor", json!({"uid": "d1", "name": "primary"}))).unwrap();
    s.handle(doc(
        "event_page",
        json!({"descriptor": "d1", "time": [11.0], "data": {"state": ["idle", "busy"]}}),
    ))
    .unwrap();
    s.handle(doc(
        "event_page",
        json!({"descriptor": "d1", "time": [12.0], "data": {"state": ["running"]}}),
    ))
    .unwrap();

    let c = buffer(&opener);
    let state = c.dataset(&format!("{}/data/state", s.entry().unwrap())).unwrap();
    assert_eq!(state.text_width(), Some(4));
    assert_eq!(state.as_texts().unwrap(), &["idle", "busy", "runn"]);
}

#[test]
fn test_fits_and_hints_are_written_at_stop() {
    let fit = Fit::new("gauss")
        .with_iteration(FitIteration {
            timestamp: 1001.8,
            param_names: vec!["amp".into(), "center".into(), "sigma".into()],
            values: vec![("amp".into(), 2.0), ("center".into(), 0.2)],
            covariance: None,
        })
        .with_iteration(FitIteration {
            timestamp: 1001.2,
            param_names: vec!["amp".into(), "center".into(), "sigma".into()],
            values: vec![("amp".into(), 1.0), ("center".into(), 0.1)],
            covariance: Some(vec![vec![0.1, 0.0], vec![0.0, 0.2]]),
        });
    let plots = vec![
        PlotBinding::line("primary", "x", ["y1", "y2"]).with_fit(fit),
        PlotBinding::line("missing", "x", ["y1"]),
    ];
    let (mut s, opener) = serializer(SerializerOptions::default().with_plots(plots));
    for document in scenario() {
        s.handle(document).unwrap();
    }

    let c = buffer(&opener);
    let data = format!("/s1_{}/data", iso8601(1000.0));
    let fit = format!("{data}/fits/gauss");
    assert_eq!(
        c.dataset(&format!("{fit}/time")).unwrap().as_texts().unwrap(),
        &[iso8601(1001.2), iso8601(1001.8)]
    );
    assert_eq!(c.dataset(&format!("{fit}/amp")).unwrap().as_floats().unwrap(), &[1.0, 2.0]);
    let time_since_start = c.dataset(&format!("{fit}/time_since_start")).unwrap();
    let elapsed = time_since_start.as_floats().unwrap();
    assert!((elapsed[0] - 1.2).abs() < 1e-9 && (elapsed[1] - 1.8).abs() < 1e-9);

    let covariance = c.dataset(&format!("{fit}/covariance")).unwrap();
    assert_eq!(covariance.shape(), &[2, 2, 2]);
    let values = covariance.as_floats().unwrap();
    assert_eq!(&values[..4], &[0.1, 0.0, 0.0, 0.2]);
    assert!(values[4..].iter().all(|v| v.is_nan()));
    assert_eq!(
        c.attr(&format!("{fit}/covariance"), "parameters").unwrap().as_texts().unwrap(),
        &["amp", "center"]
    );

    assert_eq!(c.attr(&data, "axes").unwrap().as_texts().unwrap(), &["x"]);
    assert_eq!(c.attr(&data, "signal").unwrap().as_text(), Some("y1"));
    assert_eq!(c.attr(&data, "auxiliary_signals").unwrap().as_texts().unwrap(), &["y2"]);
}

#[test]
fn test_second_run_on_same_path_gets_label_suffix() {
    let (mut s, opener) = serializer(SerializerOptions::default());
    for document in scenario() {
        s.handle(document).unwrap();
    }
    s.handle(doc("start", json!({"uid": "abc", "time": 2000.0, "session_name": "s1"})))
        .unwrap();
    s.handle(doc("stop", json!({"time": 2001.0}))).unwrap();

    let label = format!("s1_{}", iso8601(2000.0));
    let second = PathBuf::from(format!("/out/abc-_{}.nxs", sanitize_label(&label)));
    assert_eq!(opener.paths().len(), 2);
    assert_eq!(s.artifacts()[&label], vec![second.clone()]);
    let c = opener.get(&second).unwrap();
    assert_eq!(c.children("/"), vec![label]);
}

#[test]
fn test_export_closes_on_error() {
    let manager = MemoryManager::in_memory("/out");
    let opener = manager.opener().clone();
    let documents = vec![
        doc("start", json!({"uid": "abc", "time": 10.0})),
        doc("descriptor", json!({"uid": "d1", "name": "primary"})),
        doc("descriptor", json!({"uid": "d2", "name": "primary"})),
    ];
    let err = export(documents, OutputLocation::Manager(Box::new(manager)), ExportOptions::default())
        .unwrap_err();
    assert!(matches!(err, ExportError::DuplicateStream { .. }));
    assert!(buffer(&opener).is_closed());
}
