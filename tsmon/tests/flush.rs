use std::{fs, sync::Arc, thread, time::Duration};

use tsmon::{
    proto::{MetricsData, SpecType},
    store::memcache::{InMemoryIndex, InMemoryMemcache},
    Bucketer, DebuggingMonitor, DiskMonitor, Error, Field, FlushMode, MemcacheMetricStore, MetricBuilder, MockClock,
    StateBuilder, Target, Units,
};

fn task(hostname: &str, task_num: i32) -> Target {
    Target::task("service", "job", "region", hostname, task_num)
}

fn find<'a>(data: &'a [MetricsData], name: &str) -> &'a MetricsData {
    data.iter().find(|d| d.name == name).unwrap_or_else(|| panic!("no record for {name}"))
}

#[test]
fn every_kind_is_serialized() {
    let monitor = DebuggingMonitor::new();
    let clock = MockClock::new(10.0);
    let state = StateBuilder::new()
        .with_monitor(Arc::new(monitor.clone()))
        .with_target(task("host", 1))
        .with_clock(Arc::new(clock.clone()))
        .build()
        .unwrap();

    MetricBuilder::new("s", "a string").string(&state).unwrap().set("v", ()).unwrap();
    MetricBuilder::new("b", "a bool").boolean(&state).unwrap().toggle(()).unwrap();
    MetricBuilder::new("c", "a counter").counter(&state).unwrap().increment_by(3, ()).unwrap();
    MetricBuilder::new("g", "a gauge").gauge(&state).unwrap().set(-2, ()).unwrap();
    MetricBuilder::new("cf", "a cumulative").with_units(Units::Seconds).cumulative(&state).unwrap().increment_by(1.5, ()).unwrap();
    MetricBuilder::new("f", "a float").float(&state).unwrap().set(0.25, ()).unwrap();
    let dist = MetricBuilder::new("d", "a distribution")
        .with_bucketer(Bucketer::geometric(2.0, 10).unwrap())
        .with_field(Field::bool("cached"))
        .cumulative_distribution(&state)
        .unwrap();
    dist.add(3.0, [("cached", true)]).unwrap();

    clock.set(20.0);
    state.flush().unwrap();
    let collections = monitor.take();
    assert_eq!(collections.len(), 1);
    let data = &collections[0].data;
    assert_eq!(data.len(), 7);

    assert_eq!(find(data, "s").string_value.as_deref(), Some("v"));
    assert_eq!(find(data, "b").boolean_value, Some(true));
    assert_eq!(find(data, "c").counter, Some(3));
    assert_eq!(find(data, "c").start_timestamp_us, Some(10_000_000));
    assert_eq!(find(data, "g").gauge, Some(-2));
    assert_eq!(find(data, "g").start_timestamp_us, None);
    assert_eq!(find(data, "cf").cumulative_double_value, Some(1.5));
    assert_eq!(find(data, "cf").units(), Units::Seconds);
    assert_eq!(find(data, "f").noncumulative_double_value, Some(0.25));
    assert_eq!(find(data, "f").description.as_deref(), Some("a float"));

    let d = find(data, "d");
    let pb = d.distribution.as_ref().unwrap();
    assert_eq!(pb.spec_type(), SpecType::CanonicalPowersOf2);
    assert_eq!(pb.is_cumulative, Some(true));
    assert_eq!(d.fields.len(), 1);
    assert_eq!(d.fields[0].bool_value, Some(true));
    assert_eq!(d.task.as_ref().unwrap().task_num, Some(1));
}

#[test]
fn metric_target_overrides_default() {
    let monitor = DebuggingMonitor::new();
    let state =
        StateBuilder::new().with_monitor(Arc::new(monitor.clone())).with_target(task("host", 0)).build().unwrap();

    let device = Target::device("reg", "role", "1", "bot");
    MetricBuilder::new("own", "desc").with_target(device).gauge(&state).unwrap().set(1, ()).unwrap();
    MetricBuilder::new("shared", "desc").gauge(&state).unwrap().set(1, ()).unwrap();
    state.flush().unwrap();

    let data = monitor.take().remove(0).data;
    let own = find(&data, "own");
    assert!(own.task.is_none());
    assert_eq!(own.network_device.as_ref().unwrap().hostname.as_deref(), Some("bot"));
    assert!(find(&data, "shared").task.is_some());
}

#[test]
fn monitor_failures_are_returned_from_flush() {
    let monitor = DebuggingMonitor::new();
    let state =
        StateBuilder::new().with_monitor(Arc::new(monitor.clone())).with_target(task("host", 0)).build().unwrap();
    monitor.set_failing(true);
    assert!(matches!(state.flush(), Err(Error::Monitor(_))));
}

#[test]
fn memcache_instances_are_flushed_with_their_own_targets() {
    let cache = InMemoryMemcache::new();
    let index = InMemoryIndex::new();
    let clock = Arc::new(MockClock::new(100.0));
    let store_for = |hostname: &str, task_num: i32| {
        Arc::new(MemcacheMetricStore::new(
            clock.clone(),
            Arc::new(cache.clone()),
            Arc::new(index.clone()),
            task(hostname, task_num),
        ))
    };

    let monitor = DebuggingMonitor::new();
    let first = StateBuilder::new()
        .with_store(store_for("host-a", 0))
        .with_monitor(Arc::new(monitor.clone()))
        .with_target(task("host-a", 0))
        .build()
        .unwrap();
    let second = StateBuilder::new().with_store(store_for("host-b", 1)).build().unwrap();

    MetricBuilder::new("requests", "desc").counter(&first).unwrap().increment_by(2, ()).unwrap();
    MetricBuilder::new("requests", "desc").counter(&second).unwrap().increment_by(5, ()).unwrap();

    first.flush().unwrap();
    let data = monitor.take().remove(0).data;
    assert_eq!(data.len(), 2);

    let mut by_host: Vec<_> = data
        .iter()
        .map(|d| {
            let task = d.task.as_ref().unwrap();
            (task.host_name.clone().unwrap(), task.task_num.unwrap(), d.counter.unwrap())
        })
        .collect();
    by_host.sort();
    assert_eq!(by_host, vec![("host-a".to_string(), 0, 2), ("host-b".to_string(), 1, 5)]);
}

#[test]
fn auto_mode_flushes_in_the_background() {
    let monitor = DebuggingMonitor::new();
    let state = StateBuilder::new()
        .with_monitor(Arc::new(monitor.clone()))
        .with_target(task("host", 0))
        .with_flush_mode(FlushMode::Auto)
        .with_flush_interval(Duration::from_millis(10))
        .build()
        .unwrap();
    MetricBuilder::new("c", "desc").counter(&state).unwrap().increment(()).unwrap();

    thread::sleep(Duration::from_millis(200));
    state.close();
    assert!(monitor.collections().len() >= 2);
}

#[test]
fn disk_monitor_appends_collections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("metrics.txt");
    let state = StateBuilder::new()
        .with_monitor(Arc::new(DiskMonitor::new(&path).unwrap()))
        .with_target(task("host", 0))
        .build()
        .unwrap();
    MetricBuilder::new("written", "desc").counter(&state).unwrap().increment(()).unwrap();

    state.flush().unwrap();
    state.flush().unwrap();
    let contents = fs::read_to_string(&path).unwrap();
    assert_eq!(contents.matches("\"written\"").count(), 2);
}
