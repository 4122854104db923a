//! End-to-end tests driving the loopback backend through a real `poll(2)`
//! readiness cycle: inject into the pipe, run one router iteration, observe
//! the applied batches.

use patch_core::{PollMultiplexer, Router};
use patch_sim::LoopbackBackend;

#[test]
fn injected_event_fans_out_through_real_poll() {
    let mut backend = LoopbackBackend::new("hub").unwrap();
    let mut injector = backend.take_injector().unwrap();
    let log = backend.log();

    let mut router = Router::new();
    router.add_backend("hub", Box::new(backend));

    let fader = router.channel("hub", "fader").unwrap();
    let dim1 = router.channel("hub", "dim1").unwrap();
    let dim2 = router.channel("hub", "dim2").unwrap();
    router.map_channel(fader, dim1).unwrap();
    router.map_channel(fader, dim2).unwrap();

    router.start().unwrap();
    assert_eq!(router.descriptor_count(), 1);

    injector.send("fader", 0.8).unwrap();
    router.run_once(&mut PollMultiplexer::new()).unwrap();

    assert_eq!(
        log.batches(),
        vec![vec![("dim1".to_string(), 0.8), ("dim2".to_string(), 0.8)]]
    );

    router.teardown();
    assert_eq!(router.descriptor_count(), 0);
}

#[test]
fn forward_option_produces_a_cascade_round() {
    let mut options = std::collections::BTreeMap::new();
    options.insert("forward.monitor".to_string(), "echo".to_string());
    let mut backend = LoopbackBackend::with_options("hub", &options).unwrap();
    let mut injector = backend.take_injector().unwrap();
    let log = backend.log();

    let mut router = Router::new();
    router.add_backend("hub", Box::new(backend));

    let fader = router.channel("hub", "fader").unwrap();
    let monitor = router.channel("hub", "monitor").unwrap();
    let echo = router.channel("hub", "echo").unwrap();
    let tape = router.channel("hub", "tape").unwrap();
    router.map_channel(fader, monitor).unwrap();
    router.map_channel(echo, tape).unwrap();

    router.start().unwrap();
    injector.send("fader", 0.5).unwrap();
    router.run_once(&mut PollMultiplexer::new()).unwrap();

    // round one applies monitor, whose forward re-emits on echo; round two
    // applies the mapped tape
    assert_eq!(
        log.batches(),
        vec![
            vec![("monitor".to_string(), 0.5)],
            vec![("tape".to_string(), 0.5)],
        ]
    );
}

#[test]
fn out_of_range_input_is_clamped_on_entry() {
    let mut backend = LoopbackBackend::new("hub").unwrap();
    let mut injector = backend.take_injector().unwrap();
    let log = backend.log();

    let mut router = Router::new();
    router.add_backend("hub", Box::new(backend));

    let fader = router.channel("hub", "fader").unwrap();
    let dim = router.channel("hub", "dim").unwrap();
    router.map_channel(fader, dim).unwrap();

    router.start().unwrap();
    injector.send("fader", 42.0).unwrap();
    injector.send("fader", -3.0).unwrap();
    router.run_once(&mut PollMultiplexer::new()).unwrap();

    // values are clamped into the normalised range where they enter the graph
    assert_eq!(
        log.batches(),
        vec![vec![("dim".to_string(), 1.0), ("dim".to_string(), 0.0)]]
    );
}

#[test]
fn closed_injector_unregisters_the_pipe() {
    let mut backend = LoopbackBackend::new("hub").unwrap();
    let injector = backend.take_injector().unwrap();

    let mut router = Router::new();
    router.add_backend("hub", Box::new(backend));
    router.start().unwrap();
    assert_eq!(router.descriptor_count(), 1);

    drop(injector);
    router.run_once(&mut PollMultiplexer::new()).unwrap();

    assert_eq!(router.descriptor_count(), 0);
}

#[test]
fn multiple_lines_in_one_readiness_wake_are_all_routed() {
    let mut backend = LoopbackBackend::new("hub").unwrap();
    let mut injector = backend.take_injector().unwrap();
    let log = backend.log();

    let mut router = Router::new();
    router.add_backend("hub", Box::new(backend));

    let a = router.channel("hub", "a").unwrap();
    let b = router.channel("hub", "b").unwrap();
    router.map_channel(a, b).unwrap();

    router.start().unwrap();
    injector.send("a", 0.25).unwrap();
    injector.send("a", 0.75).unwrap();
    router.run_once(&mut PollMultiplexer::new()).unwrap();

    // both events land in the same batch, duplicates preserved in order
    assert_eq!(
        log.batches(),
        vec![vec![("b".to_string(), 0.25), ("b".to_string(), 0.75)]]
    );
}
