use sbcio_drivers::mmio::SimulatedMemory;
use sbcio_drivers::{
    Config, DeviceMode, DeviceRegistry, DigitalPin, Error, InputConfig, PinTable, PullUpDown, Soc,
};
use std::sync::{Arc, Barrier};
use std::thread;

const BCM2837_GPIO: u64 = 0x3f20_0000;

fn registry(soc: Soc, pins: std::ops::Range<u32>) -> (Arc<SimulatedMemory>, DeviceRegistry) {
    let memory = SimulatedMemory::new();
    let registry =
        DeviceRegistry::new(soc, PinTable::digital(pins), Config::simulated(Arc::clone(&memory)))
            .unwrap();
    (memory, registry)
}

#[test]
fn concurrent_provisioning_has_one_winner() {
    let (_memory, registry) = registry(Soc::Bcm2837, 0..54);
    let registry = Arc::new(registry);
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                registry.provision_output(17, false)
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(Error::AlreadyOpen(_))))
        .count();
    assert_eq!(winners, 1);
    assert_eq!(conflicts, 7);
    assert_eq!(registry.open_keys().len(), 1);
}

#[test]
fn shutdown_during_provisioning_leaves_nothing_open() {
    let (memory, registry) = registry(Soc::Bcm2837, 0..54);
    let registry = Arc::new(registry);
    let barrier = Arc::new(Barrier::new(5));

    let handles: Vec<_> = (0..4u32)
        .map(|t| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut pins = Vec::new();
                for round in 0..50u32 {
                    match registry.provision_output(t * 10 + round % 10, false) {
                        Ok(pin) => pins.push(pin),
                        Err(Error::AlreadyOpen(_)) => {}
                        Err(Error::Fatal(_)) => break,
                        Err(err) => panic!("unexpected error {err}"),
                    }
                }
                pins
            })
        })
        .collect();

    barrier.wait();
    registry.shutdown();
    let pins: Vec<_> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();

    assert!(registry.open_keys().is_empty());
    assert!(pins.iter().all(|pin| !pin.is_open()));
    assert_eq!(memory.live_mappings(), 0);
}

#[test]
fn map_failure_only_fails_that_call() {
    let (memory, registry) = registry(Soc::Bcm2837, 0..54);
    memory.refuse(BCM2837_GPIO);
    assert!(matches!(
        registry.provision_output(17, false),
        Err(Error::MapFailed { .. })
    ));
    assert!(registry.open_keys().is_empty());

    memory.allow(BCM2837_GPIO);
    let pin = registry.provision_output(17, true).unwrap();
    assert!(pin.read().is_ok());
}

#[test]
fn shutdown_twice_unmaps_each_window_once() {
    let (memory, registry) = registry(Soc::Rk3399, 0..160);
    let out = registry.provision_output(3, true).unwrap();
    let _input = registry.provision_input(90, InputConfig::new()).unwrap();
    assert!(memory.live_mappings() > 0);

    registry.shutdown();
    registry.shutdown();

    assert_eq!(memory.live_mappings(), 0);
    assert_eq!(memory.unmap_count(), memory.map_count());
    assert!(!out.is_open());
    assert!(matches!(out.write(false), Err(Error::NotFound(_))));
    assert!(registry.open_keys().is_empty());
}

#[test]
fn double_close_is_harmless() {
    let (_memory, registry) = registry(Soc::Bcm2711, 0..58);
    let pin = registry.provision_output(22, false).unwrap();
    pin.close();
    pin.close();
    assert!(!pin.is_open());

    let again = registry.provision_output(22, false).unwrap();
    drop(pin);
    assert!(again.is_open());
    assert!(registry.is_open(again.key()));
}

#[test]
fn modes_round_trip_without_touching_siblings() {
    let (_memory, registry) = registry(Soc::AllwinnerH3, 0..32);
    let out = registry.provision_output(0, false).unwrap();
    let input = registry.provision_input(1, InputConfig::new()).unwrap();

    assert_eq!(out.mode().unwrap(), DeviceMode::DigitalOutput);
    assert_eq!(input.mode().unwrap(), DeviceMode::DigitalInput);

    out.write(true).unwrap();
    assert!(out.read().unwrap());
    assert_eq!(input.mode().unwrap(), DeviceMode::DigitalInput);
}

#[test]
fn pulls_round_trip_across_encoding_boundary() {
    let (_memory, registry) = registry(Soc::Rk3399, 0..160);
    for gpio in [79, 80] {
        let pin = registry.provision_input(gpio, InputConfig::new()).unwrap();
        for pull in [PullUpDown::PullUp, PullUpDown::PullDown, PullUpDown::None] {
            pin.set_pull(pull).unwrap();
            assert_eq!(pin.pull().unwrap(), pull, "GPIO {gpio}");
        }
    }
}

#[test]
fn closed_pin_returns_to_input() {
    let (_memory, registry) = registry(Soc::Bcm2837, 0..54);
    let pin = registry.provision_output(5, true).unwrap();
    pin.close();

    let pin5 = registry.provision(5, DeviceMode::DigitalInput, None).unwrap();
    assert_eq!(pin5.mode().unwrap(), DeviceMode::DigitalInput);
    assert_eq!(pin5.pull().unwrap(), PullUpDown::None);
}
