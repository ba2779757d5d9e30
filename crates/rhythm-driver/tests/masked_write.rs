//! Property tests for masked register writes

use proptest::prelude::*;
use rhythm_driver::backends::SimulatedBoard;
use rhythm_driver::gateware::{devices, regs};
use rhythm_driver::RegisterBus;

const REG: u16 = regs::rhythm::MAX_TIMESTEP;

fn bus_with(initial: u32) -> RegisterBus {
    let mut bus = RegisterBus::new(Box::new(SimulatedBoard::new()));
    bus.write(devices::RHYTHM, REG, initial).unwrap();
    bus
}

proptest! {
    #[test]
    fn test_masked_write_touches_only_masked_bits(initial: u32, value: u32, mask: u32) {
        let mut bus = bus_with(initial);
        bus.write_masked(devices::RHYTHM, REG, value, mask).unwrap();
        let after = bus.read(devices::RHYTHM, REG).unwrap();
        prop_assert_eq!(after & !mask, initial & !mask);
        prop_assert_eq!(after & mask, value & mask);
    }

    #[test]
    fn test_masked_write_is_idempotent(initial: u32, value: u32, mask: u32) {
        let mut bus = bus_with(initial);
        bus.write_masked(devices::RHYTHM, REG, value, mask).unwrap();
        let once = bus.read(devices::RHYTHM, REG).unwrap();
        bus.write_masked(devices::RHYTHM, REG, value, mask).unwrap();
        prop_assert_eq!(bus.read(devices::RHYTHM, REG).unwrap(), once);
    }
}
