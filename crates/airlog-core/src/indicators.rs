//! Status indicator outputs
//!
//! Three LEDs report the state of the logger:
//!
//! | LED     | Toggles on                              |
//! |---------|-----------------------------------------|
//! | storage | each mount attempt, each filled buffer  |
//! | IMU     | each recorded sample                    |
//! | CO₂     | each merged CO₂ reading                 |
//!
//! All three are lit while waiting for the start input and switched off
//! once collection starts and at exit. A fault leaves the storage LED lit
//! alone.

use embedded_hal::digital::StatefulOutputPin;

use crate::pipeline::Recorded;

pub struct Indicators<S, I, C> {
    storage: S,
    imu: I,
    co2: C,
}

impl<S, I, C> Indicators<S, I, C>
where
    S: StatefulOutputPin,
    I: StatefulOutputPin,
    C: StatefulOutputPin,
{
    pub fn new(storage: S, imu: I, co2: C) -> Self {
        Self { storage, imu, co2 }
    }

    pub fn release(self) -> (S, I, C) {
        (self.storage, self.imu, self.co2)
    }

    pub fn toggle_storage(&mut self) {
        let _ = self.storage.toggle();
    }

    pub fn toggle_imu(&mut self) {
        let _ = self.imu.toggle();
    }

    pub fn toggle_co2(&mut self) {
        let _ = self.co2.toggle();
    }

    pub fn all_on(&mut self) {
        let _ = self.storage.set_high();
        let _ = self.imu.set_high();
        let _ = self.co2.set_high();
    }

    pub fn all_off(&mut self) {
        let _ = self.storage.set_low();
        let _ = self.imu.set_low();
        let _ = self.co2.set_low();
    }

    pub fn show_fault(&mut self) {
        self.all_off();
        let _ = self.storage.set_high();
    }

    /// Reflect one recorded sample.
    pub fn on_recorded(&mut self, outcome: &Recorded) {
        match outcome {
            Recorded::Stored { .. } => self.toggle_imu(),
            Recorded::Filled { .. } => {
                self.toggle_imu();
                self.toggle_storage();
            }
            Recorded::Dropped { .. } => {}
        }
        if outcome.co2_merged() {
            self.toggle_co2();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use embedded_hal::digital::{ErrorType, OutputPin};

    #[derive(Default)]
    struct MockPin {
        high: bool,
        toggles: usize,
    }

    impl ErrorType for MockPin {
        type Error = Infallible;
    }

    impl OutputPin for MockPin {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.high = false;
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            self.high = true;
            Ok(())
        }
    }

    impl StatefulOutputPin for MockPin {
        fn is_set_high(&mut self) -> Result<bool, Infallible> {
            Ok(self.high)
        }

        fn is_set_low(&mut self) -> Result<bool, Infallible> {
            Ok(!self.high)
        }

        fn toggle(&mut self) -> Result<(), Infallible> {
            self.toggles += 1;
            self.high = !self.high;
            Ok(())
        }
    }

    fn indicators() -> Indicators<MockPin, MockPin, MockPin> {
        Indicators::new(MockPin::default(), MockPin::default(), MockPin::default())
    }

    #[test]
    fn test_all_on_then_off() {
        let mut leds = indicators();
        leds.all_on();
        let (s, i, c) = leds.release();
        assert!(s.high && i.high && c.high);

        let mut leds = Indicators::new(s, i, c);
        leds.all_off();
        let (s, i, c) = leds.release();
        assert!(!s.high && !i.high && !c.high);
    }

    #[test]
    fn test_recorded_outcomes_drive_leds() {
        let mut leds = indicators();
        leds.on_recorded(&Recorded::Stored { co2_merged: false });
        leds.on_recorded(&Recorded::Stored { co2_merged: true });
        leds.on_recorded(&Recorded::Filled {
            index: 0,
            co2_merged: false,
        });
        leds.on_recorded(&Recorded::Dropped { dropped: 1 });

        let (storage, imu, co2) = leds.release();
        assert_eq!(imu.toggles, 3);
        assert_eq!(storage.toggles, 1);
        assert_eq!(co2.toggles, 1);
    }

    #[test]
    fn test_fault_lights_storage_only() {
        let mut leds = indicators();
        leds.all_on();
        leds.show_fault();
        let (storage, imu, co2) = leds.release();
        assert!(storage.high);
        assert!(!imu.high && !co2.high);
    }
}
