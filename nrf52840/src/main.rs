#![no_std]
#![no_main]

use core::{cell::RefCell, convert::Infallible};

use defmt_rtt as _;
use panic_probe as _;

use embassy_nrf::{
    config::Config,
    peripherals::PWM0,
    pwm::{Prescaler, SimplePwm},
};
use embedded_hal::pwm::{ErrorType, SetDutyCycle};
use flash_conformance::{
    pwm::PwmPair,
    ticker::{AsmDelay, CycleDelay},
};

/// Busy wait between two steps of the fade
const STEP_CYCLES: u32 = 200_000;

/// One output of a [`SimplePwm`] shared with the other channel
struct Channel<'a, 'd> {
    pwm: &'a RefCell<SimplePwm<'d, PWM0>>,
    index: usize,
}

impl ErrorType for Channel<'_, '_> {
    type Error = Infallible;
}

impl SetDutyCycle for Channel<'_, '_> {
    fn max_duty_cycle(&self) -> u16 {
        self.pwm.borrow().max_duty()
    }

    fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Self::Error> {
        self.pwm.borrow_mut().set_duty(self.index, duty);
        Ok(())
    }
}

#[cortex_m_rt::entry]
fn main() -> ! {
    let p = embassy_nrf::init(Config::default());

    // LED1 and LED2 of the nRF52840-DK, 1 MHz counter and 1000 steps for a 1 ms period
    let mut pwm = SimplePwm::new_2ch(p.PWM0, p.P0_13, p.P0_14);
    pwm.set_prescaler(Prescaler::Div16);
    pwm.set_max_duty(1000);
    let pwm = RefCell::new(pwm);

    let mut leds = PwmPair::new(
        Channel {
            pwm: &pwm,
            index: 0,
        },
        Channel {
            pwm: &pwm,
            index: 1,
        },
    );
    let mut delay = AsmDelay;

    defmt::info!("Crossfading LED1 and LED2");
    loop {
        if let Ok((a, b)) = leds.step() {
            defmt::trace!("Duty {=u8}% / {=u8}%", a, b);
        }
        delay.delay_cycles(STEP_CYCLES);
    }
}
